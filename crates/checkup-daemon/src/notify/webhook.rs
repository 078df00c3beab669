use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook returned HTTP {0}")]
    Status(u16),
    #[error("webhook request failed: {0}")]
    Transport(String),
}

/// Delivers a JSON payload to a webhook endpoint. Implementations block.
pub trait WebhookClient: Send + Sync {
    fn post(&self, url: &str, body: &str) -> Result<(), WebhookError>;
}

pub struct UreqWebhookClient {
    agent: ureq::Agent,
}

impl UreqWebhookClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for UreqWebhookClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl WebhookClient for UreqWebhookClient {
    fn post(&self, url: &str, body: &str) -> Result<(), WebhookError> {
        let response = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(body);

        match response {
            Ok(response) => match response.status() {
                200 | 204 => Ok(()),
                other => Err(WebhookError::Status(other)),
            },
            Err(ureq::Error::Status(code, _)) => Err(WebhookError::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                Err(WebhookError::Transport(transport.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::{UreqWebhookClient, WebhookClient, WebhookError};

    fn one_shot_server(status_line: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                let read = stream.read(&mut buffer).unwrap();
                received.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&received);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            line.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|value| value.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if received.len() >= header_end + 4 + length {
                        break;
                    }
                }
                if read == 0 {
                    break;
                }
            }
            write!(
                stream,
                "{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )
            .unwrap();
            String::from_utf8_lossy(&received).into_owned()
        });
        (url, handle)
    }

    #[test]
    fn no_content_is_success() {
        let (url, server) = one_shot_server("HTTP/1.1 204 No Content");
        UreqWebhookClient::default()
            .post(&url, r#"{"embeds":[]}"#)
            .unwrap();
        let request = server.join().unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"embeds":[]}"#));
    }

    #[test]
    fn error_status_is_reported() {
        let (url, server) = one_shot_server("HTTP/1.1 400 Bad Request");
        let error = UreqWebhookClient::default().post(&url, "{}").unwrap_err();
        assert!(matches!(error, WebhookError::Status(400)));
        server.join().unwrap();
    }

    #[test]
    fn unexpected_success_status_is_an_error() {
        let (url, server) = one_shot_server("HTTP/1.1 202 Accepted");
        let error = UreqWebhookClient::default().post(&url, "{}").unwrap_err();
        assert!(matches!(error, WebhookError::Status(202)));
        server.join().unwrap();
    }
}
