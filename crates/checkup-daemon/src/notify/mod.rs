//! Webhook notifications about pending updates.
//!
//! The [`Notifier`] listens on the cache's change feed and posts a Discord
//! style embed whenever the number of pending updates changes, at most once
//! per configured interval.

pub mod embed;
pub mod webhook;

use std::sync::Arc;

use checkup_core::cache::UpdateCache;
use checkup_core::models::{Snapshot, Update};
use time::format_description::OwnedFormatItem;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::NotifyConfig;

pub use embed::{Embed, EmbedLayout, WebhookPayload, build_embed};
pub use webhook::{UreqWebhookClient, WebhookClient, WebhookError};

/// What was last delivered.
#[derive(Clone, Debug, Default)]
struct Delivered {
    count: usize,
    updates: Vec<Update>,
    at: Option<Instant>,
}

#[derive(Debug, Eq, PartialEq)]
enum Decision {
    /// Nothing changed since the last notification.
    Unchanged,
    /// Changed, but the last notification is too recent.
    Throttled(Instant),
    /// Changed without anything new to report.
    Acknowledge,
    Send(Vec<Update>),
}

pub struct Notifier {
    cache: Arc<UpdateCache>,
    client: Arc<dyn WebhookClient>,
    config: NotifyConfig,
    hostname: String,
}

impl Notifier {
    pub fn new(
        cache: Arc<UpdateCache>,
        client: Arc<dyn WebhookClient>,
        config: NotifyConfig,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            client,
            config,
            hostname: hostname.into(),
        }
    }

    /// Runs until `cancel` fires, checking the snapshot on start and after
    /// every change.
    pub async fn run(self, cancel: CancellationToken) {
        let mut subscription = self.cache.subscribe();
        let mut delivered = Delivered::default();

        tracing::info!(
            interval = ?self.config.interval,
            delta = self.config.delta,
            "webhook notifier started"
        );

        loop {
            let recheck = self.evaluate(&mut delivered).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                woken = subscription.recv() => {
                    if woken.is_none() {
                        break;
                    }
                }
                _ = sleep_until(recheck), if recheck.is_some() => {}
            }
        }

        tracing::debug!("webhook notifier stopped");
    }

    /// Sends a notification if one is due. Returns when to look again if
    /// nothing new happens in the meantime.
    async fn evaluate(&self, delivered: &mut Delivered) -> Option<Instant> {
        let snapshot = match self.cache.read().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::debug!(%error, "no snapshot to notify about");
                return None;
            }
        };

        let now = Instant::now();
        let listed = match self.decide(delivered, &snapshot, now) {
            Decision::Unchanged => return None,
            Decision::Throttled(at) => {
                tracing::debug!("notification throttled");
                return Some(at);
            }
            Decision::Acknowledge => {
                tracing::debug!("no new updates since the last notification");
                delivered.count = snapshot.updates.len();
                delivered.updates = snapshot.updates;
                return None;
            }
            Decision::Send(listed) => listed,
        };

        let payload = build_payload(
            &self.hostname,
            &snapshot,
            &listed,
            &self.config.footer_format,
        );
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(%error, "cannot encode webhook payload");
                return None;
            }
        };

        let client = Arc::clone(&self.client);
        let url = self.config.webhook_url.clone();
        let result = tokio::task::spawn_blocking(move || client.post(&url, &body)).await;

        match result {
            Ok(Ok(())) => {
                tracing::info!(
                    pending = snapshot.updates.len(),
                    listed = listed.len(),
                    "sent webhook notification"
                );
                delivered.count = snapshot.updates.len();
                delivered.updates = snapshot.updates;
                delivered.at = Some(now);
                None
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "webhook notification failed");
                Some(now + self.config.interval)
            }
            Err(error) => {
                tracing::error!(%error, "webhook task failed");
                Some(now + self.config.interval)
            }
        }
    }

    fn decide(&self, delivered: &Delivered, snapshot: &Snapshot, now: Instant) -> Decision {
        if snapshot.updates.len() == delivered.count {
            return Decision::Unchanged;
        }

        if let Some(at) = delivered.at {
            let next = at + self.config.interval;
            if now < next {
                return Decision::Throttled(next);
            }
        }

        if !self.config.delta {
            return Decision::Send(snapshot.updates.clone());
        }

        let fresh = diff_updates(&delivered.updates, &snapshot.updates);
        if fresh.is_empty() {
            Decision::Acknowledge
        } else {
            Decision::Send(fresh)
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Updates in `current` that were not in `previous`.
pub fn diff_updates(previous: &[Update], current: &[Update]) -> Vec<Update> {
    current
        .iter()
        .filter(|update| !previous.contains(update))
        .cloned()
        .collect()
}

pub fn build_payload(
    hostname: &str,
    snapshot: &Snapshot,
    listed: &[Update],
    footer_format: &OwnedFormatItem,
) -> WebhookPayload {
    let (embed, layout) = build_embed(
        hostname,
        snapshot.updates.len(),
        listed,
        snapshot.checked_at().ok(),
        footer_format,
    );
    tracing::debug!(?layout, "built webhook embed");
    WebhookPayload {
        embeds: vec![embed],
    }
}

/// The host name shown in notification titles.
pub fn hostname() -> String {
    match hostname::get() {
        Ok(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        Ok(_) => "localhost".to_string(),
        Err(error) => {
            tracing::warn!(error = %error, "cannot read host name, using localhost");
            "localhost".to_string()
        }
    }
}
