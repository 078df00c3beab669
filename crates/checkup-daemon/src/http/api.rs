use std::sync::Arc;

use checkup_core::duration::parse_duration;
use checkup_core::models::{CoreErrorKind, Snapshot};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::http::AppState;

/// Body of every `/api` response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "filePath", default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
}

impl ApiResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Query parameters of `/api`. Flags count as set when present, with or
/// without a value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ApiQuery {
    pub updates: bool,
    pub filepath: bool,
    pub refresh: bool,
    pub immediate: bool,
    pub log_file: bool,
    pub every: Option<String>,
}

impl ApiQuery {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(query.unwrap_or_default()).unwrap_or_default();

        let mut parsed = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "updates" => parsed.updates = true,
                "filepath" => parsed.filepath = true,
                "refresh" => parsed.refresh = true,
                "immediate" => parsed.immediate = true,
                "log_file" => parsed.log_file = true,
                "every" => parsed.every = (!value.is_empty()).then_some(value),
                _ => {}
            }
        }
        parsed
    }
}

pub(crate) fn status_for(kind: CoreErrorKind) -> StatusCode {
    match kind {
        CoreErrorKind::InvalidInput | CoreErrorKind::ParseFailure => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Runs the cache operations a query asks for, in the order refresh,
/// file path, updates.
pub async fn handle(query: &ApiQuery, state: &AppState) -> (StatusCode, ApiResponse) {
    let mut response = ApiResponse::default();
    let mut status = StatusCode::OK;

    if !(query.updates || query.filepath || query.refresh) {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::error("filepath, updates and/or refresh parameter(s) required"),
        );
    }

    if query.refresh {
        if query.log_file {
            if let Err(failure) = refresh_from_log(state).await {
                return failure;
            }
        } else {
            let will_refresh = match &query.every {
                Some(every) => match parse_duration(every) {
                    Ok(interval) => state.cache.needs_refresh(interval).await,
                    Err(error) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            ApiResponse::error(format!("cannot parse time duration: {}", error.message)),
                        );
                    }
                },
                None => true,
            };

            if will_refresh && query.immediate {
                let cache = Arc::clone(&state.cache);
                state.tracker.spawn(async move {
                    if let Err(error) = cache.refresh().await {
                        tracing::error!(error = %error, "queued refresh failed");
                    }
                });
                tracing::debug!("refresh queued");
                response.queued = Some(true);
                status = StatusCode::ACCEPTED;
            } else if will_refresh {
                match state.cache.refresh().await {
                    Ok(report) => {
                        if let Some(error) = report.error() {
                            tracing::warn!(error = %error, "refresh partially failed");
                        }
                    }
                    Err(error) => {
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            ApiResponse::error(format!("cannot update cache file: {error}")),
                        );
                    }
                }
            }
        }
    }

    if query.filepath {
        response.file_path = state
            .cache
            .cache_path()
            .map(|path| path.display().to_string());
    }

    if query.updates {
        match state.cache.read().await {
            Ok(snapshot) => response.data = Some(snapshot),
            Err(error) => {
                response.error = Some(error.message);
                return (status_for(error.kind), response);
            }
        }
    }

    (status, response)
}

async fn refresh_from_log(state: &AppState) -> Result<(), (StatusCode, ApiResponse)> {
    let Some(watcher) = &state.watcher else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::error("no package manager log file is configured"),
        ));
    };

    match watcher.scan().await {
        Ok(removed) => {
            tracing::debug!(removed, "applied package manager log on request");
            Ok(())
        }
        Err(error) if error.kind == CoreErrorKind::InvalidInput => Err((
            StatusCode::BAD_REQUEST,
            ApiResponse::error("updates were never checked, cannot update from logs"),
        )),
        Err(error) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::error(format!("cannot update from package manager logs: {error}")),
        )),
    }
}
