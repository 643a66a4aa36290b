//! Event source: fetches recent check-ins of one account from Untappd.
//!
//! The source is stateless. The poller passes in a [`FetchWindow`] derived
//! from the account's high-water mark; the window only narrows the request,
//! deduplication is still done by the diff engine.

use crate::entities::{AccountId, CheckinEvent, CheckinId, HighWaterMark};
use async_trait::async_trait;
use slappd_sdk::objects::untappd::{Envelope, UserCheckinsResponse};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Longest page the Untappd API will return.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Errors that can occur while fetching check-ins.
///
/// None of them are fatal: the poller logs the error and retries on the
/// next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout or server-side error.
    #[error("upstream unavailable: {reason}")]
    Unavailable { reason: String },

    /// Authentication failure, rate limit or other client error.
    #[error("upstream rejected request with status {status}: {reason}")]
    Rejected {
        status: u16,
        reason: String,
        rate_limited: bool,
    },

    /// The response could not be turned into check-ins.
    #[error("upstream response malformed: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            FetchError::Rejected {
                rate_limited: true,
                ..
            }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

/// Which slice of an account's stream to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchWindow {
    /// Only ask for check-ins from this id on.
    pub min_id: Option<CheckinId>,
    /// Page size override; the source's configured page size when `None`.
    pub limit: Option<u32>,
}

impl FetchWindow {
    /// Everything after `mark`, one full page.
    pub fn after(mark: HighWaterMark) -> Self {
        Self {
            min_id: mark,
            limit: None,
        }
    }

    /// Only the most recent check-in, used to record a baseline.
    pub fn latest_only() -> Self {
        Self {
            min_id: None,
            limit: Some(1),
        }
    }
}

/// Trait for check-in sources.
#[async_trait]
pub trait CheckinSource: Send + Sync {
    /// Fetch the most recent check-ins of `account`.
    ///
    /// Returns at most one page, newest first. An empty vector is valid.
    async fn fetch(
        &self,
        account: &AccountId,
        window: FetchWindow,
    ) -> Result<Vec<CheckinEvent>, FetchError>;
}

/// Credentials and request settings for the Untappd API.
#[derive(Debug, Clone)]
pub struct UntappdSourceConfig {
    pub api_base: Url,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: Option<String>,
    pub page_size: u32,
    pub timeout: Duration,
}

impl UntappdSourceConfig {
    pub const DEFAULT_API_BASE: &str = "https://api.untappd.com/v4";
    pub const DEFAULT_PAGE_SIZE: u32 = 25;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Untappd v4 `user/checkins` client.
pub struct UntappdSource {
    config: UntappdSourceConfig,
    http_client: reqwest::Client,
}

impl UntappdSource {
    /// Create a new UntappdSource with a client honouring the configured
    /// timeout.
    pub fn new(config: UntappdSourceConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn checkins_url(&self, account: &AccountId) -> String {
        format!(
            "{}/user/checkins/{}",
            self.config.api_base.as_str().trim_end_matches('/'),
            account
        )
    }

    fn query(&self, window: FetchWindow) -> Vec<(&'static str, String)> {
        let limit = window
            .limit
            .unwrap_or(self.config.page_size)
            .clamp(1, MAX_PAGE_SIZE);

        let mut query = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("limit", limit.to_string()),
        ];
        if let Some(token) = &self.config.access_token {
            query.push(("access_token", token.clone()));
        }
        if let Some(min_id) = window.min_id {
            query.push(("min_id", min_id.to_string()));
        }
        query
    }
}

#[async_trait]
impl CheckinSource for UntappdSource {
    async fn fetch(
        &self,
        account: &AccountId,
        window: FetchWindow,
    ) -> Result<Vec<CheckinEvent>, FetchError> {
        debug!(account = %account, ?window, "Fetching Untappd checkins");

        let response = self
            .http_client
            .get(self.checkins_url(account))
            .query(&self.query(window))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Unavailable {
                reason: format!("HTTP {status}"),
            });
        }

        let body = response.text().await?;
        let envelope: Envelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if status.is_client_error() => {
                return Err(FetchError::Rejected {
                    status: status.as_u16(),
                    reason: snippet(&body),
                    rate_limited: status == reqwest::StatusCode::TOO_MANY_REQUESTS,
                });
            }
            Err(e) => return Err(FetchError::Malformed(e.to_string())),
        };

        if !envelope.meta.is_ok() || status.is_client_error() {
            let meta = envelope.meta;
            let rate_limited =
                meta.is_rate_limited() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            let reason = meta
                .error_detail
                .clone()
                .or(meta.error_type.clone())
                .unwrap_or_else(|| "no error detail".to_string());

            if meta.code >= 500 && !rate_limited {
                return Err(FetchError::Unavailable {
                    reason: format!("API code {}: {reason}", meta.code),
                });
            }
            return Err(FetchError::Rejected {
                status: if status.is_client_error() {
                    status.as_u16()
                } else {
                    meta.code
                },
                reason,
                rate_limited,
            });
        }

        let checkins: UserCheckinsResponse = serde_json::from_value(envelope.response)
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let events = checkins
            .into_items()
            .into_iter()
            .map(|checkin| CheckinEvent::from_wire(account.clone(), checkin))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        debug!(account = %account, fetched = events.len(), "Fetched Untappd checkins");

        Ok(events)
    }
}

/// Keep error bodies short enough for a log line.
fn snippet(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    match body.char_indices().nth(MAX_CHARS) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
