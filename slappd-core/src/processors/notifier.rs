//! Notifier: delivers rendered check-ins to Slack.
//!
//! The notifier is responsible for:
//! - Rendering one `CheckinEvent` into its Slack messages
//! - POSTing them, in order, to the configured destination
//! - Classifying failures as unavailable (retry later) or rejected
//!
//! It never retries on its own; a failed event is picked up again by the
//! next poll of its account.

use crate::entities::CheckinEvent;
use crate::message::MessageRenderer;
use async_trait::async_trait;
use slappd_sdk::objects::slack::{ChatPostMessageResponse, SlackMessage};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors that can occur during message delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Network failure, timeout or server-side error.
    #[error("destination unavailable: {reason}")]
    Unavailable { reason: String },

    /// The destination refused the message.
    #[error("destination rejected message (status {status:?}): {reason}")]
    Rejected { status: Option<u16>, reason: String },
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            DeliveryError::Rejected {
                status: None,
                reason: e.to_string(),
            }
        } else {
            DeliveryError::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

/// Trait for event notifiers.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event. `Ok` means every message for it was accepted.
    async fn send(&self, event: &CheckinEvent) -> Result<(), DeliveryError>;
}

/// Where Slack messages are posted.
#[derive(Debug, Clone)]
pub enum SlackDestination {
    /// Incoming webhook, e.g. `https://hooks.slack.com/services/T000/B000/XXX`.
    Webhook { url: Url },
    /// `chat.postMessage` Web API with a bot token.
    ChatApi {
        api_base: Url,
        token: String,
        channel: String,
    },
}

impl SlackDestination {
    pub const DEFAULT_API_BASE: &str = "https://slack.com/api";
    pub const DEFAULT_WEBHOOK_BASE: &str = "https://hooks.slack.com/services";
}

/// Slack notifier.
pub struct SlackNotifier {
    destination: SlackDestination,
    renderer: MessageRenderer,
    http_client: reqwest::Client,
}

impl SlackNotifier {
    /// Create a new SlackNotifier.
    ///
    /// # Arguments
    ///
    /// * `destination` - Webhook or Web API target
    /// * `renderer` - Formats events into messages
    /// * `timeout` - Per-request timeout
    pub fn new(
        destination: SlackDestination,
        renderer: MessageRenderer,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            destination,
            renderer,
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Post a single message.
    async fn post(&self, message: &SlackMessage) -> Result<(), DeliveryError> {
        if message.is_empty() {
            return Err(DeliveryError::Rejected {
                status: None,
                reason: "message is empty after formatting".to_string(),
            });
        }

        match &self.destination {
            SlackDestination::Webhook { url } => {
                let response = self.http_client.post(url.clone()).json(message).send().await?;
                check_status(response).await?;
                Ok(())
            }
            SlackDestination::ChatApi {
                api_base,
                token,
                channel,
            } => {
                let mut message = message.clone();
                message.channel = Some(channel.clone());

                let url = format!(
                    "{}/chat.postMessage",
                    api_base.as_str().trim_end_matches('/')
                );
                let response = self
                    .http_client
                    .post(url)
                    .bearer_auth(token)
                    .json(&message)
                    .send()
                    .await?;
                let response = check_status(response).await?;

                let body: ChatPostMessageResponse =
                    response.json().await.map_err(|e| DeliveryError::Rejected {
                        status: None,
                        reason: format!("unreadable chat.postMessage response: {e}"),
                    })?;
                if body.ok {
                    Ok(())
                } else {
                    Err(DeliveryError::Rejected {
                        status: Some(200),
                        reason: body.error.unwrap_or_else(|| "unknown error".to_string()),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, event: &CheckinEvent) -> Result<(), DeliveryError> {
        let messages = self.renderer.render(event);
        for message in &messages {
            self.post(message).await?;
        }

        debug!(
            account = %event.account,
            checkin_id = event.id,
            messages = messages.len(),
            "Delivered checkin to Slack"
        );
        Ok(())
    }
}

/// Map a non-2xx response to a delivery error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(DeliveryError::Unavailable {
            reason: format!("HTTP {status}: {body}"),
        })
    } else {
        Err(DeliveryError::Rejected {
            status: Some(status.as_u16()),
            reason: body,
        })
    }
}
