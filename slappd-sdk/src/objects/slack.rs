//! Slack message payloads.
//!
//! The same [`SlackMessage`] body is accepted by incoming webhooks and by
//! the `chat.postMessage` Web API.

use serde::{Deserialize, Serialize};

/// Display name used for every relayed message.
pub const DEFAULT_USERNAME: &str = "Untappd";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackMessage {
    /// Required by `chat.postMessage`, ignored by most webhooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub text: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl SlackMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            channel: None,
            text: text.into(),
            username: DEFAULT_USERNAME.to_string(),
            icon_url: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_icon(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Whether the message would render anything in the channel.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
            && self
                .attachments
                .iter()
                .all(|a| a.title.trim().is_empty() && a.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
}

/// Response body of `chat.postMessage`.
///
/// The Web API answers HTTP 200 even for failures and reports them via `ok`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatPostMessageResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
