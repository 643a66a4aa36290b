//! TOML file configuration structures.
//!
//! These structs directly map to the `slappd.toml` file format. Every
//! section is optional so a deployment can be configured from the
//! environment alone.

use serde::{Deserialize, Serialize};
use slappd_core::processors::FirstRunPolicy;
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub untappd: UntappdConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// Untappd API section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UntappdConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Optional user access token; raises the rate limit when set.
    pub access_token: Option<String>,
    /// Untappd user names to follow.
    #[serde(default)]
    pub users: Vec<String>,
    /// API base URL, `https://api.untappd.com/v4` when unset.
    pub api_base: Option<String>,
    /// Check-ins requested per poll (1 to 50).
    pub page_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Slack section. Either `webhook_url`, or `token` with `channel`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
    /// Bot token for `chat.postMessage`.
    pub token: Option<String>,
    pub channel: Option<String>,
    /// Web API base URL, `https://slack.com/api` when unset.
    pub api_base: Option<String>,
    /// Display name of the posting bot.
    pub username: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Polling section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub first_run: FirstRunPolicy,
}

/// Mark persistence section. Marks live in memory only without a path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    pub path: Option<PathBuf>,
}
