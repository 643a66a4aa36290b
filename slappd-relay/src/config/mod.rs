//! Configuration module for the relay.
//!
//! Handles loading configuration from the TOML file, CLI arguments and the
//! environment, and converting it into the runtime settings of the core
//! processors.

pub mod file;

use crate::config::file::FileConfig;
use slappd_core::entities::AccountId;
use slappd_core::processors::checkin_source::MAX_PAGE_SIZE;
use slappd_core::processors::{PollSchedulerConfig, SlackDestination, UntappdSourceConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Channel used with a bot token when none is configured.
pub const DEFAULT_SLACK_CHANNEL: &str = "#bot-testing";
pub const DEFAULT_SLACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Fully validated settings for one relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub accounts: Vec<AccountId>,
    pub untappd: UntappdSourceConfig,
    pub slack: SlackDestination,
    pub slack_username: String,
    pub slack_timeout: Duration,
    pub scheduler: PollSchedulerConfig,
    /// Mark file; marks are kept in memory only when `None`.
    pub state_path: Option<PathBuf>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    interval_override: Option<u64>,
}

impl ConfigLoader {
    /// Create a new config loader.
    ///
    /// `interval_override` is the poll interval in seconds given on the
    /// command line (or `CHECK_SECONDS`); it wins over the file.
    pub fn new(config_path: impl AsRef<Path>, interval_override: Option<u64>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            interval_override,
        }
    }

    /// Load the configuration using the process environment.
    pub fn load(&self) -> Result<RelayConfig, ConfigError> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file, if it exists
    /// 2. Apply environment and CLI overrides
    /// 3. Validate the result and build the runtime configuration
    pub fn load_with_env<F>(&self, env: F) -> Result<RelayConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file_config = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %self.config_path.display(),
                    "Config file not found, using environment only"
                );
                FileConfig::default()
            }
            Err(e) => return Err(e.into()),
        };

        apply_env_overrides(&mut file_config, env)?;
        if let Some(seconds) = self.interval_override {
            file_config.poll.interval_seconds = Some(seconds);
        }

        build_relay_config(file_config)
    }
}

/// Overlay the deployment environment variables on the file values.
///
/// Empty variables count as unset.
fn apply_env_overrides<F>(config: &mut FileConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(id) = var("UNTAPPD_ID") {
        config.untappd.client_id = id;
    }
    if let Some(secret) = var("UNTAPPD_SECRET") {
        config.untappd.client_secret = secret;
    }
    if let Some(token) = var("UNTAPPD_TOKEN") {
        config.untappd.access_token = Some(token);
    }
    if let Some(users) = var("UNTAPPD_USERS") {
        config.untappd.users = users
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(timeout) = var("UNTAPPD_TIMEOUT") {
        let seconds = timeout.parse().map_err(|_| {
            ConfigError::ValidationError(format!("UNTAPPD_TIMEOUT is not a number: {timeout}"))
        })?;
        config.untappd.timeout_seconds = Some(seconds);
    }
    if let Some(token) = var("SLACK_TOKEN") {
        config.slack.token = Some(token);
    }
    if let Some(url) = var("SLACK_WEBHOOK_URL") {
        config.slack.webhook_url = Some(url);
    }
    if let Some(channel) = var("SLACK_CHANNEL") {
        config.slack.channel = Some(channel);
    }

    Ok(())
}

fn build_relay_config(config: FileConfig) -> Result<RelayConfig, ConfigError> {
    let FileConfig {
        untappd,
        slack,
        poll,
        state,
    } = config;

    // -- Accounts ------------------------------------------------------------
    let mut accounts = Vec::with_capacity(untappd.users.len());
    for user in &untappd.users {
        let account = AccountId::new(user)
            .map_err(|e| ConfigError::ValidationError(format!("untappd user {user:?}: {e}")))?;
        if !accounts.contains(&account) {
            accounts.push(account);
        }
    }
    if accounts.is_empty() {
        return Err(ConfigError::ValidationError(
            "at least one untappd user must be configured".to_string(),
        ));
    }

    // -- Untappd -------------------------------------------------------------
    let client_id = non_empty("untappd.client_id", untappd.client_id)?;
    let client_secret = non_empty("untappd.client_secret", untappd.client_secret)?;

    let page_size = untappd
        .page_size
        .unwrap_or(UntappdSourceConfig::DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ConfigError::ValidationError(format!(
            "untappd.page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }

    let untappd_config = UntappdSourceConfig {
        api_base: parse_url(
            "untappd.api_base",
            untappd
                .api_base
                .as_deref()
                .unwrap_or(UntappdSourceConfig::DEFAULT_API_BASE),
        )?,
        client_id,
        client_secret,
        access_token: untappd.access_token.filter(|t| !t.trim().is_empty()),
        page_size,
        timeout: timeout(
            "untappd.timeout_seconds",
            untappd.timeout_seconds,
            UntappdSourceConfig::DEFAULT_TIMEOUT,
        )?,
    };

    // -- Slack ---------------------------------------------------------------
    let destination = match (slack.webhook_url, slack.token) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::ValidationError(
                "set either slack.webhook_url or slack.token, not both".to_string(),
            ));
        }
        (Some(url), None) => SlackDestination::Webhook {
            url: parse_url("slack.webhook_url", &url)?,
        },
        (None, Some(token)) => SlackDestination::ChatApi {
            api_base: parse_url(
                "slack.api_base",
                slack
                    .api_base
                    .as_deref()
                    .unwrap_or(SlackDestination::DEFAULT_API_BASE),
            )?,
            token: non_empty("slack.token", token)?,
            channel: slack
                .channel
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SLACK_CHANNEL.to_string()),
        },
        (None, None) => {
            return Err(ConfigError::ValidationError(
                "a slack.webhook_url or slack.token must be configured".to_string(),
            ));
        }
    };

    // -- Poll ----------------------------------------------------------------
    let interval_seconds = poll
        .interval_seconds
        .unwrap_or(PollSchedulerConfig::DEFAULT_INTERVAL.as_secs());
    if interval_seconds == 0 {
        return Err(ConfigError::ValidationError(
            "poll interval must be at least 1 second".to_string(),
        ));
    }

    Ok(RelayConfig {
        accounts,
        untappd: untappd_config,
        slack: destination,
        slack_username: slack
            .username
            .unwrap_or_else(|| slappd_core::message::DEFAULT_USERNAME.to_string()),
        slack_timeout: timeout(
            "slack.timeout_seconds",
            slack.timeout_seconds,
            DEFAULT_SLACK_TIMEOUT,
        )?,
        scheduler: PollSchedulerConfig {
            interval: Duration::from_secs(interval_seconds),
            first_run: poll.first_run,
        },
        state_path: state.path,
    })
}

fn non_empty(field: &str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::ValidationError(format!("{field} must not be empty")))
    } else {
        Ok(value)
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("{field} is not a valid URL: {e}")))
}

fn timeout(field: &str, seconds: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match seconds {
        None => Ok(default),
        Some(0) => Err(ConfigError::ValidationError(format!(
            "{field} must be at least 1 second"
        ))),
        Some(s) => Ok(Duration::from_secs(s)),
    }
}
