pub mod slack;
pub mod untappd;

/// Base URL used when rendering links back to Untappd pages.
pub const UNTAPPD_WEB_BASE: &str = "https://untappd.com";

/// Icon shown next to check-in messages when a beer has no label.
pub const UNTAPPD_DEFAULT_ICON: &str = "https://untappd.akamaized.net/assets/apple-touch-icon.png";
