//! Untappd v4 API response types.
//!
//! Only the fields the relay renders are modelled; everything else in the
//! payload is ignored by serde.

use compact_str::CompactString;
use serde::{Deserialize, Deserializer, Serialize};

/// Top-level envelope returned by every Untappd endpoint.
///
/// `response` is kept as raw JSON because Untappd answers errors with an
/// empty array there instead of an object.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub meta: Meta,
    #[serde(default)]
    pub response: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub code: u16,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl Meta {
    /// Error type Untappd reports once the hourly request budget is spent.
    pub const RATE_LIMIT_ERROR: &str = "invalid_limit";

    pub fn is_ok(&self) -> bool {
        self.code == 200
    }

    pub fn is_rate_limited(&self) -> bool {
        self.error_type.as_deref() == Some(Self::RATE_LIMIT_ERROR)
    }
}

/// Body of `GET /v4/user/checkins/{username}`.
///
/// Requests with a `limit` nest the items under `checkins`, requests with a
/// `min_id` put them directly under `items`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserCheckinsResponse {
    #[serde(default)]
    pub checkins: Option<CheckinPage>,
    #[serde(default)]
    pub items: Option<Vec<Checkin>>,
}

impl UserCheckinsResponse {
    pub fn into_items(self) -> Vec<Checkin> {
        match (self.checkins, self.items) {
            (Some(page), _) => page.items,
            (None, Some(items)) => items,
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckinPage {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub items: Vec<Checkin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkin {
    pub checkin_id: u64,
    /// RFC 2822 timestamp, e.g. `Sat, 18 Oct 2025 20:15:01 +0000`.
    pub created_at: String,
    #[serde(default)]
    pub checkin_comment: String,
    #[serde(default)]
    pub rating_score: f64,
    pub user: User,
    pub beer: Beer,
    pub brewery: Brewery,
    #[serde(default, deserialize_with = "deserialize_venue")]
    pub venue: Option<Venue>,
    #[serde(default)]
    pub badges: BadgeList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_name: CompactString,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beer {
    pub bid: u64,
    pub beer_name: String,
    #[serde(default)]
    pub beer_slug: String,
    #[serde(default)]
    pub beer_label: Option<String>,
    #[serde(default)]
    pub beer_style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brewery {
    pub brewery_id: u64,
    pub brewery_name: String,
    #[serde(default)]
    pub brewery_slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub venue_id: u64,
    pub venue_name: String,
    #[serde(default)]
    pub venue_slug: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BadgeList {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub items: Vec<Badge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    pub badge_name: String,
    #[serde(default)]
    pub badge_description: String,
    pub badge_image: BadgeImage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeImage {
    pub sm: String,
    pub md: String,
    #[serde(default)]
    pub lg: Option<String>,
}

/// Untappd sends `"venue": []` for check-ins without a location.
fn deserialize_venue<'de, D>(deserializer: D) -> Result<Option<Venue>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum VenueField {
        Venue(Venue),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<VenueField>::deserialize(deserializer)? {
        Some(VenueField::Venue(venue)) => Some(venue),
        Some(VenueField::Other(_)) | None => None,
    })
}
