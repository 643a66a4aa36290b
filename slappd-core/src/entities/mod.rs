//! Domain entities relayed by the engine.
//!
//! These are validated, owned representations of what the Untappd API
//! returns. Conversion from the wire objects in `slappd_sdk` happens here so
//! that every processor downstream of the fetch works with checked data.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use slappd_sdk::objects::untappd;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;

/// Identifier of a check-in. Strictly increasing within an account's stream.
pub type CheckinId = u64;

/// Largest check-in id already relayed for an account, `None` before the
/// first successful poll.
pub type HighWaterMark = Option<CheckinId>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountIdError {
    #[error("account id is empty")]
    Empty,

    #[error("account id {0:?} contains characters not allowed in an Untappd username")]
    InvalidCharacters(String),
}

/// A monitored Untappd username.
///
/// Validated on construction: non-empty and limited to the characters
/// Untappd allows, so it can be placed in a request path as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(CompactString);

impl AccountId {
    pub fn new(raw: &str) -> Result<Self, AccountIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AccountIdError::Empty);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(AccountIdError::InvalidCharacters(trimmed.to_string()));
        }
        Ok(Self(CompactString::new(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0.into_string()
    }
}

/// One check-in of a monitored account.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckinEvent {
    pub id: CheckinId,
    pub account: AccountId,
    pub occurred_at: OffsetDateTime,
    pub summary: CheckinSummary,
}

/// Everything needed to describe a check-in in a chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckinSummary {
    pub user_name: CompactString,
    pub display_name: String,
    pub beer: BeerRef,
    pub brewery: BreweryRef,
    pub venue: Option<VenueRef>,
    /// `None` when the check-in was not rated.
    pub rating: Option<f64>,
    pub comment: Option<String>,
    pub badges: Vec<Badge>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeerRef {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub label_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreweryRef {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueRef {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

/// A badge earned together with a check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub name: String,
    /// May contain HTML markup.
    pub description: String,
    pub image_small: String,
    pub image_medium: String,
}

#[derive(Debug, Error)]
#[error("checkin {checkin_id} has an invalid created_at {created_at:?}: {source}")]
pub struct InvalidTimestamp {
    pub checkin_id: CheckinId,
    pub created_at: String,
    #[source]
    pub source: time::error::Parse,
}

impl CheckinEvent {
    /// Convert an Untappd check-in into a domain event for `account`.
    pub fn from_wire(account: AccountId, checkin: untappd::Checkin) -> Result<Self, InvalidTimestamp> {
        let occurred_at = OffsetDateTime::parse(&checkin.created_at, &Rfc2822).map_err(|source| {
            InvalidTimestamp {
                checkin_id: checkin.checkin_id,
                created_at: checkin.created_at.clone(),
                source,
            }
        })?;

        let user = checkin.user;
        let display_name = match format!("{} {}", user.first_name.trim(), user.last_name.trim()).trim() {
            "" => user.user_name.to_string(),
            name => name.to_string(),
        };

        let comment = Some(checkin.checkin_comment.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let rating = Some(checkin.rating_score).filter(|r| *r > 0.0);

        let summary = CheckinSummary {
            user_name: user.user_name,
            display_name,
            beer: BeerRef {
                id: checkin.beer.bid,
                name: checkin.beer.beer_name,
                slug: checkin.beer.beer_slug,
                label_url: checkin.beer.beer_label.filter(|l| !l.is_empty()),
            },
            brewery: BreweryRef {
                id: checkin.brewery.brewery_id,
                name: checkin.brewery.brewery_name,
                slug: checkin.brewery.brewery_slug,
            },
            venue: checkin.venue.map(|v| VenueRef {
                id: v.venue_id,
                name: v.venue_name,
                slug: v.venue_slug,
            }),
            rating,
            comment,
            badges: checkin
                .badges
                .items
                .into_iter()
                .map(|b| Badge {
                    name: b.badge_name,
                    description: b.badge_description,
                    image_small: b.badge_image.sm,
                    image_medium: b.badge_image.md,
                })
                .collect(),
        };

        Ok(Self {
            id: checkin.checkin_id,
            account,
            occurred_at,
            summary,
        })
    }
}
