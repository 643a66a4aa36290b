//! Rendering of check-ins into Slack messages.
//!
//! A check-in produces one message describing the beer, followed by one
//! message per badge earned with it.

use crate::entities::{Badge, CheckinEvent};
use crate::utils::html::{escape_mrkdwn, strip_html};
use slappd_sdk::objects::slack::{Attachment, SlackMessage};
use slappd_sdk::objects::UNTAPPD_DEFAULT_ICON;
use std::fmt::Write;

pub use slappd_sdk::objects::UNTAPPD_WEB_BASE;
pub use slappd_sdk::objects::slack::DEFAULT_USERNAME;

/// Renders events with links pointing at `web_base`.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    web_base: String,
    username: String,
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new(UNTAPPD_WEB_BASE, DEFAULT_USERNAME)
    }
}

impl MessageRenderer {
    pub fn new(web_base: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            web_base: web_base.into().trim_end_matches('/').to_string(),
            username: username.into(),
        }
    }

    /// All messages for one event, in the order they must be sent.
    pub fn render(&self, event: &CheckinEvent) -> Vec<SlackMessage> {
        std::iter::once(self.checkin_message(event))
            .chain(
                event
                    .summary
                    .badges
                    .iter()
                    .map(|badge| self.badge_message(event, badge)),
            )
            .collect()
    }

    pub fn checkin_message(&self, event: &CheckinEvent) -> SlackMessage {
        let base = &self.web_base;
        let summary = &event.summary;
        let beer = &summary.beer;
        let brewery = &summary.brewery;
        let beer_slug = if beer.slug.is_empty() {
            &brewery.slug
        } else {
            &beer.slug
        };

        let mut text = format!(
            ":beer: *<{base}/user/{user}|{name}>* is drinking a *<{base}/b/{beer_slug}/{bid}|{beer}>* by *<{base}/w/{brewery_slug}/{brewery_id}|{brewery}>*",
            user = summary.user_name,
            name = escape_mrkdwn(&summary.display_name),
            bid = beer.id,
            beer = escape_mrkdwn(&beer.name),
            brewery_slug = brewery.slug,
            brewery_id = brewery.id,
            brewery = escape_mrkdwn(&brewery.name),
        );

        // Writing into a String cannot fail.
        if let Some(venue) = &summary.venue {
            let _ = write!(
                text,
                " at *<{base}/v/{slug}/{id}|{name}>*",
                slug = venue.slug,
                id = venue.id,
                name = escape_mrkdwn(&venue.name),
            );
        }
        if let Some(rating) = summary.rating {
            let _ = write!(text, " ({rating}/5)");
        }
        if let Some(comment) = &summary.comment {
            let _ = write!(text, "\n>\"{}\"", escape_mrkdwn(comment));
        }

        let icon = beer.label_url.as_deref().unwrap_or(UNTAPPD_DEFAULT_ICON);
        self.base_message(text).with_icon(icon)
    }

    pub fn badge_message(&self, event: &CheckinEvent, badge: &Badge) -> SlackMessage {
        let title = format!(
            "{} earned the {} badge!",
            event.summary.user_name, badge.name
        );
        self.base_message(String::new())
            .with_icon(badge.image_small.clone())
            .with_attachment(Attachment {
                title,
                text: strip_html(&badge.description).into_owned(),
                thumb_url: Some(badge.image_medium.clone()),
            })
    }

    fn base_message(&self, text: String) -> SlackMessage {
        let mut message = SlackMessage::text(text);
        message.username = self.username.clone();
        message
    }
}
