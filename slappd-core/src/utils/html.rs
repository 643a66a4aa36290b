use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*?>").expect("static HTML tag pattern is valid"));

/// Remove HTML tags, as found in Untappd badge descriptions.
pub fn strip_html(text: &str) -> Cow<'_, str> {
    HTML_TAG.replace_all(text, "")
}

/// Escape the three characters Slack treats as control characters in
/// message text.
pub fn escape_mrkdwn(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    )
}
