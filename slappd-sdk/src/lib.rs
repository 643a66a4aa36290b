//! Wire objects shared by the slappd relay.
//!
//! `objects::untappd` mirrors the Untappd v4 API responses that the relay
//! consumes, `objects::slack` the payloads it sends to Slack.

#![forbid(unsafe_code)]

pub mod objects;
