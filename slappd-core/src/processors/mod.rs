//! Processors of the relay pipeline.
//!
//! - `UntappdSource`: Fetches recent check-ins of one account
//! - `SlackNotifier`: Delivers one check-in to Slack
//! - `PollScheduler`: Emits `PollTick` to one `AccountPoller` per account
//! - `AccountPoller`: Receives `PollTick`, runs fetch -> diff -> notify -> commit

pub mod checkin_source;
pub mod notifier;
pub mod poll_scheduler;

pub use checkin_source::{CheckinSource, FetchError, FetchWindow, UntappdSource, UntappdSourceConfig};
pub use notifier::{DeliveryError, Notifier, SlackDestination, SlackNotifier};
pub use poll_scheduler::{
    AccountPoller, FirstRunPolicy, PollError, PollOutcome, PollScheduler, PollSchedulerConfig,
};
