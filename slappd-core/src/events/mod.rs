//! Tick events driving the per-account pollers.
//!
//! # Event Flow
//!
//! 1. `PollScheduler` fires its interval timer
//! 2. `PollScheduler` emits `PollTick` -> one `AccountPoller` per account
//! 3. `AccountPoller` runs fetch -> diff -> notify -> commit for that tick
//!
//! Each account has its own bounded tick channel, so a slow account never
//! holds back ticks for the others.

pub mod channels;
pub mod types;

pub use channels::{POLL_TICK_BUFFER, PollTickReceiver, PollTickSender, poll_tick_channel};
pub use types::PollTick;
