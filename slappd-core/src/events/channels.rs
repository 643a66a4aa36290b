use super::types::PollTick;
use tokio::sync::mpsc;

/// Buffer size of a per-account tick channel.
///
/// With one slot, a busy poller has at most one tick queued behind the cycle
/// it is running; the scheduler drops any further ticks for that account.
pub const POLL_TICK_BUFFER: usize = 1;

/// Sender handle for PollTick events.
pub type PollTickSender = mpsc::Sender<PollTick>;
/// Receiver handle for PollTick events.
pub type PollTickReceiver = mpsc::Receiver<PollTick>;

/// Create the tick channel for one account.
pub fn poll_tick_channel() -> (PollTickSender, PollTickReceiver) {
    mpsc::channel(POLL_TICK_BUFFER)
}
