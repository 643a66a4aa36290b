/// Event emitted by the `PollScheduler` on every interval tick.
///
/// Carries only a sequence number; the receiving poller reads everything
/// else (mark, upstream batch) fresh when it handles the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTick {
    /// Monotonic tick counter, starting at 1 for the first scheduled tick.
    pub sequence: u64,
}
