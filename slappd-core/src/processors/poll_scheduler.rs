//! PollScheduler and AccountPoller processors.
//!
//! The PollScheduler is responsible for:
//! - Spawning one `AccountPoller` task per monitored account
//! - Driving a single interval timer and fanning out `PollTick` events
//! - Dropping ticks for accounts whose previous cycle is still running
//!
//! The AccountPoller is responsible for:
//! - Receiving `PollTick` events via the `Processor` trait
//! - Running fetch -> diff -> notify -> commit for its account
//! - Committing only marks of events that were actually delivered
//! - Backing off after upstream rate-limit rejections
//!
//! An account's state moves `IDLE -> FETCHING -> DIFFING -> NOTIFYING ->
//! COMMITTING -> IDLE`; any failure returns it to idle with the mark at the
//! last delivered event, so the rest is retried on the next tick.

use crate::diff;
use crate::entities::{AccountId, CheckinId, HighWaterMark};
use crate::events::{PollTick, PollTickReceiver, PollTickSender, poll_tick_channel};
use crate::processors::checkin_source::{CheckinSource, FetchError, FetchWindow};
use crate::processors::notifier::{DeliveryError, Notifier};
use crate::store::{MarkStore, StoreError};
use crate::utils::backoff::RateLimitBackoff;
use kanau::processor::Processor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Public data types
// ---------------------------------------------------------------------------

/// What to do for an account that has no high-water mark yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstRunPolicy {
    /// Record the newest check-in as the mark without relaying anything,
    /// so only activity after startup is announced.
    #[default]
    Baseline,
    /// Relay every check-in of the first fetched page.
    DeliverAll,
}

/// Configuration for the PollScheduler.
#[derive(Debug, Clone)]
pub struct PollSchedulerConfig {
    pub interval: Duration,
    pub first_run: FirstRunPolicy,
}

impl PollSchedulerConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
}

impl Default for PollSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            first_run: FirstRunPolicy::default(),
        }
    }
}

/// Result of one successful poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing new upstream.
    Idle { mark: HighWaterMark },
    /// First poll of the account recorded a mark without relaying.
    Baseline { mark: CheckinId },
    /// `delivered` events were relayed and `mark` committed.
    Delivered { delivered: usize, mark: CheckinId },
}

/// Errors that can end a poll cycle early.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Delivery of `checkin_id` failed after `delivered` earlier events of
    /// the batch went out.
    #[error("delivery of checkin {checkin_id} failed after {delivered} delivered: {source}")]
    Delivery {
        checkin_id: CheckinId,
        delivered: usize,
        #[source]
        source: DeliveryError,
    },

    #[error("mark store failed: {0}")]
    Store(#[from] StoreError),
}

impl PollError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PollError::Fetch(e) if e.is_rate_limited())
    }
}

// ---------------------------------------------------------------------------
// AccountPoller
// ---------------------------------------------------------------------------

/// Runs poll cycles for a single account.
///
/// Cycles are strictly sequential: the poller handles one tick at a time,
/// which makes it the only writer of its account's mark.
pub struct AccountPoller<S, N, M> {
    account: AccountId,
    source: Arc<S>,
    notifier: Arc<N>,
    marks: Arc<M>,
    first_run: FirstRunPolicy,
}

impl<S, N, M> AccountPoller<S, N, M>
where
    S: CheckinSource + 'static,
    N: Notifier + 'static,
    M: MarkStore + 'static,
{
    pub fn new(
        account: AccountId,
        source: Arc<S>,
        notifier: Arc<N>,
        marks: Arc<M>,
        first_run: FirstRunPolicy,
    ) -> Self {
        Self {
            account,
            source,
            notifier,
            marks,
            first_run,
        }
    }

    /// Run the AccountPoller until shutdown is signaled or the tick channel
    /// closes.
    ///
    /// A shutdown that arrives mid-cycle abandons the cycle at its current
    /// await point. Marks are only committed after the events they cover
    /// were delivered, so an abandoned cycle is retried after restart.
    pub async fn run(self, mut tick_rx: PollTickReceiver, mut shutdown_rx: watch::Receiver<bool>) {
        let account = self.account.clone();
        let mut backoff = RateLimitBackoff::default();

        info!(account = %account, "AccountPoller started");

        loop {
            tokio::select! {
                biased;

                // Check for shutdown
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(account = %account, "AccountPoller shutting down");
                        break;
                    }
                }

                // Receive PollTick events
                Some(tick) = tick_rx.recv() => {
                    if let Some(remaining) = backoff.remaining(Instant::now()) {
                        debug!(
                            account = %account,
                            sequence = tick.sequence,
                            remaining_secs = remaining.as_secs(),
                            "Skipping tick, rate-limit backoff active"
                        );
                        continue;
                    }

                    let result = tokio::select! {
                        biased;

                        // Resolves on shutdown or when the sender is gone.
                        _ = shutdown_rx.wait_for(|stop| *stop) => {
                            info!(
                                account = %account,
                                sequence = tick.sequence,
                                "Abandoning in-flight poll for shutdown"
                            );
                            break;
                        }

                        result = self.process(tick) => result,
                    };

                    match result {
                        Ok(outcome) => {
                            backoff.reset();
                            log_outcome(&account, tick, outcome);
                        }
                        Err(e) if e.is_rate_limited() => {
                            let delay = backoff.record(Instant::now());
                            warn!(
                                account = %account,
                                sequence = tick.sequence,
                                error = %e,
                                consecutive = backoff.failures(),
                                backoff_secs = delay.as_secs(),
                                "Upstream rate limit hit, backing off"
                            );
                        }
                        Err(e) => {
                            error!(
                                account = %account,
                                sequence = tick.sequence,
                                error = %e,
                                "Poll failed, will retry on next tick"
                            );
                        }
                    }
                }

                else => {
                    info!(account = %account, "PollTick channel closed");
                    break;
                }
            }
        }

        info!(account = %account, "AccountPoller shutdown complete");
    }

    /// Commit `mark` for the account, logging instead of failing.
    ///
    /// Used on the delivery-failure path, where the delivery error is the
    /// one reported to the caller.
    async fn commit_partial(&self, mark: CheckinId) {
        if let Err(e) = self.marks.commit(&self.account, mark).await {
            error!(
                account = %self.account,
                mark,
                error = %e,
                "Failed to commit mark of delivered checkins"
            );
        }
    }
}

fn log_outcome(account: &AccountId, tick: PollTick, outcome: PollOutcome) {
    match outcome {
        PollOutcome::Idle { mark } => {
            debug!(account = %account, sequence = tick.sequence, ?mark, "No new checkins");
        }
        PollOutcome::Baseline { mark } => {
            info!(account = %account, mark, "Recorded baseline mark, nothing relayed");
        }
        PollOutcome::Delivered { delivered, mark } => {
            info!(account = %account, delivered, mark, "Relayed new checkins");
        }
    }
}

// ---------------------------------------------------------------------------
// Processor trait implementation
// ---------------------------------------------------------------------------

impl<S, N, M> Processor<PollTick> for AccountPoller<S, N, M>
where
    S: CheckinSource + 'static,
    N: Notifier + 'static,
    M: MarkStore + 'static,
{
    type Output = PollOutcome;
    type Error = PollError;

    async fn process(&self, tick: PollTick) -> Result<PollOutcome, PollError> {
        let previous = self.marks.get(&self.account).await?;
        let baseline = previous.is_none() && self.first_run == FirstRunPolicy::Baseline;

        let window = if baseline {
            FetchWindow::latest_only()
        } else {
            FetchWindow::after(previous)
        };

        debug!(
            account = %self.account,
            sequence = tick.sequence,
            ?previous,
            "Fetching checkins"
        );
        let batch = self.source.fetch(&self.account, window).await?;

        let diff = diff::compute(previous, &batch);

        if baseline {
            return match diff.new_mark {
                Some(mark) => {
                    self.marks.commit(&self.account, mark).await?;
                    Ok(PollOutcome::Baseline { mark })
                }
                None => Ok(PollOutcome::Idle { mark: None }),
            };
        }

        let Some(new_mark) = diff.new_mark.filter(|_| !diff.is_empty()) else {
            // Unchanged commit; lets a durable store retry an earlier failed write.
            if let Some(mark) = previous {
                self.marks.commit(&self.account, mark).await?;
            }
            return Ok(PollOutcome::Idle { mark: previous });
        };

        let mut last_delivered: Option<CheckinId> = None;
        for (delivered, event) in diff.new_events.iter().enumerate() {
            if let Err(source) = self.notifier.send(event).await {
                if let Some(mark) = last_delivered {
                    self.commit_partial(mark).await;
                }
                return Err(PollError::Delivery {
                    checkin_id: event.id,
                    delivered,
                    source,
                });
            }
            last_delivered = Some(event.id);
        }

        let mark = self.marks.commit(&self.account, new_mark).await?;
        Ok(PollOutcome::Delivered {
            delivered: diff.new_events.len(),
            mark,
        })
    }
}

// ---------------------------------------------------------------------------
// PollScheduler
// ---------------------------------------------------------------------------

/// Drives all account pollers from one interval timer.
///
/// The mark store is injected here and shared with every poller; each
/// poller only ever writes its own account's mark.
pub struct PollScheduler<S, N, M> {
    accounts: Vec<AccountId>,
    source: Arc<S>,
    notifier: Arc<N>,
    marks: Arc<M>,
    config: PollSchedulerConfig,
}

impl<S, N, M> PollScheduler<S, N, M>
where
    S: CheckinSource + 'static,
    N: Notifier + 'static,
    M: MarkStore + 'static,
{
    /// Create a new PollScheduler. Duplicate accounts are polled once.
    pub fn new(
        accounts: Vec<AccountId>,
        source: Arc<S>,
        notifier: Arc<N>,
        marks: Arc<M>,
        config: PollSchedulerConfig,
    ) -> Self {
        let mut unique = Vec::with_capacity(accounts.len());
        for account in accounts {
            if !unique.contains(&account) {
                unique.push(account);
            }
        }

        Self {
            accounts: unique,
            source,
            notifier,
            marks,
            config,
        }
    }

    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    fn poller(&self, account: AccountId) -> AccountPoller<S, N, M> {
        AccountPoller::new(
            account,
            Arc::clone(&self.source),
            Arc::clone(&self.notifier),
            Arc::clone(&self.marks),
            self.config.first_run,
        )
    }

    /// Run one poll cycle for every account concurrently and wait for all
    /// of them. Results are in account order.
    pub async fn run_once(&self) -> Vec<(AccountId, Result<PollOutcome, PollError>)> {
        let mut cycles = JoinSet::new();
        for (index, account) in self.accounts.iter().enumerate() {
            let poller = self.poller(account.clone());
            cycles.spawn(async move {
                let result = poller.process(PollTick { sequence: 0 }).await;
                (index, poller.account, result)
            });
        }

        let mut results = Vec::with_capacity(self.accounts.len());
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Poll task failed"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        results
            .into_iter()
            .map(|(_, account, result)| (account, result))
            .collect()
    }

    /// Run the PollScheduler until shutdown is signaled.
    ///
    /// This method:
    /// 1. Spawns one AccountPoller task per account
    /// 2. Emits a `PollTick` to every poller on each interval tick, the
    ///    first one immediately
    /// 3. Skips the tick for pollers that still have one queued
    /// 4. On shutdown, closes the tick channels and waits for the pollers
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        // -- Spawn pollers ---------------------------------------------------
        let mut pollers = JoinSet::new();
        let mut tick_senders: Vec<(AccountId, PollTickSender)> =
            Vec::with_capacity(self.accounts.len());

        for account in &self.accounts {
            let (tick_tx, tick_rx) = poll_tick_channel();
            let poller = self.poller(account.clone());
            pollers.spawn(poller.run(tick_rx, shutdown_rx.clone()));
            tick_senders.push((account.clone(), tick_tx));
        }

        info!(
            accounts = tick_senders.len(),
            interval_secs = self.config.interval.as_secs(),
            first_run = ?self.config.first_run,
            "PollScheduler started"
        );

        // -- Tick loop -------------------------------------------------------
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0u64;

        loop {
            tokio::select! {
                biased;

                // Shutdown has highest priority.
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("PollScheduler received shutdown signal");
                        break;
                    }
                }

                _ = interval.tick() => {
                    sequence += 1;
                    let tick = PollTick { sequence };
                    for (account, tick_tx) in &tick_senders {
                        match tick_tx.try_send(tick) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                debug!(
                                    account = %account,
                                    sequence,
                                    "Account still busy, skipping tick"
                                );
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!(
                                    account = %account,
                                    sequence,
                                    "AccountPoller stopped, tick dropped"
                                );
                            }
                        }
                    }
                }
            }
        }

        // -- Cleanup ---------------------------------------------------------
        drop(tick_senders);
        while let Some(joined) = pollers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "AccountPoller task failed");
            }
        }

        info!("PollScheduler shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::CheckinEvent;
    use crate::entities::fixtures::event;
    use crate::store::{FileMarkStore, MemoryMarkStore};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream stand-in returning fixed data per account, newest first.
    #[derive(Default)]
    struct FakeSource {
        streams: Mutex<HashMap<AccountId, Vec<CheckinEvent>>>,
        failing: Mutex<HashMap<AccountId, bool>>,
        windows: Mutex<Vec<FetchWindow>>,
    }

    impl FakeSource {
        fn with_ids(account: &str, ids: &[u64]) -> Self {
            let source = Self::default();
            source.set_ids(account, ids);
            source
        }

        fn set_ids(&self, account: &str, ids: &[u64]) {
            let mut events: Vec<_> = ids.iter().map(|id| event(account, *id)).collect();
            events.sort_by_key(|e| std::cmp::Reverse(e.id));
            self.streams
                .lock()
                .unwrap()
                .insert(AccountId::new(account).unwrap(), events);
        }

        /// Make every fetch for `account` fail, rate-limited or unavailable.
        fn fail(&self, account: &str, rate_limited: bool) {
            self.failing
                .lock()
                .unwrap()
                .insert(AccountId::new(account).unwrap(), rate_limited);
        }
    }

    #[async_trait::async_trait]
    impl CheckinSource for FakeSource {
        async fn fetch(
            &self,
            account: &AccountId,
            window: FetchWindow,
        ) -> Result<Vec<CheckinEvent>, FetchError> {
            self.windows.lock().unwrap().push(window);
            if let Some(rate_limited) = self.failing.lock().unwrap().get(account) {
                return Err(if *rate_limited {
                    FetchError::Rejected {
                        status: 429,
                        reason: "invalid_limit".to_string(),
                        rate_limited: true,
                    }
                } else {
                    FetchError::Unavailable {
                        reason: "connection refused".to_string(),
                    }
                });
            }
            let events = self
                .streams
                .lock()
                .unwrap()
                .get(account)
                .cloned()
                .unwrap_or_default();
            let limit = window.limit.unwrap_or(25) as usize;
            Ok(events.into_iter().take(limit).collect())
        }
    }

    /// Records delivered ids; fails on the ids in `fail_on`.
    #[derive(Default)]
    struct FakeNotifier {
        delivered: Mutex<Vec<(AccountId, CheckinId)>>,
        fail_on: Mutex<HashSet<CheckinId>>,
    }

    impl FakeNotifier {
        fn failing_on(ids: &[CheckinId]) -> Self {
            let notifier = Self::default();
            notifier.fail_on.lock().unwrap().extend(ids.iter().copied());
            notifier
        }

        fn recover(&self) {
            self.fail_on.lock().unwrap().clear();
        }

        fn delivered_ids(&self) -> Vec<CheckinId> {
            self.delivered.lock().unwrap().iter().map(|(_, id)| *id).collect()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, event: &CheckinEvent) -> Result<(), DeliveryError> {
            if self.fail_on.lock().unwrap().contains(&event.id) {
                return Err(DeliveryError::Unavailable {
                    reason: "timeout".to_string(),
                });
            }
            self.delivered
                .lock()
                .unwrap()
                .push((event.account.clone(), event.id));
            Ok(())
        }
    }

    fn account(name: &str) -> AccountId {
        AccountId::new(name).unwrap()
    }

    fn poller(
        source: &Arc<FakeSource>,
        notifier: &Arc<FakeNotifier>,
        marks: &Arc<MemoryMarkStore>,
        first_run: FirstRunPolicy,
    ) -> AccountPoller<FakeSource, FakeNotifier, MemoryMarkStore> {
        AccountPoller::new(
            account("hopsy"),
            Arc::clone(source),
            Arc::clone(notifier),
            Arc::clone(marks),
            first_run,
        )
    }

    const TICK: PollTick = PollTick { sequence: 1 };

    #[tokio::test]
    async fn test_delivers_new_events_in_order_and_commits() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101, 102, 103, 104]));
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());
        marks.commit(&account("hopsy"), 102).await.unwrap();

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::Baseline);
        let outcome = poller.process(TICK).await.unwrap();

        assert_eq!(outcome, PollOutcome::Delivered { delivered: 2, mark: 104 });
        assert_eq!(notifier.delivered_ids(), vec![103, 104]);
        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), Some(104));
        assert_eq!(
            source.windows.lock().unwrap()[0],
            FetchWindow::after(Some(102))
        );
    }

    #[tokio::test]
    async fn test_second_tick_on_same_data_is_idle() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101, 102, 103]));
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::DeliverAll);
        poller.process(TICK).await.unwrap();
        let outcome = poller.process(TICK).await.unwrap();

        assert_eq!(outcome, PollOutcome::Idle { mark: Some(103) });
        assert_eq!(notifier.delivered_ids(), vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_partial_failure_commits_last_delivered() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101, 102, 103]));
        let notifier = Arc::new(FakeNotifier::failing_on(&[102]));
        let marks = Arc::new(MemoryMarkStore::new());
        marks.commit(&account("hopsy"), 100).await.unwrap();

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::Baseline);

        let err = poller.process(TICK).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Delivery {
                checkin_id: 102,
                delivered: 1,
                ..
            }
        ));
        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), Some(101));

        // Same upstream data on the next tick: 102 and 103 are new again.
        notifier.recover();
        let outcome = poller.process(TICK).await.unwrap();
        assert_eq!(outcome, PollOutcome::Delivered { delivered: 2, mark: 103 });
        assert_eq!(notifier.delivered_ids(), vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_failure_on_first_event_leaves_mark() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101, 102]));
        let notifier = Arc::new(FakeNotifier::failing_on(&[101]));
        let marks = Arc::new(MemoryMarkStore::new());
        marks.commit(&account("hopsy"), 100).await.unwrap();

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::Baseline);

        assert!(poller.process(TICK).await.is_err());
        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), Some(100));
        assert!(notifier.delivered_ids().is_empty());
    }

    #[tokio::test]
    async fn test_baseline_first_run_relays_nothing() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101, 102, 103]));
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::Baseline);
        let outcome = poller.process(TICK).await.unwrap();

        assert_eq!(outcome, PollOutcome::Baseline { mark: 103 });
        assert!(notifier.delivered_ids().is_empty());
        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), Some(103));
        assert_eq!(source.windows.lock().unwrap()[0], FetchWindow::latest_only());

        // Activity after the baseline is relayed.
        source.set_ids("hopsy", &[101, 102, 103, 104]);
        let outcome = poller.process(TICK).await.unwrap();
        assert_eq!(outcome, PollOutcome::Delivered { delivered: 1, mark: 104 });
        assert_eq!(notifier.delivered_ids(), vec![104]);
    }

    #[tokio::test]
    async fn test_baseline_of_account_without_checkins() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::Baseline);
        assert_eq!(
            poller.process(TICK).await.unwrap(),
            PollOutcome::Idle { mark: None }
        );
        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_deliver_all_first_run() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101, 102, 103]));
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::DeliverAll);
        let outcome = poller.process(TICK).await.unwrap();

        assert_eq!(outcome, PollOutcome::Delivered { delivered: 3, mark: 103 });
        assert_eq!(notifier.delivered_ids(), vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_mark() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101]));
        source.fail("hopsy", true);
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());
        marks.commit(&account("hopsy"), 100).await.unwrap();

        let poller = poller(&source, &notifier, &marks, FirstRunPolicy::Baseline);
        let err = poller.process(TICK).await.unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_run_once_isolates_accounts() {
        let source = Arc::new(FakeSource::default());
        source.set_ids("broken", &[1, 2]);
        source.set_ids("hopsy", &[101, 102]);
        source.fail("broken", false);
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());

        let scheduler = PollScheduler::new(
            vec![account("broken"), account("hopsy"), account("hopsy")],
            Arc::clone(&source),
            Arc::clone(&notifier),
            Arc::clone(&marks),
            PollSchedulerConfig {
                interval: Duration::from_secs(60),
                first_run: FirstRunPolicy::DeliverAll,
            },
        );
        assert_eq!(scheduler.accounts().len(), 2);

        let results = scheduler.run_once().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, account("broken"));
        assert!(matches!(results[0].1, Err(PollError::Fetch(FetchError::Unavailable { .. }))));
        assert_eq!(results[1].0, account("hopsy"));
        assert_eq!(
            results[1].1.as_ref().unwrap(),
            &PollOutcome::Delivered { delivered: 2, mark: 102 }
        );
        assert_eq!(marks.get(&account("broken")).await.unwrap(), None);
    }

    /// Source whose fetches take `delay`, recording how many run at once.
    struct SlowSource {
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CheckinSource for SlowSource {
        async fn fetch(
            &self,
            _account: &AccountId,
            _window: FetchWindow,
        ) -> Result<Vec<CheckinEvent>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    /// Notifier that delivers until it reaches `block_on`, then hangs.
    struct BlockingNotifier {
        block_on: CheckinId,
        blocked: tokio::sync::Notify,
        delivered: Mutex<Vec<CheckinId>>,
    }

    #[async_trait::async_trait]
    impl Notifier for BlockingNotifier {
        async fn send(&self, event: &CheckinEvent) -> Result<(), DeliveryError> {
            if event.id == self.block_on {
                self.blocked.notify_one();
                std::future::pending::<()>().await;
            }
            self.delivered.lock().unwrap().push(event.id);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_account_skips_ticks_without_overlap() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(3500),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let scheduler = PollScheduler::new(
            vec![account("hopsy")],
            Arc::clone(&source),
            Arc::new(FakeNotifier::default()),
            Arc::new(MemoryMarkStore::new()),
            PollSchedulerConfig {
                interval: Duration::from_secs(1),
                first_run: FirstRunPolicy::Baseline,
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // Ten ticks fire, but each cycle takes 3.5s: cycles start at 0, 3.5
        // and 7, the ticks in between are queued once or dropped.
        tokio::time::sleep(Duration::from_millis(9900)).await;

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_send_leaves_mark() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101, 102, 103]));
        let notifier = Arc::new(BlockingNotifier {
            block_on: 102,
            blocked: tokio::sync::Notify::new(),
            delivered: Mutex::new(Vec::new()),
        });
        let marks = Arc::new(MemoryMarkStore::with_marks([(account("hopsy"), 100)].into()));

        let scheduler = PollScheduler::new(
            vec![account("hopsy")],
            Arc::clone(&source),
            Arc::clone(&notifier),
            Arc::clone(&marks),
            PollSchedulerConfig {
                interval: Duration::from_secs(3600),
                first_run: FirstRunPolicy::Baseline,
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), notifier.blocked.notified())
            .await
            .unwrap();
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        // 101 went out, but the abandoned cycle commits nothing.
        assert_eq!(*notifier.delivered.lock().unwrap(), vec![101]);
        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_idle_tick_retries_failed_mark_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marks.json");
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101]));
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(FileMarkStore::open(&path).await.unwrap());
        marks.commit(&account("hopsy"), 100).await.unwrap();

        let poller = AccountPoller::new(
            account("hopsy"),
            Arc::clone(&source),
            Arc::clone(&notifier),
            Arc::clone(&marks),
            FirstRunPolicy::Baseline,
        );

        let temp_path = dir.path().join("marks.json.tmp");
        std::fs::create_dir(&temp_path).unwrap();
        assert!(matches!(
            poller.process(TICK).await,
            Err(PollError::Store(_))
        ));
        std::fs::remove_dir(&temp_path).unwrap();

        assert_eq!(
            poller.process(TICK).await.unwrap(),
            PollOutcome::Idle { mark: Some(101) }
        );
        assert_eq!(notifier.delivered_ids(), vec![101]);
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, serde_json::json!({ "hopsy": 101 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_skips_ticks() {
        let source = Arc::new(FakeSource::with_ids("hopsy", &[101]));
        source.fail("hopsy", true);
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::with_marks([(account("hopsy"), 100)].into()));

        let scheduler = PollScheduler::new(
            vec![account("hopsy")],
            Arc::clone(&source),
            Arc::clone(&notifier),
            Arc::clone(&marks),
            PollSchedulerConfig {
                interval: Duration::from_secs(1),
                first_run: FirstRunPolicy::Baseline,
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // t=0 fetches and backs off for 2s, t=1 is skipped.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.windows.lock().unwrap().len(), 1);

        // t=2 fetches again and backs off for 4s.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.windows.lock().unwrap().len(), 2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(source.windows.lock().unwrap().len(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(notifier.delivered_ids().is_empty());
    }

    #[tokio::test]
    async fn test_run_relays_and_stops_on_shutdown() {
        let source = Arc::new(FakeSource::default());
        source.set_ids("hopsy", &[101, 102]);
        source.set_ids("malty", &[7]);
        let notifier = Arc::new(FakeNotifier::default());
        let marks = Arc::new(MemoryMarkStore::new());

        let scheduler = PollScheduler::new(
            vec![account("hopsy"), account("malty")],
            Arc::clone(&source),
            Arc::clone(&notifier),
            Arc::clone(&marks),
            PollSchedulerConfig {
                interval: Duration::from_secs(3600),
                first_run: FirstRunPolicy::DeliverAll,
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // The first tick fires immediately.
        for _ in 0..200 {
            if notifier.delivered_ids().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut delivered = notifier.delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(
            delivered,
            vec![
                (account("hopsy"), 101),
                (account("hopsy"), 102),
                (account("malty"), 7),
            ]
        );

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(marks.get(&account("hopsy")).await.unwrap(), Some(102));
        assert_eq!(marks.get(&account("malty")).await.unwrap(), Some(7));
    }
}
