//! The update ingestion loop.
//!
//! A single long-lived task pulls update batches from a cursor position,
//! fans each batch out to concurrent handler invocations, and advances
//! the cursor only once the whole batch has completed. Crashing between
//! dispatch and cursor advance therefore redelivers the batch on restart:
//! delivery is at-least-once, and every handler must tolerate seeing the
//! same logical event more than once.
//!
//! No ordering is guaranteed across users, nor within one user's updates,
//! since dispatch is fully concurrent. Callers needing per-user ordering
//! must serialize dispatch themselves.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::api::TransportError;
use crate::update::Update;

/// Retry policy for transport failures while polling.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Consecutive failures tolerated before the loop halts.
    pub max_failures: u32,
}

impl BackoffPolicy {
    /// Delay for the `failures`-th consecutive failure:
    /// `base * 2^(failures-1)`, capped.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(31);
        self.base.saturating_mul(2_u32.saturating_pow(exp)).min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_failures: 8,
        }
    }
}

/// Loop states. `Halted` is terminal: the supervisor must treat it as
/// fatal and restart the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Not currently polling (initial, or stopped cooperatively).
    Idle,
    /// A long-poll request is in flight.
    Polling,
    /// A batch is being dispatched to handlers.
    Dispatching,
    /// The failure ceiling was exceeded; the loop has exited for good.
    Halted,
}

/// Source of update batches (the Bot API in production).
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch the next batch at `offset`, waiting up to `wait`.
    async fn fetch_updates(
        &self,
        offset: i64,
        wait: Duration,
    ) -> Result<Vec<Update>, TransportError>;
}

#[async_trait]
impl UpdateSource for crate::api::BotApi {
    async fn fetch_updates(
        &self,
        offset: i64,
        wait: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        self.get_updates(offset, wait).await
    }
}

/// Per-update unit of work.
///
/// Infallible at the loop boundary: handlers deal with their own errors
/// (and user-visible messaging) internally, so one failing update never
/// stalls or aborts the batch.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Process one update.
    async fn handle(&self, update: Update);
}

/// The ingestion loop.
pub struct Poller<S, H> {
    source: S,
    handler: H,
    backoff: BackoffPolicy,
    poll_wait: Duration,
    cancel: CancellationToken,
    offset: i64,
}

impl<S, H> Poller<S, H>
where
    S: UpdateSource,
    H: UpdateHandler + Clone + Send + Sync + 'static,
{
    /// Build a poller starting at cursor 0.
    pub fn new(source: S, handler: H, backoff: BackoffPolicy, cancel: CancellationToken) -> Self {
        Self {
            source,
            handler,
            backoff,
            poll_wait: Duration::from_secs(30),
            cancel,
            offset: 0,
        }
    }

    /// Override the long-poll wait.
    #[must_use]
    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    /// Start from a previously persisted cursor.
    #[must_use]
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Current cursor position.
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Run until cancelled or halted. Returns the terminal state:
    /// `Idle` after a cooperative stop, `Halted` after the failure
    /// ceiling was exceeded.
    pub async fn run(&mut self) -> PollerState {
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(offset = self.offset, "ingestion loop stopped");
                return PollerState::Idle;
            }

            // Polling. Cancellation aborts the in-flight fetch; the cursor
            // has not advanced, so nothing is lost.
            let batch = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(offset = self.offset, "ingestion loop stopped");
                    return PollerState::Idle;
                }
                result = self.source.fetch_updates(self.offset, self.poll_wait) => result,
            };

            match batch {
                Ok(updates) => {
                    failures = 0;
                    if updates.is_empty() {
                        continue;
                    }
                    // Dispatching. The batch always runs to completion,
                    // even under cancellation, and only then does the
                    // cursor move past it.
                    let highest = updates.iter().map(|u| u.update_id).max().unwrap_or(self.offset);
                    tracing::debug!(
                        offset = self.offset,
                        batch_len = updates.len(),
                        highest,
                        "dispatching update batch"
                    );

                    let units = updates.into_iter().map(|update| {
                        let handler = self.handler.clone();
                        async move { handler.handle(update).await }
                    });
                    join_all(units).await;

                    self.offset = highest + 1;
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.backoff.max_failures {
                        tracing::error!(
                            failures,
                            error = %e,
                            "update polling failure ceiling exceeded, halting"
                        );
                        return PollerState::Halted;
                    }

                    let delay = self.backoff.delay(failures);
                    tracing::warn!(
                        failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "update poll failed, backing off"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return PollerState::Idle,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    fn update(id: i64) -> Update {
        Update {
            update_id: id,
            message: None,
            callback_query: None,
        }
    }

    fn transport_error() -> TransportError {
        TransportError::Api {
            description: "poll failed".into(),
        }
    }

    /// Replays a script of poll results and records the offsets requested.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<Update>, TransportError>>>,
        offsets: Mutex<Vec<i64>>,
        cancel_when_empty: CancellationToken,
    }

    impl ScriptedSource {
        fn new(
            script: Vec<Result<Vec<Update>, TransportError>>,
            cancel_when_empty: CancellationToken,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                offsets: Mutex::new(Vec::new()),
                cancel_when_empty,
            })
        }

        fn offsets(&self) -> Vec<i64> {
            self.offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpdateSource for Arc<ScriptedSource> {
        async fn fetch_updates(
            &self,
            offset: i64,
            _wait: Duration,
        ) -> Result<Vec<Update>, TransportError> {
            self.offsets.lock().unwrap().push(offset);
            match self.script.lock().unwrap().pop_front() {
                Some(step) => step,
                None => {
                    // Script exhausted: stop the loop cooperatively.
                    self.cancel_when_empty.cancel();
                    Ok(Vec::new())
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        handled: Arc<Mutex<Vec<i64>>>,
        in_flight_peak: Arc<AtomicI64>,
        in_flight: Arc<AtomicI64>,
    }

    #[async_trait]
    impl UpdateHandler for RecordingHandler {
        async fn handle(&self, update: Update) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight_peak.fetch_max(now, Ordering::SeqCst);
            // Yield so batch members overlap when dispatched concurrently.
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.handled.lock().unwrap().push(update.update_id);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn policy(max_failures: u32) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(80),
            max_failures,
        }
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_failures: 8,
        };

        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(7), Duration::from_secs(60)); // capped at 64 -> 60
        assert_eq!(policy.delay(31), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn advances_cursor_only_after_whole_batch() {
        let cancel = CancellationToken::new();
        let source = ScriptedSource::new(
            vec![Ok(vec![update(10), update(11), update(12)])],
            cancel.clone(),
        );
        let handler = RecordingHandler::default();

        let mut poller = Poller::new(
            Arc::clone(&source),
            handler.clone(),
            policy(3),
            cancel.clone(),
        )
        .with_poll_wait(Duration::ZERO)
        .with_offset(10);

        assert_eq!(poller.run().await, PollerState::Idle);

        // All three handled, concurrently.
        let mut handled = handler.handled.lock().unwrap().clone();
        handled.sort_unstable();
        assert_eq!(handled, vec![10, 11, 12]);
        assert!(handler.in_flight_peak.load(Ordering::SeqCst) > 1);

        // First poll at 10, next poll past the highest id of the batch.
        assert_eq!(source.offsets(), vec![10, 13]);
        assert_eq!(poller.offset(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn halts_after_failure_ceiling() {
        let cancel = CancellationToken::new();
        let source = ScriptedSource::new(
            vec![
                Err(transport_error()),
                Err(transport_error()),
                Err(transport_error()),
            ],
            cancel.clone(),
        );
        let handler = RecordingHandler::default();

        let mut poller = Poller::new(Arc::clone(&source), handler, policy(2), cancel)
            .with_poll_wait(Duration::ZERO);

        assert_eq!(poller.run().await, PollerState::Halted);
        // Exactly max_failures + 1 attempts were made.
        assert_eq!(source.offsets().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_counter() {
        let cancel = CancellationToken::new();
        // Two failures, a success, then two more failures: with a ceiling
        // of 2 this only halts if the counter failed to reset.
        let source = ScriptedSource::new(
            vec![
                Err(transport_error()),
                Err(transport_error()),
                Ok(vec![update(1)]),
                Err(transport_error()),
                Err(transport_error()),
            ],
            cancel.clone(),
        );
        let handler = RecordingHandler::default();

        let mut poller = Poller::new(
            Arc::clone(&source),
            handler.clone(),
            policy(2),
            cancel.clone(),
        )
        .with_poll_wait(Duration::ZERO);

        assert_eq!(poller.run().await, PollerState::Idle);
        assert_eq!(source.offsets().len(), 6); // full script + final empty poll
        assert_eq!(*handler.handled.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_batch_is_redelivered_from_old_cursor() {
        // A crash between dispatch and cursor advance means the next run
        // starts at the old cursor and sees the same batch again.
        let batch = vec![update(5), update(6)];

        let cancel1 = CancellationToken::new();
        let source1 = ScriptedSource::new(vec![Ok(batch.clone())], cancel1.clone());
        let handler = RecordingHandler::default();
        let mut first = Poller::new(
            Arc::clone(&source1),
            handler.clone(),
            policy(2),
            cancel1,
        )
        .with_poll_wait(Duration::ZERO)
        .with_offset(5);
        first.run().await;

        // Restart from the pre-batch cursor, replaying the same updates.
        let cancel2 = CancellationToken::new();
        let source2 = ScriptedSource::new(vec![Ok(batch)], cancel2.clone());
        let mut second = Poller::new(
            Arc::clone(&source2),
            handler.clone(),
            policy(2),
            cancel2,
        )
        .with_poll_wait(Duration::ZERO)
        .with_offset(5);
        second.run().await;

        // Both runs saw the batch; the handler tolerated redelivery and
        // both cursors ended past the highest id.
        let handled = handler.handled.lock().unwrap().clone();
        assert_eq!(handled.iter().filter(|&&id| id == 5).count(), 2);
        assert_eq!(first.offset(), 7);
        assert_eq!(second.offset(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_prevents_new_polls() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = ScriptedSource::new(vec![Ok(vec![update(1)])], cancel.clone());
        let handler = RecordingHandler::default();

        let mut poller = Poller::new(Arc::clone(&source), handler.clone(), policy(2), cancel)
            .with_poll_wait(Duration::ZERO);

        assert_eq!(poller.run().await, PollerState::Idle);
        assert!(source.offsets().is_empty());
        assert!(handler.handled.lock().unwrap().is_empty());
    }
}
