//! Background run queue worker.
//!
//! A single Tokio task per process polls every kind's store for `QUEUED`
//! runs, claims them via [`RunStore::claim_next_queued`] and hands them to
//! the [`RunScorer`]. [`RunQueueWorker::start`] is called on boot and on
//! every create/retry request; the handle slot under its mutex guarantees
//! at most one loop is alive no matter how many callers race.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use typology_core::payload::RunResult;
use typology_core::run_kind::RunKind;
use typology_core::run_state::RunState;
use typology_db::models::run::Run;
use typology_db::store::{RunStore, StoreError};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::scorer::{RunScorer, ScoreError, ScoreRequest};

/// Process-wide singleton queue worker.
///
/// Owned as `Arc<RunQueueWorker>` by [`AppState`](crate::state::AppState).
/// The loop exits on its own after [`QueueConfig::idle_shutdown`] without
/// work; the next [`start`](Self::start) spawns a fresh one.
pub struct RunQueueWorker {
    store: Arc<dyn RunStore>,
    scorer: Arc<dyn RunScorer>,
    config: QueueConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
    wake: Notify,
    cancel: CancellationToken,
}

impl RunQueueWorker {
    pub fn new(store: Arc<dyn RunStore>, scorer: Arc<dyn RunScorer>, config: QueueConfig) -> Self {
        Self {
            store,
            scorer,
            config,
            handle: Mutex::new(None),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Ensure a loop is running.
    ///
    /// Spawns one and returns `true` when none is alive; otherwise wakes
    /// the live loop so it rescans immediately and returns `false`. After
    /// [`shutdown`](Self::shutdown) this is a no-op.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            self.wake.notify_one();
            return false;
        }

        let worker = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { worker.run().await }));
        true
    }

    /// Whether a loop is currently alive.
    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait up to `timeout` for it to finish.
    ///
    /// A run being scored when the wait times out stays `PROCESSING` and is
    /// recovered by the stale-claim sweep after restart.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();
        let handle = self.slot().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Run queue worker did not stop in time",
                );
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The loop body. Runs until cancelled or idle for `idle_shutdown`.
    async fn run(self: Arc<Self>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            idle_shutdown_secs = self.config.idle_shutdown.as_secs(),
            "Run queue worker started",
        );
        let mut last_work = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.cycle().await {
                Ok(true) => {
                    last_work = Instant::now();
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Run queue cycle failed");
                }
            }

            if last_work.elapsed() >= self.config.idle_shutdown {
                if self.release_if_idle() {
                    tracing::info!("Run queue idle, worker exiting");
                    return;
                }
                last_work = Instant::now();
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {
                    last_work = Instant::now();
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("Run queue worker shutting down");
    }

    /// Clear the handle slot unless a `start()` arrived since the last
    /// scan. Holding the slot lock here orders this against `start()`:
    /// either it sees the wake-up permit, or `start()` sees an empty slot
    /// and spawns a new loop.
    fn release_if_idle(&self) -> bool {
        let mut slot = self.slot();
        if self.wake.notified().now_or_never().is_some() {
            return false;
        }
        slot.take();
        true
    }

    /// One pass: release stale claims, then claim and process at most one
    /// run per kind. Returns whether any run was claimed. A run whose
    /// outcome cannot be recorded does not stop the scan of later kinds.
    async fn cycle(&self) -> Result<bool, StoreError> {
        self.requeue_stale().await?;

        let mut claimed_any = false;
        for kind in RunKind::ALL {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(run) = self.store.claim_next_queued(kind).await? {
                claimed_any = true;
                self.process(kind, run).await;
            }
        }
        Ok(claimed_any)
    }

    async fn requeue_stale(&self) -> Result<(), StoreError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(stale_after) else {
            return Ok(());
        };

        for kind in RunKind::ALL {
            let released = self.store.requeue_stale(kind, cutoff).await?;
            if released > 0 {
                tracing::warn!(%kind, released, "Requeued stale processing runs");
            }
        }
        Ok(())
    }

    /// Score one claimed run and record the outcome.
    ///
    /// Store faults while recording are logged; the claim is left to the
    /// stale-claim sweep.
    async fn process(&self, kind: RunKind, run: Run) {
        let Some(token) = run.claim_token else {
            tracing::warn!(%kind, run_id = run.id, "Claimed run carries no claim token");
            return;
        };
        tracing::info!(
            %kind,
            run_id = run.id,
            slug = %run.slug,
            errors = run.errors,
            "Run claimed",
        );

        let recorded = match self.score(kind, &run).await {
            Ok(result) => self.complete(kind, &run, token, &result).await,
            Err(e) => {
                tracing::warn!(
                    %kind,
                    run_id = run.id,
                    slug = %run.slug,
                    error = %e,
                    "Scoring failed",
                );
                self.fail(kind, &run, token).await
            }
        };

        if let Err(e) = recorded {
            tracing::error!(
                %kind,
                run_id = run.id,
                slug = %run.slug,
                error = %e,
                "Failed to record run outcome",
            );
        }
    }

    async fn complete(
        &self,
        kind: RunKind,
        run: &Run,
        token: Uuid,
        result: &RunResult,
    ) -> Result<(), StoreError> {
        match self.store.mark_complete(kind, run.id, token, result).await {
            Ok(done) => {
                tracing::info!(%kind, run_id = done.id, slug = %done.slug, "Run complete");
                Ok(())
            }
            Err(StoreError::Core(e)) => {
                tracing::warn!(%kind, run_id = run.id, error = %e, "Store rejected scoring result");
                self.fail(kind, run, token).await
            }
            Err(
                e @ (StoreError::LeaseLost { .. }
                | StoreError::InvalidTransition { .. }
                | StoreError::Missing { .. }),
            ) => {
                tracing::warn!(
                    %kind,
                    run_id = run.id,
                    error = %e,
                    "Discarding result for superseded claim",
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run the scorer under the execution timeout and validate its output.
    /// A panicking scorer counts as a failed attempt.
    async fn score(&self, kind: RunKind, run: &Run) -> Result<RunResult, ScoreError> {
        let request = ScoreRequest::for_run(kind, run);
        let timeout = self.config.execution_timeout;
        let scoring = AssertUnwindSafe(self.scorer.score(&request)).catch_unwind();

        let result = match tokio::time::timeout(timeout, scoring).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(panic)) => return Err(ScoreError::Panicked(panic_message(panic))),
            Err(_) => return Err(ScoreError::Timeout(timeout)),
        };
        result
            .validate(kind, run.run_mode)
            .map_err(|e| ScoreError::Invalid(e.to_string()))?;
        Ok(result)
    }

    async fn fail(&self, kind: RunKind, run: &Run, token: Uuid) -> Result<(), StoreError> {
        match self.store.mark_failed(kind, run.id, Some(token)).await {
            Ok(failed) if failed.state == RunState::Error => {
                tracing::error!(
                    %kind,
                    run_id = failed.id,
                    slug = %failed.slug,
                    errors = failed.errors,
                    "Run reached retry ceiling",
                );
                Ok(())
            }
            Ok(failed) => {
                tracing::info!(
                    %kind,
                    run_id = failed.id,
                    errors = failed.errors,
                    "Run requeued after failure",
                );
                Ok(())
            }
            Err(
                e @ (StoreError::LeaseLost { .. }
                | StoreError::InvalidTransition { .. }
                | StoreError::Missing { .. }),
            ) => {
                tracing::warn!(
                    %kind,
                    run_id = run.id,
                    error = %e,
                    "Claim superseded before failure was recorded",
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
