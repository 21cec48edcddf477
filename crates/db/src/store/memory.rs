//! In-memory [`RunStore`] for tests and database-less local runs.
//!
//! Every operation takes the single lock for its whole duration, which makes
//! each one atomic with respect to concurrent callers in the same way the
//! conditional updates are in PostgreSQL.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::Mutex;
use typology_core::error::CoreError;
use typology_core::payload::RunResult;
use typology_core::run_kind::RunKind;
use typology_core::run_state::{state_after_failure, RunAction, RunState};
use typology_core::slug::run_slug;
use typology_core::types::{DbId, Timestamp};
use uuid::Uuid;

use super::{check_result, holds_claim, rejection, RunStore, StoreError};
use crate::models::run::{CreateRun, Run};

#[derive(Default)]
struct Table {
    last_id: DbId,
    rows: BTreeMap<DbId, Run>,
}

impl Table {
    fn by_slug_mut(&mut self, slug: &str) -> Option<&mut Run> {
        self.rows.values_mut().find(|run| run.slug == slug)
    }
}

/// A failure is accepted from any state that permits it, and only from the
/// current claimant when a token is given.
fn accepts_failure(run: &Run, claim_token: Option<Uuid>) -> bool {
    RunAction::Fail.permits(run.state) && (claim_token.is_none() || run.claim_token == claim_token)
}

fn is_stale(run: &Run, older_than: Timestamp) -> bool {
    run.state == RunState::Processing && run.claimed_at.is_some_and(|at| at < older_than)
}

/// Mutex-guarded map of per-kind tables.
pub struct MemoryRunStore {
    tables: Mutex<HashMap<RunKind, Table>>,
    retry_ceiling: i32,
}

impl MemoryRunStore {
    pub fn new(retry_ceiling: i32) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            retry_ceiling,
        }
    }

    /// Insert a fully-formed row, keeping its id, state and timestamps.
    ///
    /// Used to set up fixtures (imported runs, runs in a given state).
    /// Fails with a conflict if another row already owns the slug.
    pub async fn insert(&self, kind: RunKind, run: Run) -> Result<Run, StoreError> {
        let mut tables = self.tables.lock().await;
        let table = tables.entry(kind).or_default();
        if table
            .rows
            .values()
            .any(|existing| existing.slug == run.slug && existing.id != run.id)
        {
            let msg = format!("Duplicate slug '{}'", run.slug);
            return Err(CoreError::Conflict(msg).into());
        }
        table.last_id = table.last_id.max(run.id);
        table.rows.insert(run.id, run.clone());
        Ok(run)
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    fn retry_ceiling(&self) -> i32 {
        self.retry_ceiling
    }

    async fn create(&self, kind: RunKind, input: &CreateRun) -> Result<Run, StoreError> {
        let mut tables = self.tables.lock().await;
        let table = tables.entry(kind).or_default();
        table.last_id += 1;
        let id = table.last_id;
        let now = Utc::now();

        let run = Run {
            id,
            slug: run_slug(&input.subject, id),
            state: RunState::Queued,
            errors: 0,
            subject: input.subject.clone(),
            context: input.context.clone(),
            run_mode: input.run_mode,
            responses: None,
            scores: None,
            results_html: None,
            claim_token: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(id, run.clone());
        Ok(run)
    }

    async fn find_by_slug(&self, kind: RunKind, slug: &str) -> Result<Option<Run>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(&kind)
            .and_then(|table| table.rows.values().find(|run| run.slug == slug))
            .cloned())
    }

    async fn find_by_id(&self, kind: RunKind, id: DbId) -> Result<Option<Run>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(&kind)
            .and_then(|table| table.rows.get(&id))
            .cloned())
    }

    async fn list_by_creation(&self, kind: RunKind) -> Result<Vec<Run>, StoreError> {
        let tables = self.tables.lock().await;
        let mut runs: Vec<Run> = tables
            .get(&kind)
            .map(|table| table.rows.values().cloned().collect())
            .unwrap_or_default();
        runs.sort_by_key(|run| Reverse((run.created_at, run.id)));
        Ok(runs)
    }

    async fn claim_next_queued(&self, kind: RunKind) -> Result<Option<Run>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(table) = tables.get_mut(&kind) else {
            return Ok(None);
        };
        let Some(run) = table
            .rows
            .values_mut()
            .filter(|run| run.state == RunState::Queued)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        else {
            return Ok(None);
        };

        let now = Utc::now();
        run.state = RunState::Processing;
        run.claim_token = Some(Uuid::new_v4());
        run.claimed_at = Some(now);
        run.updated_at = now;
        Ok(Some(run.clone()))
    }

    async fn mark_complete(
        &self,
        kind: RunKind,
        id: DbId,
        claim_token: Uuid,
        result: &RunResult,
    ) -> Result<Run, StoreError> {
        let mut tables = self.tables.lock().await;
        let run = tables
            .get_mut(&kind)
            .and_then(|table| table.rows.get_mut(&id));
        let Some(run) = run.filter(|r| holds_claim(r, claim_token)) else {
            let current = tables.get(&kind).and_then(|table| table.rows.get(&id));
            return Err(rejection(kind, id, current, RunAction::Complete, Some(claim_token)));
        };
        check_result(kind, run, result)?;

        run.state = RunState::Complete;
        run.responses = Some(Json(result.responses.clone()));
        run.scores = Some(Json(result.scores.clone()));
        if kind.has_results_html() {
            run.results_html = result.results_html.clone();
        }
        run.claim_token = None;
        run.claimed_at = None;
        run.updated_at = Utc::now();
        Ok(run.clone())
    }

    async fn mark_failed(
        &self,
        kind: RunKind,
        id: DbId,
        claim_token: Option<Uuid>,
    ) -> Result<Run, StoreError> {
        let mut tables = self.tables.lock().await;
        let run = tables
            .get_mut(&kind)
            .and_then(|table| table.rows.get_mut(&id));
        let Some(run) = run.filter(|r| accepts_failure(r, claim_token)) else {
            let current = tables.get(&kind).and_then(|table| table.rows.get(&id));
            return Err(rejection(kind, id, current, RunAction::Fail, claim_token));
        };

        run.errors += 1;
        run.state = state_after_failure(run.errors, self.retry_ceiling);
        run.claim_token = None;
        run.claimed_at = None;
        run.updated_at = Utc::now();
        Ok(run.clone())
    }

    async fn reset_for_retry(&self, kind: RunKind, slug: &str) -> Result<Option<Run>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(run) = tables
            .get_mut(&kind)
            .and_then(|table| table.by_slug_mut(slug))
        else {
            return Ok(None);
        };
        if !RunAction::Retry.permits(run.state) {
            return Err(StoreError::InvalidTransition {
                kind,
                id: run.id,
                from: run.state,
                action: RunAction::Retry,
            });
        }

        run.state = RunState::Queued;
        run.errors = 0;
        run.claim_token = None;
        run.claimed_at = None;
        run.updated_at = Utc::now();
        Ok(Some(run.clone()))
    }

    async fn requeue_stale(&self, kind: RunKind, older_than: Timestamp) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(table) = tables.get_mut(&kind) else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut released = 0;
        for run in table.rows.values_mut().filter(|r| is_stale(r, older_than)) {
            run.errors += 1;
            run.state = state_after_failure(run.errors, self.retry_ceiling);
            run.claim_token = None;
            run.claimed_at = None;
            run.updated_at = now;
            released += 1;
        }
        Ok(released)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::Duration;
    use typology_core::payload::{QuestionResponse, Responses, Scores, FUNCTION_CODES};
    use typology_core::run_mode::RunMode;

    use super::*;

    fn new_run(subject: &str, mode: RunMode) -> CreateRun {
        CreateRun {
            subject: subject.to_string(),
            context: None,
            run_mode: mode,
        }
    }

    fn result(count: u32) -> RunResult {
        let scores = FUNCTION_CODES
            .iter()
            .map(|code| (code.to_string(), 25.0))
            .collect();
        RunResult {
            responses: Responses(
                (1..=count)
                    .map(|question| QuestionResponse {
                        question,
                        answer: 3,
                    })
                    .collect(),
            ),
            scores: Scores::Functions(scores),
            results_html: None,
        }
    }

    /// A fresh `32q` run.
    async fn queued(store: &MemoryRunStore, kind: RunKind, subject: &str) -> Run {
        let input = new_run(subject, RunMode::Q32);
        store.create(kind, &input).await.unwrap()
    }

    async fn claim(store: &MemoryRunStore, kind: RunKind) -> Run {
        store.claim_next_queued(kind).await.unwrap().unwrap()
    }

    async fn fetch(store: &MemoryRunStore, kind: RunKind, id: DbId) -> Run {
        store.find_by_id(kind, id).await.unwrap().unwrap()
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_assigns_id_suffixed_slug_in_queued_state() {
        let store = MemoryRunStore::new(3);
        let first = queued(&store, RunKind::Jbh, "Sherlock Holmes").await;
        let second = queued(&store, RunKind::Jbh, "Sherlock Holmes").await;

        assert_eq!(first.slug, "sherlock-holmes-1");
        assert_eq!(second.slug, "sherlock-holmes-2");
        assert_eq!(first.state, RunState::Queued);
        assert_eq!(first.errors, 0);
        assert!(first.responses.is_none() && first.scores.is_none());
    }

    #[tokio::test]
    async fn kinds_are_separate_stores() {
        let store = MemoryRunStore::new(3);
        let jbh = queued(&store, RunKind::Jbh, "Watson").await;
        let jdb = queued(&store, RunKind::Jdb, "Watson").await;

        assert_eq!(jbh.slug, jdb.slug);
        let other = store.find_by_slug(RunKind::Smysnk, &jbh.slug).await;
        assert!(other.unwrap().is_none());
        let found = store.find_by_slug(RunKind::Jdb, &jdb.slug).await;
        assert_eq!(found.unwrap().unwrap().id, jdb.id);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_slug() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Moriarty").await;
        let mut clash = run.clone();
        clash.id = 99;

        let err = store.insert(RunKind::Jbh, clash).await.unwrap_err();
        assert_matches!(err, StoreError::Core(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first_regardless_of_insertion_order() {
        let store = MemoryRunStore::new(3);
        let base = queued(&store, RunKind::Sakinorva, "Base").await;
        let now = Utc::now();

        for (id, minutes_ago) in [(10, 5), (11, 30), (12, 1), (13, 60)] {
            let mut run = base.clone();
            run.id = id;
            run.slug = format!("run-{id}");
            run.created_at = now - Duration::minutes(minutes_ago);
            store.insert(RunKind::Sakinorva, run).await.unwrap();
        }

        let listed = store.list_by_creation(RunKind::Sakinorva).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![base.id, 12, 10, 11, 13]);
        assert!(listed
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
    }

    // -----------------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn claims_oldest_first() {
        let store = MemoryRunStore::new(3);
        let a = queued(&store, RunKind::Smysnk, "A").await;
        let b = queued(&store, RunKind::Smysnk, "B").await;

        let first = claim(&store, RunKind::Smysnk).await;
        let second = claim(&store, RunKind::Smysnk).await;

        assert_eq!(first.id, a.id);
        assert_eq!(second.id, b.id);
        assert_eq!(first.state, RunState::Processing);
        assert!(first.claim_token.is_some());
        let none_left = store.claim_next_queued(RunKind::Smysnk).await.unwrap();
        assert!(none_left.is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = Arc::new(MemoryRunStore::new(3));
        queued(&store, RunKind::Jdb, "Lestrade").await;

        let attempts = (0..16).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim_next_queued(RunKind::Jdb).await })
        });
        let outcomes = futures::future::join_all(attempts).await;

        let winners = outcomes
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn complete_writes_payloads_and_keeps_errors() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Mycroft").await;
        store.mark_failed(RunKind::Jbh, run.id, None).await.unwrap();

        let token = claim(&store, RunKind::Jbh).await.claim_token.unwrap();
        let done = store
            .mark_complete(RunKind::Jbh, run.id, token, &result(32))
            .await
            .unwrap();

        assert_eq!(done.state, RunState::Complete);
        assert_eq!(done.errors, 1);
        assert_eq!(done.responses().unwrap().len(), 32);
        assert!(done.scores().is_some());
        assert!(done.claim_token.is_none());
    }

    #[tokio::test]
    async fn complete_rejected_outside_processing() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Hudson").await;

        let err = store
            .mark_complete(RunKind::Jbh, run.id, Uuid::new_v4(), &result(32))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            StoreError::InvalidTransition {
                from: RunState::Queued,
                action: RunAction::Complete,
                ..
            }
        );
        let unchanged = fetch(&store, RunKind::Jbh, run.id).await;
        assert_eq!(unchanged.state, RunState::Queued);
        assert!(unchanged.responses.is_none());
    }

    #[tokio::test]
    async fn complete_with_stale_token_loses_lease() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Adler").await;
        claim(&store, RunKind::Jbh).await;

        let err = store
            .mark_complete(RunKind::Jbh, run.id, Uuid::new_v4(), &result(32))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::LeaseLost { .. });
    }

    #[tokio::test]
    async fn malformed_result_rejected_at_store_boundary() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Gregson").await;
        let token = claim(&store, RunKind::Jbh).await.claim_token.unwrap();

        let err = store
            .mark_complete(RunKind::Jbh, run.id, token, &result(16))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Core(CoreError::Validation(_)));
        let still = fetch(&store, RunKind::Jbh, run.id).await;
        assert_eq!(still.state, RunState::Processing);
    }

    #[tokio::test]
    async fn complete_on_missing_run() {
        let store = MemoryRunStore::new(3);
        let err = store
            .mark_complete(RunKind::Jdb, 404, Uuid::new_v4(), &result(32))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Missing { id: 404, .. });
    }

    // -----------------------------------------------------------------------
    // Failure and retry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failures_reach_error_at_ceiling_and_never_beyond() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Smysnk, "Moran").await;

        let first = store.mark_failed(RunKind::Smysnk, run.id, None).await;
        assert_eq!(first.unwrap().state, RunState::Queued);
        let second = store.mark_failed(RunKind::Smysnk, run.id, None).await;
        assert_eq!(second.unwrap().errors, 2);
        let third = store.mark_failed(RunKind::Smysnk, run.id, None).await;
        let third = third.unwrap();
        assert_eq!((third.state, third.errors), (RunState::Error, 3));

        let err = store.mark_failed(RunKind::Smysnk, run.id, None).await;
        assert_matches!(
            err,
            Err(StoreError::InvalidTransition {
                from: RunState::Error,
                ..
            })
        );
        let after = fetch(&store, RunKind::Smysnk, run.id).await;
        assert_eq!(after.errors, 3);
    }

    #[tokio::test]
    async fn failure_of_claimed_run_requires_matching_token() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jdb, "Toby").await;
        let claimed = claim(&store, RunKind::Jdb).await;

        let stranger = Some(Uuid::new_v4());
        let err = store.mark_failed(RunKind::Jdb, run.id, stranger).await;
        assert_matches!(err, Err(StoreError::LeaseLost { .. }));

        let failed = store
            .mark_failed(RunKind::Jdb, run.id, claimed.claim_token)
            .await
            .unwrap();
        assert_eq!(failed.state, RunState::Queued);
        assert!(failed.claim_token.is_none());
    }

    #[tokio::test]
    async fn retry_is_idempotent() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Stamford").await;
        for _ in 0..3 {
            store.mark_failed(RunKind::Jbh, run.id, None).await.unwrap();
        }

        for _ in 0..2 {
            let reset = store.reset_for_retry(RunKind::Jbh, &run.slug).await;
            let reset = reset.unwrap().unwrap();
            assert_eq!((reset.state, reset.errors), (RunState::Queued, 0));
        }
    }

    #[tokio::test]
    async fn retry_resets_errors_on_queued_run() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Wiggins").await;
        store.mark_failed(RunKind::Jbh, run.id, None).await.unwrap();

        let reset = store.reset_for_retry(RunKind::Jbh, &run.slug).await;
        let reset = reset.unwrap().unwrap();
        assert_eq!((reset.state, reset.errors), (RunState::Queued, 0));
    }

    #[tokio::test]
    async fn retry_reclaims_stuck_processing_run() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Bradstreet").await;
        let token = claim(&store, RunKind::Jbh).await.claim_token.unwrap();

        let reset = store.reset_for_retry(RunKind::Jbh, &run.slug).await;
        assert!(reset.unwrap().is_some());

        // The original claimant can no longer complete.
        let err = store
            .mark_complete(RunKind::Jbh, run.id, token, &result(32))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            StoreError::InvalidTransition {
                from: RunState::Queued,
                ..
            }
        );
    }

    #[tokio::test]
    async fn retry_of_complete_run_rejected() {
        let store = MemoryRunStore::new(3);
        let run = queued(&store, RunKind::Jbh, "Hopkins").await;
        let token = claim(&store, RunKind::Jbh).await.claim_token.unwrap();
        store
            .mark_complete(RunKind::Jbh, run.id, token, &result(32))
            .await
            .unwrap();

        let err = store.reset_for_retry(RunKind::Jbh, &run.slug).await;
        assert_matches!(
            err,
            Err(StoreError::InvalidTransition {
                from: RunState::Complete,
                ..
            })
        );
    }

    #[tokio::test]
    async fn retry_of_unknown_slug_is_none() {
        let store = MemoryRunStore::new(3);
        let reset = store.reset_for_retry(RunKind::Jbh, "nobody-1").await;
        assert!(reset.unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Staleness
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn stale_claims_are_requeued_as_failures() {
        let store = MemoryRunStore::new(2);
        let run = queued(&store, RunKind::Sakinorva, "Holmes").await;
        claim(&store, RunKind::Sakinorva).await;

        // A cutoff in the past leaves the fresh claim alone.
        let past = Utc::now() - Duration::minutes(15);
        let released = store.requeue_stale(RunKind::Sakinorva, past).await;
        assert_eq!(released.unwrap(), 0);

        let future = Utc::now() + Duration::seconds(1);
        let released = store.requeue_stale(RunKind::Sakinorva, future).await;
        assert_eq!(released.unwrap(), 1);
        let requeued = fetch(&store, RunKind::Sakinorva, run.id).await;
        assert_eq!((requeued.state, requeued.errors), (RunState::Queued, 1));

        claim(&store, RunKind::Sakinorva).await;
        let future = Utc::now() + Duration::seconds(1);
        store
            .requeue_stale(RunKind::Sakinorva, future)
            .await
            .unwrap();
        let errored = fetch(&store, RunKind::Sakinorva, run.id).await;
        assert_eq!((errored.state, errored.errors), (RunState::Error, 2));
    }
}
