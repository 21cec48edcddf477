//! PostgreSQL-backed [`RunStore`].

use async_trait::async_trait;
use typology_core::payload::RunResult;
use typology_core::run_kind::RunKind;
use typology_core::run_state::RunAction;
use typology_core::types::{DbId, Timestamp};
use uuid::Uuid;

use super::{check_result, holds_claim, rejection, RunStore, StoreError};
use crate::models::run::{CreateRun, Run};
use crate::repositories::RunRepo;
use crate::DbPool;

/// [`RunStore`] over [`RunRepo`]. Cheap to clone.
#[derive(Clone)]
pub struct PgRunStore {
    pool: DbPool,
    retry_ceiling: i32,
}

impl PgRunStore {
    pub fn new(pool: DbPool, retry_ceiling: i32) -> Self {
        Self {
            pool,
            retry_ceiling,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    fn retry_ceiling(&self) -> i32 {
        self.retry_ceiling
    }

    async fn create(&self, kind: RunKind, input: &CreateRun) -> Result<Run, StoreError> {
        Ok(RunRepo::create(&self.pool, kind, input).await?)
    }

    async fn find_by_slug(&self, kind: RunKind, slug: &str) -> Result<Option<Run>, StoreError> {
        Ok(RunRepo::find_by_slug(&self.pool, kind, slug).await?)
    }

    async fn find_by_id(&self, kind: RunKind, id: DbId) -> Result<Option<Run>, StoreError> {
        Ok(RunRepo::find_by_id(&self.pool, kind, id).await?)
    }

    async fn list_by_creation(&self, kind: RunKind) -> Result<Vec<Run>, StoreError> {
        Ok(RunRepo::list_by_creation(&self.pool, kind).await?)
    }

    async fn claim_next_queued(&self, kind: RunKind) -> Result<Option<Run>, StoreError> {
        Ok(RunRepo::claim_next_queued(&self.pool, kind, Uuid::new_v4()).await?)
    }

    async fn mark_complete(
        &self,
        kind: RunKind,
        id: DbId,
        claim_token: Uuid,
        result: &RunResult,
    ) -> Result<Run, StoreError> {
        let token = Some(claim_token);
        let current = RunRepo::find_by_id(&self.pool, kind, id).await?;
        let Some(run) = current.as_ref().filter(|r| holds_claim(r, claim_token)) else {
            return Err(rejection(kind, id, current.as_ref(), RunAction::Complete, token));
        };
        check_result(kind, run, result)?;

        // The update re-checks state and token, so a reclaim between the
        // read above and this write still loses cleanly.
        match RunRepo::mark_complete(&self.pool, kind, id, claim_token, result).await? {
            Some(updated) => Ok(updated),
            None => {
                tracing::debug!(%kind, run_id = id, "Run changed between read and completion");
                let current = RunRepo::find_by_id(&self.pool, kind, id).await?;
                Err(rejection(kind, id, current.as_ref(), RunAction::Complete, token))
            }
        }
    }

    async fn mark_failed(
        &self,
        kind: RunKind,
        id: DbId,
        claim_token: Option<Uuid>,
    ) -> Result<Run, StoreError> {
        match RunRepo::mark_failed(&self.pool, kind, id, claim_token, self.retry_ceiling).await? {
            Some(updated) => Ok(updated),
            None => {
                let current = RunRepo::find_by_id(&self.pool, kind, id).await?;
                Err(rejection(kind, id, current.as_ref(), RunAction::Fail, claim_token))
            }
        }
    }

    async fn reset_for_retry(&self, kind: RunKind, slug: &str) -> Result<Option<Run>, StoreError> {
        if let Some(updated) = RunRepo::reset_for_retry(&self.pool, kind, slug).await? {
            return Ok(Some(updated));
        }
        match RunRepo::find_by_slug(&self.pool, kind, slug).await? {
            None => Ok(None),
            Some(run) => Err(StoreError::InvalidTransition {
                kind,
                id: run.id,
                from: run.state,
                action: RunAction::Retry,
            }),
        }
    }

    async fn requeue_stale(&self, kind: RunKind, older_than: Timestamp) -> Result<u64, StoreError> {
        let ceiling = self.retry_ceiling;
        let released = RunRepo::requeue_stale(&self.pool, kind, older_than, ceiling).await?;
        if released > 0 {
            tracing::debug!(%kind, released, cutoff = %older_than, "Released stale claims");
        }
        Ok(released)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}
