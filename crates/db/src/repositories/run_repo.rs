//! Repository for the per-kind run tables (`runs`, `jbh_runs`, `jdb_runs`,
//! `smysnk_runs`).
//!
//! Every method takes the [`RunKind`] and interpolates its table name, which
//! comes from a closed `&'static str` set. Values are always bound.
//! Conditional updates return `None` when the row was not in a state the
//! mutation accepts; callers decide how to report that.

use sqlx::types::Json;
use sqlx::PgPool;
use typology_core::payload::RunResult;
use typology_core::run_kind::RunKind;
use typology_core::run_state::RunState;
use typology_core::slug::slugify;
use typology_core::types::{DbId, Timestamp};
use uuid::Uuid;

use crate::models::run::{CreateRun, Run};

/// Column list shared by every run table.
const BASE_COLUMNS: &str = "\
    id, slug, state_id, errors, subject, context, run_mode, \
    responses, scores, claim_token, claimed_at, created_at, updated_at";

/// Column list for `kind`, projecting a NULL `results_html` where the table
/// has no such column.
fn columns(kind: RunKind) -> String {
    if kind.has_results_html() {
        format!("{BASE_COLUMNS}, results_html")
    } else {
        format!("{BASE_COLUMNS}, NULL::TEXT AS results_html")
    }
}

/// Provides lifecycle operations for runs of every kind.
pub struct RunRepo;

impl RunRepo {
    /// Insert a new `QUEUED` run and assign its slug in the same statement.
    ///
    /// The id is drawn from the table's sequence first so the slug suffix
    /// can be computed without a second round trip.
    pub async fn create(
        pool: &PgPool,
        kind: RunKind,
        input: &CreateRun,
    ) -> Result<Run, sqlx::Error> {
        let table = kind.table();
        let query = format!(
            "WITH next AS (SELECT nextval(pg_get_serial_sequence('{table}', 'id')) AS id) \
             INSERT INTO {table} (id, slug, state_id, errors, subject, context, run_mode) \
             SELECT next.id, $1 || '-' || next.id, $2, 0, $3, $4, $5 FROM next \
             RETURNING {}",
            columns(kind)
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(slugify(&input.subject))
            .bind(RunState::Queued.id())
            .bind(&input.subject)
            .bind(&input.context)
            .bind(input.run_mode.as_str())
            .fetch_one(pool)
            .await
    }

    /// Find a run by its unique slug.
    pub async fn find_by_slug(
        pool: &PgPool,
        kind: RunKind,
        slug: &str,
    ) -> Result<Option<Run>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE slug = $1",
            columns(kind),
            kind.table()
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    /// Find a run by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        kind: RunKind,
        id: DbId,
    ) -> Result<Option<Run>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1",
            columns(kind),
            kind.table()
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All runs of `kind`, newest first.
    pub async fn list_by_creation(pool: &PgPool, kind: RunKind) -> Result<Vec<Run>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} ORDER BY created_at DESC, id DESC",
            columns(kind),
            kind.table()
        );
        sqlx::query_as::<_, Run>(&query).fetch_all(pool).await
    }

    /// Atomically claim the oldest queued run.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent claimers never
    /// receive the same row; a loser simply sees `None`.
    pub async fn claim_next_queued(
        pool: &PgPool,
        kind: RunKind,
        claim_token: Uuid,
    ) -> Result<Option<Run>, sqlx::Error> {
        let table = kind.table();
        let query = format!(
            "UPDATE {table} \
             SET state_id = $1, claim_token = $2, claimed_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM {table} \
                 WHERE state_id = $3 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {}",
            columns(kind)
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(RunState::Processing.id())
            .bind(claim_token)
            .bind(RunState::Queued.id())
            .fetch_optional(pool)
            .await
    }

    /// Mark a claimed run complete and write its payloads.
    ///
    /// Only applies while the run is `PROCESSING` under `claim_token`.
    /// `errors` is left untouched.
    pub async fn mark_complete(
        pool: &PgPool,
        kind: RunKind,
        id: DbId,
        claim_token: Uuid,
        result: &RunResult,
    ) -> Result<Option<Run>, sqlx::Error> {
        let html_assignment = if kind.has_results_html() {
            "results_html = $7, "
        } else {
            ""
        };
        let query = format!(
            "UPDATE {} \
             SET state_id = $3, responses = $4, scores = $5, {html_assignment}\
                 claim_token = NULL, claimed_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND claim_token = $2 AND state_id = $6 \
             RETURNING {}",
            kind.table(),
            columns(kind)
        );
        let mut q = sqlx::query_as::<_, Run>(&query)
            .bind(id)
            .bind(claim_token)
            .bind(RunState::Complete.id())
            .bind(Json(&result.responses))
            .bind(Json(&result.scores))
            .bind(RunState::Processing.id());
        if kind.has_results_html() {
            q = q.bind(&result.results_html);
        }
        q.fetch_optional(pool).await
    }

    /// Count a failed attempt.
    ///
    /// Accepted from `QUEUED` or `PROCESSING` (and, when `claim_token` is
    /// given, only for that claim). The run returns to `QUEUED` below
    /// `retry_ceiling` and becomes `ERROR` at it.
    pub async fn mark_failed(
        pool: &PgPool,
        kind: RunKind,
        id: DbId,
        claim_token: Option<Uuid>,
        retry_ceiling: i32,
    ) -> Result<Option<Run>, sqlx::Error> {
        let query = format!(
            "UPDATE {} \
             SET errors = errors + 1, \
                 state_id = CASE WHEN errors + 1 >= $3 THEN $4 ELSE $5 END, \
                 claim_token = NULL, claimed_at = NULL, updated_at = NOW() \
             WHERE id = $1 \
               AND state_id IN ($5, $6) \
               AND ($2::UUID IS NULL OR claim_token = $2) \
             RETURNING {}",
            kind.table(),
            columns(kind)
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(id)
            .bind(claim_token)
            .bind(retry_ceiling)
            .bind(RunState::Error.id())
            .bind(RunState::Queued.id())
            .bind(RunState::Processing.id())
            .fetch_optional(pool)
            .await
    }

    /// Put a run back in the queue with a fresh error counter.
    ///
    /// Idempotent for runs already `QUEUED`. Completed runs are left alone
    /// and yield `None`.
    pub async fn reset_for_retry(
        pool: &PgPool,
        kind: RunKind,
        slug: &str,
    ) -> Result<Option<Run>, sqlx::Error> {
        let query = format!(
            "UPDATE {} \
             SET state_id = $2, errors = 0, claim_token = NULL, claimed_at = NULL, \
                 updated_at = NOW() \
             WHERE slug = $1 AND state_id <> $3 \
             RETURNING {}",
            kind.table(),
            columns(kind)
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(slug)
            .bind(RunState::Queued.id())
            .bind(RunState::Complete.id())
            .fetch_optional(pool)
            .await
    }

    /// Treat `PROCESSING` claims older than `cutoff` as failed attempts.
    ///
    /// Returns the number of runs released.
    pub async fn requeue_stale(
        pool: &PgPool,
        kind: RunKind,
        cutoff: Timestamp,
        retry_ceiling: i32,
    ) -> Result<u64, sqlx::Error> {
        let query = format!(
            "UPDATE {} \
             SET errors = errors + 1, \
                 state_id = CASE WHEN errors + 1 >= $2 THEN $3 ELSE $4 END, \
                 claim_token = NULL, claimed_at = NULL, updated_at = NOW() \
             WHERE state_id = $5 AND claimed_at < $1",
            kind.table()
        );
        let result = sqlx::query(&query)
            .bind(cutoff)
            .bind(retry_ceiling)
            .bind(RunState::Error.id())
            .bind(RunState::Queued.id())
            .bind(RunState::Processing.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
