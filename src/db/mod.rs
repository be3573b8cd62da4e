mod models;

pub use models::*;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::{Error, Result};

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> std::result::Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Durable record of submissions and per-reviewer decisions.
///
/// The store enforces the integrity rules, not their semantics: unique
/// submission ids, at most one decision per (submission, reviewer) pair, and
/// a single winning finalization per submission. What the decisions mean is
/// the aggregator's business.
#[async_trait]
pub trait ReviewStore: Send + Sync + 'static {
    /// Fails with `DuplicateSubmission` if the identifier is taken.
    async fn create_submission(&self, submission: NewSubmission) -> Result<()>;

    async fn get_submission(&self, submission_id: &str) -> Result<Option<Submission>>;

    /// Fails with `DuplicateDecision` on a second write for the same
    /// (submission, reviewer) pair.
    async fn insert_decision(&self, decision: NewDecision) -> Result<()>;

    /// Decisions in insertion order. A name sort would put "Reviewer 10"
    /// ahead of "Reviewer 2".
    async fn decisions(&self, submission_id: &str) -> Result<Vec<ReviewResult>>;

    /// Compare-and-set finalization: flips `processing_complete` false→true
    /// at most once. Repeating the identical terminal state is a no-op;
    /// a differing terminal state after completion is `AlreadyFinalized`.
    async fn mark_complete(&self, submission_id: &str, terminal: TerminalState) -> Result<()>;

    /// Retry path: overwrite a decision slot only while it holds `ERROR`.
    /// Any other stored decision is immutable and yields `DuplicateDecision`.
    async fn replace_error_decision(&self, decision: NewDecision) -> Result<()>;

    /// Retry path: refresh the derived aggregate fields of an already
    /// finalized submission after one of its decisions changed.
    async fn update_outcome(
        &self,
        submission_id: &str,
        all_accepted: bool,
        certificate_filename: Option<String>,
    ) -> Result<()>;
}

/// PostgreSQL-backed store; the production implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn create_submission(&self, submission: NewSubmission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO submissions (submission_id, paper_title, filename, file_path, processing_complete, all_accepted)
            VALUES ($1, $2, $3, $4, false, false)
            "#,
        )
        .bind(&submission.submission_id)
        .bind(&submission.paper_title)
        .bind(&submission.filename)
        .bind(&submission.file_path)
        .execute(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::DuplicateSubmission(submission.submission_id.clone())
            } else {
                Error::Database(e)
            }
        })?;
        Ok(())
    }

    async fn get_submission(&self, submission_id: &str) -> Result<Option<Submission>> {
        let row = sqlx::query_as::<_, Submission>(
            "SELECT * FROM submissions WHERE submission_id = $1",
        )
        .bind(submission_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn insert_decision(&self, decision: NewDecision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO review_results (submission_id, reviewer_name, decision, summary, full_review, model_used, file_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&decision.submission_id)
        .bind(&decision.reviewer_name)
        .bind(decision.decision.as_str())
        .bind(&decision.summary)
        .bind(&decision.full_review)
        .bind(&decision.model_used)
        .bind(&decision.file_url)
        .execute(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::DuplicateDecision {
                    submission_id: decision.submission_id.clone(),
                    reviewer_name: decision.reviewer_name.clone(),
                }
            } else {
                Error::Database(e)
            }
        })?;
        Ok(())
    }

    async fn decisions(&self, submission_id: &str) -> Result<Vec<ReviewResult>> {
        let rows = sqlx::query_as::<_, ReviewResult>(
            "SELECT * FROM review_results WHERE submission_id = $1 ORDER BY id",
        )
        .bind(submission_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn mark_complete(&self, submission_id: &str, terminal: TerminalState) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE submissions
            SET processing_complete = true, all_accepted = $2, certificate_filename = $3, error = $4
            WHERE submission_id = $1 AND processing_complete = false
            "#,
        )
        .bind(submission_id)
        .bind(terminal.all_accepted)
        .bind(&terminal.certificate_filename)
        .bind(&terminal.error)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        // Lost the CAS, or the submission does not exist. Identical terminal
        // state is idempotent; anything else is a conflicting finalize.
        let existing = self
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| Error::NotFound(submission_id.to_string()))?;

        let stored = TerminalState {
            all_accepted: existing.all_accepted,
            certificate_filename: existing.certificate_filename,
            error: existing.error,
        };
        if existing.processing_complete && stored == terminal {
            Ok(())
        } else {
            Err(Error::AlreadyFinalized(submission_id.to_string()))
        }
    }

    async fn replace_error_decision(&self, decision: NewDecision) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE review_results
            SET decision = $3, summary = $4, full_review = $5, model_used = $6, file_url = $7, created_at = now()
            WHERE submission_id = $1 AND reviewer_name = $2 AND decision = 'ERROR'
            "#,
        )
        .bind(&decision.submission_id)
        .bind(&decision.reviewer_name)
        .bind(decision.decision.as_str())
        .bind(&decision.summary)
        .bind(&decision.full_review)
        .bind(&decision.model_used)
        .bind(&decision.file_url)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let exists = sqlx::query(
            "SELECT 1 FROM review_results WHERE submission_id = $1 AND reviewer_name = $2",
        )
        .bind(&decision.submission_id)
        .bind(&decision.reviewer_name)
        .fetch_optional(self.pool())
        .await?
        .is_some();

        if exists {
            // Slot holds a non-ERROR decision; those are immutable.
            Err(Error::DuplicateDecision {
                submission_id: decision.submission_id,
                reviewer_name: decision.reviewer_name,
            })
        } else {
            Err(Error::NotFound(decision.submission_id))
        }
    }

    async fn update_outcome(
        &self,
        submission_id: &str,
        all_accepted: bool,
        certificate_filename: Option<String>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE submissions
            SET all_accepted = $2, certificate_filename = $3
            WHERE submission_id = $1 AND processing_complete = true
            "#,
        )
        .bind(submission_id)
        .bind(all_accepted)
        .bind(&certificate_filename)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 1 {
            Ok(())
        } else {
            Err(Error::NotFound(submission_id.to_string()))
        }
    }
}
