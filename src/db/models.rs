use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::review::Decision;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: i32,
    pub submission_id: String,
    pub paper_title: Option<String>,
    pub filename: Option<String>,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    pub processing_complete: bool,
    pub all_accepted: bool,
    pub error: Option<String>,
    pub certificate_filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub submission_id: String,
    pub paper_title: String,
    pub filename: String,
    pub file_path: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReviewResult {
    pub id: i32,
    pub submission_id: String,
    pub reviewer_name: String,
    pub decision: String,
    pub summary: Option<String>,
    pub full_review: Option<String>,
    pub model_used: Option<String>,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReviewResult {
    pub fn decision(&self) -> Decision {
        Decision::from_db(&self.decision)
    }
}

/// One reviewer's result as written by its owning task.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub submission_id: String,
    pub reviewer_name: String,
    pub decision: Decision,
    pub summary: String,
    pub full_review: String,
    pub model_used: Option<String>,
    pub file_url: Option<String>,
}

/// Terminal submission state written exactly once by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalState {
    pub all_accepted: bool,
    pub certificate_filename: Option<String>,
    pub error: Option<String>,
}
