use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Service-wide error taxonomy. Integrity violations are raised at the store
/// boundary; reviewer faults are contained inside the owning task and only
/// reach this type when a caller explicitly asks for a single reviewer run
/// (the retry endpoint).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("submission {0} already exists")]
    DuplicateSubmission(String),

    #[error("decision already recorded for {submission_id}/{reviewer_name}")]
    DuplicateDecision {
        submission_id: String,
        reviewer_name: String,
    },

    #[error("submission {0} is already finalized")]
    AlreadyFinalized(String),

    #[error("submission {0} is still being processed")]
    StillProcessing(String),

    #[error("submission {0} not found")]
    NotFound(String),

    #[error("reviewer backend failed: {0}")]
    Backend(String),

    #[error("review text could not be classified into a decision")]
    UnclassifiableReview,

    #[error("reviewer timed out")]
    Timeout,

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::DuplicateSubmission(_)
            | Error::DuplicateDecision { .. }
            | Error::AlreadyFinalized(_)
            | Error::StillProcessing(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            Error::Backend(_) | Error::UnclassifiableReview | Error::Timeout => {
                StatusCode::BAD_GATEWAY
            }
            Error::Database(_) | Error::Io(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = axum::Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
