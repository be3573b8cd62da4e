mod claude;

pub use claude::ClaudeAgent;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// One completed backend call: the raw review text plus the model that
/// produced it.
#[derive(Debug, Clone)]
pub struct BackendReview {
    pub text: String,
    pub model: String,
}

/// External reviewer backend. One call evaluates one paper; the coordinator
/// owns concurrency, timeouts, and persistence.
#[async_trait]
pub trait ReviewBackend: Send + Sync + 'static {
    async fn review_paper(&self, paper_text: &str) -> Result<BackendReview>;
}

/// Extract the text of an uploaded PDF. Runs the extraction off the async
/// runtime; pdf-extract is CPU-bound and can take seconds on large papers.
pub async fn extract_pdf_text(pdf_path: PathBuf) -> Result<String> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&pdf_path))
        .await
        .map_err(|e| Error::Backend(format!("extraction task failed: {e}")))?
        .map_err(|e| Error::InvalidUpload(format!("PDF extraction error: {e}")))?;

    if text.trim().len() < 100 {
        return Err(Error::InvalidUpload(format!(
            "PDF appears empty or has insufficient text ({} chars)",
            text.len()
        )));
    }

    Ok(text)
}

/// Map raw backend failures to the message persisted in an ERROR decision
/// row, which the results page shows to the author.
pub fn friendly_error_message(error: &Error) -> String {
    let raw = error.to_string();
    if raw.contains("rate_limit_error") || raw.contains("429") {
        "Our review system is currently busy. Please wait 60 seconds and try again.".to_string()
    } else if raw.contains("authentication_error") || raw.contains("invalid x-api-key") {
        "There was an issue with our review system. Please contact support.".to_string()
    } else if matches!(error, Error::Timeout) {
        "The reviewer did not respond in time. Please retry this review.".to_string()
    } else if matches!(error, Error::UnclassifiableReview) {
        "The reviewer's response could not be classified. Please retry this review.".to_string()
    } else {
        "An unexpected error occurred. Please try again or contact support if the issue persists."
            .to_string()
    }
}
