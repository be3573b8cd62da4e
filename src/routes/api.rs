use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use crate::db::{ReviewResult, ReviewStore};
use crate::error::{Error, Result};
use crate::review::{aggregate, coordinator, Decision};
use crate::state::AppState;
use crate::storage::download_name;

/// Per-reviewer results keyed by reviewer name, as rendered by the client.
pub fn results_map(rows: &[ReviewResult]) -> BTreeMap<String, serde_json::Value> {
    rows.iter()
        .map(|r| {
            (
                r.reviewer_name.clone(),
                serde_json::json!({
                    "decision": r.decision().as_str(),
                    "summary": r.summary.clone().unwrap_or_default(),
                    "full_review": r.full_review.clone().unwrap_or_default(),
                    "model_used": r.model_used,
                    "file_url": r.file_url,
                }),
            )
        })
        .collect()
}

/// Point-in-time snapshot for polling clients. The outcome is recomputed live
/// from whatever decisions exist, so partial progress is visible before the
/// submission finalizes; it never waits on outstanding reviewer tasks.
pub async fn check_status(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> impl IntoResponse {
    let submission = match state.store.get_submission(&submission_id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            return Json(serde_json::json!({
                "status": "not_found",
                "message": "Review not found."
            }))
            .into_response()
        }
        Err(e) => {
            tracing::error!("status lookup failed: {}", e);
            return Json(serde_json::json!({
                "status": "error",
                "message": "Database error."
            }))
            .into_response()
        }
    };

    let rows = match state.store.decisions(&submission_id).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("failed to load results: {}", e);
            return Json(serde_json::json!({
                "status": "error",
                "message": "Failed to load results."
            }))
            .into_response();
        }
    };

    let decisions: Vec<Decision> = rows.iter().map(|r| r.decision()).collect();
    let outcome = aggregate(&decisions);
    let status = if submission.processing_complete {
        "complete"
    } else {
        "processing"
    };

    Json(serde_json::json!({
        "status": status,
        "outcome": outcome.as_str(),
        "results": results_map(&rows),
        "all_accepted": submission.all_accepted,
        "certificate_filename": submission.certificate_filename,
        "error": submission.error,
    }))
    .into_response()
}

/// Re-run a single reviewer whose decision is ERROR and report the refreshed
/// aggregate outcome.
pub async fn retry_review(
    State(state): State<Arc<AppState>>,
    Path((submission_id, reviewer_name)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let outcome = coordinator::retry_reviewer(
        state.store.clone(),
        state.backend.clone(),
        state.config.results_folder.clone(),
        &submission_id,
        &reviewer_name,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "outcome": outcome.as_str(),
    })))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    if filename.contains("..") || filename.contains('/') || filename.is_empty() {
        return axum::response::Redirect::to("/").into_response();
    }

    let results_path = state.config.results_folder.join(&filename);
    match tokio::fs::read(&results_path).await {
        Ok(content) => {
            let mime = mime_guess::from_path(&filename)
                .first_raw()
                .unwrap_or("application/octet-stream");
            attachment_response(mime, &filename, content)
        }
        Err(_) => axum::response::Redirect::to("/").into_response(),
    }
}

pub async fn download_certificate(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> impl IntoResponse {
    let submission = match state.store.get_submission(&submission_id).await {
        Ok(Some(s)) => s,
        _ => return axum::response::Redirect::to("/").into_response(),
    };

    let cert_filename = match submission.certificate_filename {
        Some(f) => f,
        None => return axum::response::Redirect::to("/").into_response(),
    };

    let cert_path = state.config.results_folder.join(&cert_filename);
    let content = match tokio::fs::read(&cert_path).await {
        Ok(c) => c,
        Err(_) => return axum::response::Redirect::to("/").into_response(),
    };

    let name = download_name(submission.paper_title.as_deref(), "Certificate.pdf");
    attachment_response("application/pdf", &name, content)
}

/// Bundle the certificate and every per-reviewer report into one zip.
pub async fn download_all(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> std::result::Result<axum::response::Response, Error> {
    let submission = state
        .store
        .get_submission(&submission_id)
        .await?
        .ok_or_else(|| Error::NotFound(submission_id.clone()))?;

    let mut artifact_names: Vec<String> = submission
        .certificate_filename
        .iter()
        .cloned()
        .collect();
    for row in state.store.decisions(&submission_id).await? {
        if let Some(report) = row.file_url {
            artifact_names.push(report);
        }
    }

    let mut zip_data = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_data));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);

        for artifact in &artifact_names {
            let path = state.config.results_folder.join(artifact);
            let content = match tokio::fs::read(&path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("skipping missing artifact {}: {}", artifact, e);
                    continue;
                }
            };
            zip.start_file(artifact.as_str(), options)
                .map_err(|e| Error::Config(format!("zip write failed: {e}")))?;
            zip.write_all(&content)?;
        }

        zip.finish()
            .map_err(|e| Error::Config(format!("zip write failed: {e}")))?;
    }

    let name = download_name(submission.paper_title.as_deref(), "All_Reviews.zip");
    Ok(attachment_response("application/zip", &name, zip_data))
}

fn attachment_response(
    mime: &str,
    filename: &str,
    content: Vec<u8>,
) -> axum::response::Response {
    let builder = axum::response::Response::builder()
        .header("Content-Type", mime)
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename),
        );
    match builder.body(axum::body::Body::from(content)) {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!("failed to build download response: {}", e);
            axum::response::Redirect::to("/").into_response()
        }
    }
}
