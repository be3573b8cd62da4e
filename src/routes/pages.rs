use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect},
};
use std::sync::Arc;
use tera::Context;

use crate::agents::extract_pdf_text;
use crate::db::{NewSubmission, ReviewStore, TerminalState};
use crate::review::coordinator::{self, DispatchSettings};
use crate::review::{aggregate, Decision};
use crate::state::AppState;
use crate::storage::{generate_submission_id, sanitize_filename};

pub async fn index() -> impl IntoResponse {
    render_template("index.html", Context::new())
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: axum::extract::Multipart,
) -> impl IntoResponse {
    let mut paper_title = String::new();
    let mut paper_data: Option<Vec<u8>> = None;
    let mut filename = String::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        if name == "paper_title" {
            if let Ok(text) = field.text().await {
                paper_title = text;
            }
        } else if name == "paper" {
            filename = sanitize_filename(field.file_name().unwrap_or("paper.pdf"));
            if let Ok(data) = field.bytes().await {
                paper_data = Some(data.to_vec());
            }
        }
    }

    let paper_data = match paper_data {
        Some(d) if !d.is_empty() => d,
        _ => return Redirect::to("/").into_response(),
    };

    if !filename.to_lowercase().ends_with(".pdf") {
        return Redirect::to("/").into_response();
    }

    let submission_id = generate_submission_id();
    let upload_path = state
        .config
        .upload_folder
        .join(format!("{}_{}", submission_id, filename));

    if let Err(e) = tokio::fs::write(&upload_path, &paper_data).await {
        tracing::error!("failed to store upload: {}", e);
        return Redirect::to("/").into_response();
    }

    let title = derive_title(&paper_title, &filename);

    let created = state
        .store
        .create_submission(NewSubmission {
            submission_id: submission_id.clone(),
            paper_title: title.clone(),
            filename: filename.clone(),
            file_path: upload_path.to_string_lossy().into_owned(),
        })
        .await;
    if let Err(e) = created {
        tracing::error!("failed to create submission: {}", e);
        // Creation and dispatch registration are atomic from the client's
        // view: no orphaned file if the record never existed.
        let _ = tokio::fs::remove_file(&upload_path).await;
        return Redirect::to("/").into_response();
    }

    let store = state.store.clone();
    let backend = state.backend.clone();
    let settings = DispatchSettings {
        reviewers: coordinator::reviewer_names(state.config.num_reviewers),
        timeout: state.config.review_timeout,
        results_folder: state.config.results_folder.clone(),
    };
    let sub_id = submission_id.clone();
    tokio::spawn(async move {
        // Extraction failure is a submission-level terminal error: there is
        // nothing to fan out.
        let paper_text = match extract_pdf_text(upload_path.clone()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("extraction failed for {}: {}", sub_id, e);
                let terminal = TerminalState {
                    all_accepted: false,
                    certificate_filename: None,
                    error: Some(e.to_string()),
                };
                if let Err(e) = store.mark_complete(&sub_id, terminal).await {
                    tracing::error!("failed to record extraction failure: {}", e);
                }
                return;
            }
        };

        if let Err(e) = coordinator::dispatch(store, backend, settings, sub_id, paper_text).await {
            tracing::error!("background review failed: {}", e);
        }
    });

    Redirect::to(&format!("/results/{}", submission_id)).into_response()
}

pub async fn view_results(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> impl IntoResponse {
    let submission = match state.store.get_submission(&submission_id).await {
        Ok(Some(s)) => s,
        _ => return Redirect::to("/").into_response(),
    };

    let rows = match state.store.decisions(&submission_id).await {
        Ok(r) => r,
        Err(_) => return Redirect::to("/").into_response(),
    };
    let decisions: Vec<Decision> = rows.iter().map(|r| r.decision()).collect();
    let outcome = aggregate(&decisions);

    let mut ctx = Context::new();
    ctx.insert("submission_id", &submission_id);
    ctx.insert("paper_title", &submission.paper_title);
    ctx.insert("results", &super::api::results_map(&rows));
    ctx.insert("outcome", outcome.as_str());
    ctx.insert("all_accepted", &submission.all_accepted);
    ctx.insert(
        "certificate_filename",
        &submission.certificate_filename.unwrap_or_default(),
    );
    ctx.insert("processing", &!submission.processing_complete);
    ctx.insert("error", &submission.error.unwrap_or_default());

    render_template("results.html", ctx)
}

/// Title defaults to the filename with one trailing `.pdf` removed, whatever
/// its case. "a.pdf.pdf" keeps its inner extension.
fn derive_title(paper_title: &str, filename: &str) -> String {
    let trimmed = paper_title.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    if filename.to_lowercase().ends_with(".pdf") {
        filename[..filename.len() - 4].to_string()
    } else {
        filename.to_string()
    }
}

fn render_template(name: &str, ctx: Context) -> axum::response::Response {
    let tera = crate::templates::get_tera();
    let rendered = tera
        .render(name, &ctx)
        .unwrap_or_else(|_| format!("Template error: {}", name));
    Html(rendered).into_response()
}

#[cfg(test)]
mod tests {
    use super::derive_title;

    #[test]
    fn explicit_title_wins_over_the_filename() {
        assert_eq!(derive_title("  Attention Is All You Need  ", "x.pdf"), "Attention Is All You Need");
    }

    #[test]
    fn fallback_strips_one_pdf_suffix_of_any_case() {
        assert_eq!(derive_title("", "paper.pdf"), "paper");
        assert_eq!(derive_title("   ", "Paper.PDF"), "Paper");
        assert_eq!(derive_title("", "a.pdf.pdf"), "a.pdf");
    }
}
