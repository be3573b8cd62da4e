//! Fan-out coordinator: runs every reviewer for one submission concurrently,
//! converts per-reviewer faults into persisted ERROR decisions, enforces the
//! submission-level timeout, and finalizes the submission exactly once.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agents::{extract_pdf_text, friendly_error_message, ReviewBackend};
use crate::db::{NewDecision, ReviewStore, TerminalState};
use crate::error::{Error, Result};
use crate::review::{aggregate, classify_review, has_academic_structure, Decision, Outcome};

const NOT_ACADEMIC_SUMMARY: &str = "REJECTED: The submitted document does not appear to be a \
proper academic paper. It lacks required academic structure and citations.";

const LOST_DECISIONS_ERROR: &str = "One or more reviewer decisions could not be recorded. \
Please submit the paper again.";

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub reviewers: Vec<String>,
    pub timeout: Duration,
    pub results_folder: PathBuf,
}

pub fn reviewer_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("Reviewer {i}")).collect()
}

/// Run all reviewers for one submission and finalize it.
///
/// The caller is expected to have already returned the submission id to the
/// client; this runs inside a spawned background task. Re-dispatch of a
/// finalized submission is rejected with `AlreadyFinalized`.
pub async fn dispatch<S: ReviewStore, B: ReviewBackend>(
    store: Arc<S>,
    backend: Arc<B>,
    settings: DispatchSettings,
    submission_id: String,
    paper_text: String,
) -> Result<()> {
    let submission = store
        .get_submission(&submission_id)
        .await?
        .ok_or_else(|| Error::NotFound(submission_id.clone()))?;
    if submission.processing_complete {
        return Err(Error::AlreadyFinalized(submission_id));
    }
    let title = submission
        .paper_title
        .unwrap_or_else(|| submission_id.clone());

    // Structural screen before spending any backend calls: a document that is
    // not an academic paper gets a unanimous rejection.
    if !has_academic_structure(&paper_text) {
        info!("submission {} failed the academic-structure screen", submission_id);
        let mut fault = None;
        for reviewer_name in &settings.reviewers {
            let written = record_decision(
                store.as_ref(),
                NewDecision {
                    submission_id: submission_id.clone(),
                    reviewer_name: reviewer_name.clone(),
                    decision: Decision::Rejected,
                    summary: NOT_ACADEMIC_SUMMARY.to_string(),
                    full_review: NOT_ACADEMIC_SUMMARY.to_string(),
                    model_used: None,
                    file_url: None,
                },
            )
            .await;
            if let Err(e) = written {
                fault = Some(e);
                break;
            }
        }
        return finalize(store.as_ref(), &settings, &submission_id, &title, fault).await;
    }

    let mut tasks = JoinSet::new();
    for reviewer_name in settings.reviewers.clone() {
        let store = store.clone();
        let backend = backend.clone();
        let submission_id = submission_id.clone();
        let paper_text = paper_text.clone();
        let results_folder = settings.results_folder.clone();
        tasks.spawn(async move {
            run_reviewer(
                store,
                backend,
                submission_id,
                reviewer_name,
                paper_text,
                results_folder,
            )
            .await
        });
    }

    // A lost decision write is a submission-level fault: it must end up in the
    // terminal error, never be merged away as a missing row.
    let mut fault: Option<Error> = None;
    let drained = tokio::time::timeout(settings.timeout, async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("decision write lost for {}: {}", submission_id, e);
                    fault = Some(e);
                }
                Err(e) => {
                    warn!("reviewer task for {} panicked: {}", submission_id, e);
                }
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "submission {} hit the {}s review timeout with reviewers outstanding",
            submission_id,
            settings.timeout.as_secs()
        );
        tasks.abort_all();

        // Any reviewer still without a row becomes a timeout ERROR. Decisions
        // already written stay untouched; if a racing task lands its row
        // between the read and our insert, the uniqueness constraint keeps it.
        let recorded: HashSet<String> = store
            .decisions(&submission_id)
            .await?
            .into_iter()
            .map(|r| r.reviewer_name)
            .collect();
        let message = friendly_error_message(&Error::Timeout);
        for reviewer_name in &settings.reviewers {
            if recorded.contains(reviewer_name) {
                continue;
            }
            let written = record_decision(
                store.as_ref(),
                NewDecision {
                    submission_id: submission_id.clone(),
                    reviewer_name: reviewer_name.clone(),
                    decision: Decision::Error,
                    summary: message.clone(),
                    full_review: message.clone(),
                    model_used: None,
                    file_url: None,
                },
            )
            .await;
            if let Err(e) = written {
                fault = Some(e);
            }
        }
    }

    finalize(store.as_ref(), &settings, &submission_id, &title, fault).await
}

/// Re-run a single reviewer whose stored decision is ERROR, then refresh the
/// submission's derived aggregate state. Non-ERROR slots are immutable.
pub async fn retry_reviewer<S: ReviewStore, B: ReviewBackend>(
    store: Arc<S>,
    backend: Arc<B>,
    results_folder: PathBuf,
    submission_id: &str,
    reviewer_name: &str,
) -> Result<Outcome> {
    let submission = store
        .get_submission(submission_id)
        .await?
        .ok_or_else(|| Error::NotFound(submission_id.to_string()))?;
    if !submission.processing_complete {
        return Err(Error::StillProcessing(submission_id.to_string()));
    }

    let rows = store.decisions(submission_id).await?;
    let slot = rows
        .iter()
        .find(|r| r.reviewer_name == reviewer_name)
        .ok_or_else(|| Error::NotFound(submission_id.to_string()))?;
    if slot.decision() != Decision::Error {
        return Err(Error::DuplicateDecision {
            submission_id: submission_id.to_string(),
            reviewer_name: reviewer_name.to_string(),
        });
    }

    let paper_text = extract_pdf_text(PathBuf::from(&submission.file_path)).await?;
    let replacement = evaluate(
        backend.as_ref(),
        submission_id,
        reviewer_name,
        &paper_text,
        &results_folder,
    )
    .await
    .unwrap_or_else(|e| {
        warn!("retry of {}/{} failed: {}", submission_id, reviewer_name, e);
        error_decision(submission_id, reviewer_name, &e)
    });
    store.replace_error_decision(replacement).await?;

    let rows = store.decisions(submission_id).await?;
    let decisions: Vec<Decision> = rows.iter().map(|r| r.decision()).collect();
    let outcome = aggregate(&decisions);
    let all_accepted = outcome == Outcome::Accepted;

    let title = submission
        .paper_title
        .unwrap_or_else(|| submission_id.to_string());
    let certificate_filename = if all_accepted {
        match submission.certificate_filename {
            Some(existing) => Some(existing),
            None => generate_certificate(submission_id, &title, &results_folder).await,
        }
    } else {
        submission.certificate_filename
    };

    store
        .update_outcome(submission_id, all_accepted, certificate_filename)
        .await?;
    Ok(outcome)
}

/// One reviewer task. Review faults are contained here and persisted as an
/// ERROR decision; nothing escapes to abort sibling tasks. The only error a
/// task reports is a refused decision write, which the dispatcher turns into
/// a terminal submission error.
async fn run_reviewer<S: ReviewStore, B: ReviewBackend>(
    store: Arc<S>,
    backend: Arc<B>,
    submission_id: String,
    reviewer_name: String,
    paper_text: String,
    results_folder: PathBuf,
) -> Result<()> {
    let decision = evaluate(
        backend.as_ref(),
        &submission_id,
        &reviewer_name,
        &paper_text,
        &results_folder,
    )
    .await
    .unwrap_or_else(|e| {
        warn!("{}/{} review failed: {}", submission_id, reviewer_name, e);
        error_decision(&submission_id, &reviewer_name, &e)
    });

    record_decision(store.as_ref(), decision).await
}

async fn evaluate<B: ReviewBackend>(
    backend: &B,
    submission_id: &str,
    reviewer_name: &str,
    paper_text: &str,
    results_folder: &std::path::Path,
) -> Result<NewDecision> {
    let review = backend.review_paper(paper_text).await?;
    let verdict = classify_review(&review.text)?;

    // The report PDF is a best-effort artifact; losing it never fails the
    // review itself.
    let report_name = format!(
        "{}_{}_Analysis.pdf",
        submission_id,
        reviewer_name.replace(' ', "")
    );
    let report_path = results_folder.join(&report_name);
    let file_url = {
        let review_text = review.text.clone();
        let reviewer = reviewer_name.to_string();
        let sub_id = submission_id.to_string();
        let rendered = tokio::task::spawn_blocking(move || {
            crate::pdf::generate_review_report(&review_text, &reviewer, &sub_id, &report_path)
        })
        .await;
        match rendered {
            Ok(Ok(())) => Some(report_name),
            Ok(Err(e)) => {
                warn!("report PDF for {}/{} failed: {}", submission_id, reviewer_name, e);
                None
            }
            Err(e) => {
                warn!("report PDF task for {}/{} panicked: {}", submission_id, reviewer_name, e);
                None
            }
        }
    };

    Ok(NewDecision {
        submission_id: submission_id.to_string(),
        reviewer_name: reviewer_name.to_string(),
        decision: verdict.decision,
        summary: verdict.summary,
        full_review: verdict.full_review,
        model_used: Some(review.model),
        file_url,
    })
}

fn error_decision(submission_id: &str, reviewer_name: &str, error: &Error) -> NewDecision {
    let message = friendly_error_message(error);
    NewDecision {
        submission_id: submission_id.to_string(),
        reviewer_name: reviewer_name.to_string(),
        decision: Decision::Error,
        summary: message.clone(),
        full_review: message,
        model_used: None,
        file_url: None,
    }
}

/// A duplicate is benign (a racing task already landed the row); any other
/// store refusal is reported so the dispatcher can finalize with an error.
async fn record_decision<S: ReviewStore>(store: &S, decision: NewDecision) -> Result<()> {
    let submission_id = decision.submission_id.clone();
    let reviewer_name = decision.reviewer_name.clone();
    match store.insert_decision(decision).await {
        Ok(()) => Ok(()),
        Err(Error::DuplicateDecision { .. }) => {
            debug!("decision for {}/{} already recorded", submission_id, reviewer_name);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Aggregate whatever decisions exist and flip the submission terminal. The
/// store's compare-and-set guarantees at most one finalize wins.
///
/// A finalized submission without an error must hold a decision for every
/// dispatched reviewer. If a decision write was lost, or a reviewer has no
/// row for any other reason, the submission finalizes with an error instead
/// of posing as cleanly complete.
async fn finalize<S: ReviewStore>(
    store: &S,
    settings: &DispatchSettings,
    submission_id: &str,
    paper_title: &str,
    fault: Option<Error>,
) -> Result<()> {
    let rows = store.decisions(submission_id).await?;

    let missing = settings
        .reviewers
        .iter()
        .any(|name| !rows.iter().any(|row| &row.reviewer_name == name));
    if fault.is_some() || missing {
        warn!(
            "submission {} finalized with lost reviewer decisions",
            submission_id
        );
        store
            .mark_complete(
                submission_id,
                TerminalState {
                    all_accepted: false,
                    certificate_filename: None,
                    error: Some(LOST_DECISIONS_ERROR.to_string()),
                },
            )
            .await?;
        return match fault {
            Some(e) => Err(e),
            None => Ok(()),
        };
    }

    let decisions: Vec<Decision> = rows.iter().map(|r| r.decision()).collect();
    let outcome = aggregate(&decisions);
    let all_accepted = outcome == Outcome::Accepted;

    let certificate_filename = if all_accepted {
        generate_certificate(submission_id, paper_title, &settings.results_folder).await
    } else {
        None
    };

    info!("submission {} finalized with outcome {}", submission_id, outcome);
    store
        .mark_complete(
            submission_id,
            TerminalState {
                all_accepted,
                certificate_filename,
                error: None,
            },
        )
        .await
}

/// Best effort: an accepted paper without a certificate is still accepted.
async fn generate_certificate(
    submission_id: &str,
    paper_title: &str,
    results_folder: &std::path::Path,
) -> Option<String> {
    let certificate_name = format!("{submission_id}_certificate.pdf");
    let certificate_path = results_folder.join(&certificate_name);
    let title = paper_title.to_string();
    let rendered =
        tokio::task::spawn_blocking(move || crate::pdf::generate_certificate(&title, &certificate_path))
            .await;
    match rendered {
        Ok(Ok(())) => Some(certificate_name),
        Ok(Err(e)) => {
            warn!("certificate for {} failed: {}", submission_id, e);
            None
        }
        Err(e) => {
            warn!("certificate task for {} panicked: {}", submission_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::BackendReview;
    use crate::db::{NewSubmission, ReviewResult, Submission};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory `ReviewStore` mirroring the PostgreSQL contract: unique ids,
    /// unique (submission, reviewer) pairs, CAS finalize.
    #[derive(Default)]
    struct MemStore {
        inner: Mutex<MemState>,
    }

    #[derive(Default)]
    struct MemState {
        submissions: HashMap<String, Submission>,
        decisions: Vec<ReviewResult>,
        next_id: i32,
        fail_inserts: bool,
    }

    impl MemStore {
        fn seeded(submission_id: &str) -> Arc<Self> {
            let store = Arc::new(Self::default());
            let mut state = store.inner.lock().unwrap();
            state.submissions.insert(
                submission_id.to_string(),
                Submission {
                    id: 1,
                    submission_id: submission_id.to_string(),
                    paper_title: Some("Test Paper".to_string()),
                    filename: Some("paper.pdf".to_string()),
                    file_path: "/tmp/nowhere.pdf".to_string(),
                    created_at: Utc::now(),
                    processing_complete: false,
                    all_accepted: false,
                    error: None,
                    certificate_filename: None,
                },
            );
            drop(state);
            store
        }

        fn submission(&self, id: &str) -> Submission {
            self.inner.lock().unwrap().submissions[id].clone()
        }

        fn decision_values(&self, id: &str) -> Vec<Decision> {
            self.inner
                .lock()
                .unwrap()
                .decisions
                .iter()
                .filter(|d| d.submission_id == id)
                .map(|d| d.decision())
                .collect()
        }
    }

    #[async_trait]
    impl ReviewStore for MemStore {
        async fn create_submission(&self, submission: NewSubmission) -> Result<()> {
            let mut state = self.inner.lock().unwrap();
            if state.submissions.contains_key(&submission.submission_id) {
                return Err(Error::DuplicateSubmission(submission.submission_id));
            }
            state.next_id += 1;
            let id = state.next_id;
            state.submissions.insert(
                submission.submission_id.clone(),
                Submission {
                    id,
                    submission_id: submission.submission_id,
                    paper_title: Some(submission.paper_title),
                    filename: Some(submission.filename),
                    file_path: submission.file_path,
                    created_at: Utc::now(),
                    processing_complete: false,
                    all_accepted: false,
                    error: None,
                    certificate_filename: None,
                },
            );
            Ok(())
        }

        async fn get_submission(&self, submission_id: &str) -> Result<Option<Submission>> {
            Ok(self.inner.lock().unwrap().submissions.get(submission_id).cloned())
        }

        async fn insert_decision(&self, decision: NewDecision) -> Result<()> {
            let mut state = self.inner.lock().unwrap();
            if state.fail_inserts {
                return Err(Error::Database(sqlx::Error::PoolClosed));
            }
            if state
                .decisions
                .iter()
                .any(|d| d.submission_id == decision.submission_id
                    && d.reviewer_name == decision.reviewer_name)
            {
                return Err(Error::DuplicateDecision {
                    submission_id: decision.submission_id,
                    reviewer_name: decision.reviewer_name,
                });
            }
            state.next_id += 1;
            let id = state.next_id;
            state.decisions.push(ReviewResult {
                id,
                submission_id: decision.submission_id,
                reviewer_name: decision.reviewer_name,
                decision: decision.decision.as_str().to_string(),
                summary: Some(decision.summary),
                full_review: Some(decision.full_review),
                model_used: decision.model_used,
                file_url: decision.file_url,
                created_at: Utc::now(),
            });
            Ok(())
        }

        async fn decisions(&self, submission_id: &str) -> Result<Vec<ReviewResult>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .decisions
                .iter()
                .filter(|d| d.submission_id == submission_id)
                .cloned()
                .collect())
        }

        async fn mark_complete(&self, submission_id: &str, terminal: TerminalState) -> Result<()> {
            let mut state = self.inner.lock().unwrap();
            let submission = state
                .submissions
                .get_mut(submission_id)
                .ok_or_else(|| Error::NotFound(submission_id.to_string()))?;
            if submission.processing_complete {
                let stored = TerminalState {
                    all_accepted: submission.all_accepted,
                    certificate_filename: submission.certificate_filename.clone(),
                    error: submission.error.clone(),
                };
                return if stored == terminal {
                    Ok(())
                } else {
                    Err(Error::AlreadyFinalized(submission_id.to_string()))
                };
            }
            submission.processing_complete = true;
            submission.all_accepted = terminal.all_accepted;
            submission.certificate_filename = terminal.certificate_filename;
            submission.error = terminal.error;
            Ok(())
        }

        async fn replace_error_decision(&self, decision: NewDecision) -> Result<()> {
            let mut state = self.inner.lock().unwrap();
            let slot = state.decisions.iter_mut().find(|d| {
                d.submission_id == decision.submission_id
                    && d.reviewer_name == decision.reviewer_name
            });
            match slot {
                Some(row) if row.decision == "ERROR" => {
                    row.decision = decision.decision.as_str().to_string();
                    row.summary = Some(decision.summary);
                    row.full_review = Some(decision.full_review);
                    row.model_used = decision.model_used;
                    row.file_url = decision.file_url;
                    Ok(())
                }
                Some(_) => Err(Error::DuplicateDecision {
                    submission_id: decision.submission_id,
                    reviewer_name: decision.reviewer_name,
                }),
                None => Err(Error::NotFound(decision.submission_id)),
            }
        }

        async fn update_outcome(
            &self,
            submission_id: &str,
            all_accepted: bool,
            certificate_filename: Option<String>,
        ) -> Result<()> {
            let mut state = self.inner.lock().unwrap();
            let submission = state
                .submissions
                .get_mut(submission_id)
                .ok_or_else(|| Error::NotFound(submission_id.to_string()))?;
            submission.all_accepted = all_accepted;
            submission.certificate_filename = certificate_filename;
            Ok(())
        }
    }

    /// Scripted backend: each call pops the next reply; `Hang` never resolves.
    enum StubReply {
        Review(&'static str),
        Fail(&'static str),
        Hang,
    }

    struct StubBackend {
        replies: Mutex<Vec<StubReply>>,
    }

    impl StubBackend {
        fn new(replies: Vec<StubReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl ReviewBackend for StubBackend {
        async fn review_paper(&self, _paper_text: &str) -> Result<BackendReview> {
            let reply = self.replies.lock().unwrap().pop();
            match reply {
                Some(StubReply::Review(text)) => Ok(BackendReview {
                    text: text.to_string(),
                    model: "stub-model".to_string(),
                }),
                Some(StubReply::Fail(msg)) => Err(Error::Backend(msg.to_string())),
                Some(StubReply::Hang) | None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    const ACCEPT: &str = "Solid work.\n\nFINAL DECISION: **ACCEPTED**";
    const REVISE: &str = "Needs work.\n\nFINAL DECISION: **ACCEPTED WITH MINOR REVISION REQUIRED**";
    const REJECT: &str = "Not publishable.\n\nFINAL DECISION: **REJECTED**";

    const ACADEMIC_PAPER: &str = "ABSTRACT\nWe study things.\nINTRODUCTION\nPrior work \
(Smith et al. 2019) is extended.\nRESULTS\nGood ones.\nREFERENCES\n[1] Smith et al.";

    fn settings(reviewers: usize, timeout: Duration) -> DispatchSettings {
        DispatchSettings {
            reviewers: reviewer_names(reviewers),
            timeout,
            results_folder: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn fan_out_records_one_decision_per_reviewer() {
        let store = MemStore::seeded("sub-1");
        let backend = StubBackend::new(vec![
            StubReply::Review(ACCEPT),
            StubReply::Review(ACCEPT),
            StubReply::Review(ACCEPT),
        ]);

        dispatch(
            store.clone(),
            backend,
            settings(3, Duration::from_secs(5)),
            "sub-1".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap();

        let decisions = store.decision_values("sub-1");
        assert_eq!(decisions.len(), 3);
        assert_eq!(aggregate(&decisions), Outcome::Accepted);

        let submission = store.submission("sub-1");
        assert!(submission.processing_complete);
        assert!(submission.all_accepted);
    }

    #[tokio::test]
    async fn stored_all_accepted_matches_the_aggregate() {
        let store = MemStore::seeded("sub-2");
        let backend = StubBackend::new(vec![
            StubReply::Review(ACCEPT),
            StubReply::Review(REVISE),
            StubReply::Review(ACCEPT),
        ]);

        dispatch(
            store.clone(),
            backend,
            settings(3, Duration::from_secs(5)),
            "sub-2".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap();

        let decisions = store.decision_values("sub-2");
        assert_eq!(aggregate(&decisions), Outcome::Revision);
        assert!(!store.submission("sub-2").all_accepted);
    }

    #[tokio::test]
    async fn backend_failure_becomes_an_error_decision_without_aborting_siblings() {
        let store = MemStore::seeded("sub-3");
        let backend = StubBackend::new(vec![
            StubReply::Review(ACCEPT),
            StubReply::Fail("rate_limit_error"),
            StubReply::Review(ACCEPT),
        ]);

        dispatch(
            store.clone(),
            backend,
            settings(3, Duration::from_secs(5)),
            "sub-3".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap();

        let decisions = store.decision_values("sub-3");
        assert_eq!(decisions.len(), 3);
        assert_eq!(
            decisions.iter().filter(|d| **d == Decision::Error).count(),
            1
        );
        assert_eq!(aggregate(&decisions), Outcome::Error);
        let submission = store.submission("sub-3");
        assert!(submission.processing_complete);
        assert!(!submission.all_accepted);
    }

    #[tokio::test]
    async fn unclassifiable_review_is_an_error_never_a_guess() {
        let store = MemStore::seeded("sub-4");
        let backend = StubBackend::new(vec![StubReply::Review(
            "Pretty good paper, probably fine to publish.",
        )]);

        dispatch(
            store.clone(),
            backend,
            settings(1, Duration::from_secs(5)),
            "sub-4".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap();

        assert_eq!(store.decision_values("sub-4"), vec![Decision::Error]);
    }

    #[tokio::test]
    async fn timeout_downgrades_outstanding_reviewers_to_error() {
        let store = MemStore::seeded("sub-5");
        // Replies are popped concurrently, so which reviewer hangs is
        // arbitrary; counts are what matter.
        let backend = StubBackend::new(vec![
            StubReply::Review(ACCEPT),
            StubReply::Hang,
            StubReply::Review(ACCEPT),
        ]);

        dispatch(
            store.clone(),
            backend,
            settings(3, Duration::from_millis(800)),
            "sub-5".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap();

        let decisions = store.decision_values("sub-5");
        assert_eq!(decisions.len(), 3);
        assert_eq!(
            decisions.iter().filter(|d| **d == Decision::Error).count(),
            1
        );
        assert_eq!(aggregate(&decisions), Outcome::Error);
        assert!(store.submission("sub-5").processing_complete);
    }

    #[tokio::test]
    async fn redispatch_of_a_finalized_submission_is_rejected() {
        let store = MemStore::seeded("sub-6");
        store
            .mark_complete(
                "sub-6",
                TerminalState {
                    all_accepted: false,
                    certificate_filename: None,
                    error: None,
                },
            )
            .await
            .unwrap();

        let backend = StubBackend::new(vec![StubReply::Review(ACCEPT)]);
        let err = dispatch(
            store,
            backend,
            settings(1, Duration::from_secs(5)),
            "sub-6".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn non_academic_document_is_rejected_without_backend_calls() {
        let store = MemStore::seeded("sub-7");
        // An empty script would hang any backend call; none must happen.
        let backend = StubBackend::new(vec![]);

        tokio::time::timeout(
            Duration::from_secs(1),
            dispatch(
                store.clone(),
                backend,
                settings(3, Duration::from_secs(5)),
                "sub-7".to_string(),
                "Dear diary, definitely not a paper.".to_string(),
            ),
        )
        .await
        .expect("structural rejection must not call the backend")
        .unwrap();

        let decisions = store.decision_values("sub-7");
        assert_eq!(decisions, vec![Decision::Rejected; 3]);
        assert!(store.submission("sub-7").processing_complete);
    }

    #[tokio::test]
    async fn mark_complete_is_idempotent_and_rejects_conflicts() {
        let store = MemStore::seeded("sub-8");
        let terminal = TerminalState {
            all_accepted: true,
            certificate_filename: Some("sub-8_certificate.pdf".to_string()),
            error: None,
        };

        store.mark_complete("sub-8", terminal.clone()).await.unwrap();
        // Identical terminal state: no-op.
        store.mark_complete("sub-8", terminal).await.unwrap();

        let conflicting = TerminalState {
            all_accepted: false,
            certificate_filename: None,
            error: Some("boom".to_string()),
        };
        let err = store.mark_complete("sub-8", conflicting).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn retry_is_refused_for_non_error_slots() {
        let store = MemStore::seeded("sub-9");
        store
            .insert_decision(NewDecision {
                submission_id: "sub-9".to_string(),
                reviewer_name: "Reviewer 1".to_string(),
                decision: Decision::Accepted,
                summary: "ok".to_string(),
                full_review: "ok".to_string(),
                model_used: None,
                file_url: None,
            })
            .await
            .unwrap();
        store
            .mark_complete(
                "sub-9",
                TerminalState {
                    all_accepted: true,
                    certificate_filename: None,
                    error: None,
                },
            )
            .await
            .unwrap();

        let backend = StubBackend::new(vec![StubReply::Review(ACCEPT)]);
        let err = retry_reviewer(
            store,
            backend,
            std::env::temp_dir(),
            "sub-9",
            "Reviewer 1",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateDecision { .. }));
    }

    #[tokio::test]
    async fn retry_is_refused_while_still_processing() {
        let store = MemStore::seeded("sub-10");
        store
            .insert_decision(error_decision("sub-10", "Reviewer 1", &Error::Timeout))
            .await
            .unwrap();

        let backend = StubBackend::new(vec![StubReply::Review(ACCEPT)]);
        let err = retry_reviewer(
            store,
            backend,
            std::env::temp_dir(),
            "sub-10",
            "Reviewer 1",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::StillProcessing(_)));
    }

    #[tokio::test]
    async fn replace_error_decision_only_touches_error_slots() {
        let store = MemStore::seeded("sub-11");
        store
            .insert_decision(error_decision("sub-11", "Reviewer 1", &Error::Timeout))
            .await
            .unwrap();

        let replacement = NewDecision {
            submission_id: "sub-11".to_string(),
            reviewer_name: "Reviewer 1".to_string(),
            decision: Decision::Accepted,
            summary: "ok".to_string(),
            full_review: "ok".to_string(),
            model_used: Some("stub-model".to_string()),
            file_url: None,
        };
        store.replace_error_decision(replacement.clone()).await.unwrap();
        assert_eq!(store.decision_values("sub-11"), vec![Decision::Accepted]);

        // Second replacement must bounce: the slot no longer holds ERROR.
        let err = store.replace_error_decision(replacement).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateDecision { .. }));
    }

    #[tokio::test]
    async fn duplicate_decision_for_same_pair_is_rejected() {
        let store = MemStore::seeded("sub-12");
        let first = NewDecision {
            submission_id: "sub-12".to_string(),
            reviewer_name: "Reviewer 1".to_string(),
            decision: Decision::Accepted,
            summary: "ok".to_string(),
            full_review: "ok".to_string(),
            model_used: None,
            file_url: None,
        };
        store.insert_decision(first.clone()).await.unwrap();
        let err = store.insert_decision(first).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateDecision { .. }));
    }

    #[tokio::test]
    async fn lost_decision_writes_finalize_with_an_error_recorded() {
        let store = MemStore::seeded("sub-14");
        store.inner.lock().unwrap().fail_inserts = true;
        let backend = StubBackend::new(vec![
            StubReply::Review(ACCEPT),
            StubReply::Review(ACCEPT),
            StubReply::Review(ACCEPT),
        ]);

        let err = dispatch(
            store.clone(),
            backend,
            settings(3, Duration::from_secs(5)),
            "sub-14".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Database(_)));

        // The submission must not pose as cleanly complete: no decisions
        // landed, so the terminal state carries an error, and the outcome
        // never reads as an all-accept.
        let submission = store.submission("sub-14");
        assert!(submission.processing_complete);
        assert!(submission.error.is_some());
        assert!(!submission.all_accepted);
        assert!(submission.certificate_filename.is_none());
    }

    #[tokio::test]
    async fn decisions_come_back_in_insertion_order() {
        let store = MemStore::seeded("sub-15");
        // Double-digit reviewer names must not jump ahead of single-digit
        // ones, as a lexicographic sort would make them.
        for name in ["Reviewer 2", "Reviewer 10", "Reviewer 1"] {
            store
                .insert_decision(NewDecision {
                    submission_id: "sub-15".to_string(),
                    reviewer_name: name.to_string(),
                    decision: Decision::Accepted,
                    summary: "ok".to_string(),
                    full_review: "ok".to_string(),
                    model_used: None,
                    file_url: None,
                })
                .await
                .unwrap();
        }

        let names: Vec<String> = store
            .decisions("sub-15")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.reviewer_name)
            .collect();
        assert_eq!(names, ["Reviewer 2", "Reviewer 10", "Reviewer 1"]);
    }

    #[tokio::test]
    async fn rejected_outcome_generates_no_certificate() {
        let store = MemStore::seeded("sub-13");
        let backend = StubBackend::new(vec![
            StubReply::Review(REJECT),
            StubReply::Review(ACCEPT),
            StubReply::Review(ACCEPT),
        ]);

        dispatch(
            store.clone(),
            backend,
            settings(3, Duration::from_secs(5)),
            "sub-13".to_string(),
            ACADEMIC_PAPER.to_string(),
        )
        .await
        .unwrap();

        let decisions = store.decision_values("sub-13");
        assert_eq!(aggregate(&decisions), Outcome::Rejected);
        let submission = store.submission("sub-13");
        assert!(!submission.all_accepted);
        assert!(submission.certificate_filename.is_none());
    }
}
