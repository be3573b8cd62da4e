use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Terminal classification of one reviewer's run. Stored as TEXT in
/// `review_results.decision`; unknown stored values read back as `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Accepted,
    Revision,
    Rejected,
    Error,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accepted => "ACCEPTED",
            Decision::Revision => "REVISION",
            Decision::Rejected => "REJECTED",
            Decision::Error => "ERROR",
        }
    }

    pub fn from_db(value: &str) -> Decision {
        match value {
            "ACCEPTED" => Decision::Accepted,
            "REVISION" => Decision::Revision,
            "REJECTED" => Decision::Rejected,
            _ => Decision::Error,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A review classified into a decision plus display-sized excerpts.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub decision: Decision,
    pub summary: String,
    pub full_review: String,
}

fn accepted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"FINAL DECISION:\s*\*\*ACCEPTED\*\*").unwrap())
}

fn revision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"FINAL DECISION:\s*\*\*ACCEPTED WITH (MINOR|MAJOR) REVISION").unwrap()
    })
}

fn rejected_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"FINAL DECISION:\s*\*\*REJECTED\*\*").unwrap())
}

/// Classify a reviewer's free-text response into exactly one decision.
///
/// Only the exact `FINAL DECISION` markers the prompt demands are accepted.
/// A response without a recognizable marker is an error, never a guessed
/// `Revision`: an unclassifiable review means the run is not trustworthy.
pub fn classify_review(review_text: &str) -> Result<Verdict, Error> {
    let upper = review_text.to_uppercase();

    let decision = if revision_re().is_match(&upper) {
        // Checked before the plain-ACCEPTED marker, which is a prefix of it.
        Decision::Revision
    } else if accepted_re().is_match(&upper) {
        Decision::Accepted
    } else if rejected_re().is_match(&upper) {
        Decision::Rejected
    } else {
        return Err(Error::UnclassifiableReview);
    };

    let summary = review_text.split("\n\n").next().unwrap_or(review_text);

    Ok(Verdict {
        decision,
        summary: truncate_chars(summary, 300),
        full_review: truncate_chars(review_text, 1000),
    })
}

/// Truncate to at most `max` characters, appending an ellipsis. Operates on
/// char boundaries so multibyte review text cannot split a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

const ACADEMIC_INDICATORS: &[&str] = &[
    "ABSTRACT",
    "INTRODUCTION",
    "METHODOLOGY",
    "METHODS",
    "RESULTS",
    "DISCUSSION",
    "CONCLUSION",
    "REFERENCES",
    "LITERATURE REVIEW",
    "BACKGROUND",
    "FINDINGS",
    "ANALYSIS",
];

/// Cheap structural screen applied to the extracted paper text before any
/// backend call: enough academic section headers plus some citation pattern.
pub fn has_academic_structure(paper_text: &str) -> bool {
    let upper = paper_text.to_uppercase();
    let section_count = ACADEMIC_INDICATORS
        .iter()
        .filter(|marker| upper.contains(*marker))
        .count();

    let has_citations = ["et al.", "(19", "(20", "["]
        .iter()
        .any(|pattern| paper_text.contains(pattern))
        || upper.contains("REFERENCES");

    section_count >= 3 && has_citations
}
