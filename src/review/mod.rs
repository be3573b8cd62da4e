pub mod coordinator;
mod decision;
mod outcome;

pub use decision::{classify_review, has_academic_structure, truncate_chars, Decision, Verdict};
pub use outcome::{aggregate, Outcome};
