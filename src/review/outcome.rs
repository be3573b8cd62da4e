use serde::{Deserialize, Serialize};

use super::decision::Decision;

/// Aggregate classification over all decisions recorded for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pending,
    Accepted,
    Revision,
    Rejected,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pending => "PENDING",
            Outcome::Accepted => "ACCEPTED",
            Outcome::Revision => "REVISION",
            Outcome::Rejected => "REJECTED",
            Outcome::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combine reviewer decisions into one outcome.
///
/// Precedence, highest first: Error > Rejected > Revision > Accepted. A single
/// failed reviewer poisons the whole evaluation, so Error dominates even a
/// majority of acceptances. Pure over the decision multiset: arrival order of
/// the underlying rows never matters.
pub fn aggregate(decisions: &[Decision]) -> Outcome {
    if decisions.is_empty() {
        return Outcome::Pending;
    }
    if decisions.contains(&Decision::Error) {
        return Outcome::Error;
    }
    if decisions.contains(&Decision::Rejected) {
        return Outcome::Rejected;
    }
    if decisions.contains(&Decision::Revision) {
        return Outcome::Revision;
    }
    Outcome::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use Decision::*;

    /// All rotations of a slice, to check arrival order never changes the
    /// aggregate.
    fn rotations(decisions: &[Decision]) -> Vec<Vec<Decision>> {
        (0..decisions.len())
            .map(|i| {
                let mut v = decisions[i..].to_vec();
                v.extend_from_slice(&decisions[..i]);
                v
            })
            .collect()
    }

    #[test]
    fn empty_set_is_pending() {
        assert_eq!(aggregate(&[]), Outcome::Pending);
    }

    #[test]
    fn error_dominates_everything() {
        for perm in rotations(&[Accepted, Error, Rejected, Revision]) {
            assert_eq!(aggregate(&perm), Outcome::Error);
        }
        assert_eq!(aggregate(&[Error]), Outcome::Error);
    }

    #[test]
    fn rejected_beats_revision_and_accepted() {
        for perm in rotations(&[Accepted, Rejected, Revision]) {
            assert_eq!(aggregate(&perm), Outcome::Rejected);
        }
    }

    #[test]
    fn revision_beats_accepted() {
        for perm in rotations(&[Accepted, Revision, Accepted]) {
            assert_eq!(aggregate(&perm), Outcome::Revision);
        }
    }

    #[test]
    fn accepted_only_when_unanimous_and_nonempty() {
        assert_eq!(aggregate(&[Accepted, Accepted, Accepted]), Outcome::Accepted);
        assert_eq!(aggregate(&[Accepted]), Outcome::Accepted);
        assert_ne!(aggregate(&[Accepted, Revision, Accepted]), Outcome::Accepted);
    }

    #[test]
    fn three_reviewer_scenarios() {
        assert_eq!(aggregate(&[Accepted, Accepted, Accepted]), Outcome::Accepted);
        assert_eq!(aggregate(&[Accepted, Revision, Accepted]), Outcome::Revision);
        assert_eq!(aggregate(&[Rejected, Accepted, Accepted]), Outcome::Rejected);
        assert_eq!(aggregate(&[Accepted, Error, Accepted]), Outcome::Error);
    }
}
