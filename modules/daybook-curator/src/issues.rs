use std::fmt;

use chrono::NaiveDate;

use daybook_common::{EventRecord, Verdict};
use daybook_pipeline::FactCheckOutcome;

/// What the curator thinks is wrong with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// A fact checker points at another date that has not been re-verified.
    DateMismatch {
        corrected: NaiveDate,
        /// Confidence of the check that supplied the hint.
        confidence: u8,
    },
    Contradicted,
    /// One checker verified, the other contradicted.
    Disagreement,
    /// Checks are missing or at least one came back uncertain.
    Uncertain,
    /// No summary was ever written.
    Unresolved,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DateMismatch { corrected, .. } => write!(f, "date_mismatch({corrected})"),
            Self::Contradicted => write!(f, "contradicted"),
            Self::Disagreement => write!(f, "disagreement"),
            Self::Uncertain => write!(f, "uncertain"),
            Self::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Classify a record. `None` means nothing for the curator to do: the record
/// is manual, already waiting on a human, or verified by both checkers.
pub fn classify(record: &EventRecord) -> Option<IssueKind> {
    if record.is_manual_override || record.is_flagged {
        return None;
    }
    if !record.has_summary() {
        return Some(IssueKind::Unresolved);
    }
    let Some(outcome) = FactCheckOutcome::from_record(record) else {
        return Some(IssueKind::Uncertain);
    };

    if let Some(corrected) = outcome.corrected_date() {
        if record.re_verification_date != Some(corrected) {
            return Some(IssueKind::DateMismatch {
                corrected,
                confidence: hint_confidence(&outcome),
            });
        }
        return None;
    }
    if outcome.disagree() {
        return Some(IssueKind::Disagreement);
    }
    if outcome.is_contradicted() {
        return Some(IssueKind::Contradicted);
    }
    if outcome.both_verified() {
        return None;
    }
    Some(IssueKind::Uncertain)
}

fn hint_confidence(outcome: &FactCheckOutcome) -> u8 {
    if outcome.hint().is_some() {
        outcome.secondary.confidence
    } else {
        0
    }
}

/// Both checkers came back without a contradiction, but not both verified.
pub fn still_uncertain(outcome: &FactCheckOutcome) -> bool {
    !outcome.is_contradicted()
        && (outcome.primary.verdict == Verdict::Uncertain
            || outcome.secondary.verdict == Verdict::Uncertain)
}
