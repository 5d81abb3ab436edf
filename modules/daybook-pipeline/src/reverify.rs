use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::info;

use daybook_common::{
    AnalysisFields, CancelFlag, EventRecord, RecordPatch, ReVerification, ReVerificationStatus,
    ReVerificationWinner, ReVerifyWeighting, Tier,
};
use daybook_store::RecordStore;

use crate::error::AnalysisError;
use crate::selection::{Resolution, SelectionResolver};

/// Winning tier and how many articles that tier had.
type Evidence = Option<(Tier, usize)>;

/// Gathers evidence for a corrected date and decides which date the event
/// belongs to.
pub struct ReVerifier {
    resolver: Arc<SelectionResolver>,
    store: Arc<dyn RecordStore>,
    weighting: ReVerifyWeighting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReVerifyOutcome {
    pub re_verification: ReVerification,
    pub flag: Option<String>,
    /// Analysis for the corrected date, present when that date won.
    pub corrected_analysis: Option<AnalysisFields>,
}

impl ReVerifyOutcome {
    pub fn winner(&self) -> ReVerificationWinner {
        self.re_verification.winner
    }

    pub fn patch(&self) -> RecordPatch {
        let patch = RecordPatch::automated().re_verification(self.re_verification.clone());
        match &self.flag {
            Some(reason) => patch.flag(reason.clone()),
            None => patch,
        }
    }
}

impl ReVerifier {
    pub fn new(
        resolver: Arc<SelectionResolver>,
        store: Arc<dyn RecordStore>,
        weighting: ReVerifyWeighting,
    ) -> Self {
        Self {
            resolver,
            store,
            weighting,
        }
    }

    /// Runs to completion once started; callers check cancellation before.
    pub async fn reverify(
        &self,
        record: &EventRecord,
        corrected: NaiveDate,
    ) -> Result<ReVerifyOutcome, AnalysisError> {
        let now = Utc::now();
        let original_tier = record.winning_tier;
        let original_articles = original_tier
            .map(|t| record.tiered_articles.get(t).to_vec())
            .unwrap_or_default();

        let keep_original = |reasoning: String, status: ReVerificationStatus| ReVerification {
            date: corrected,
            summary: record.has_summary().then(|| record.summary.clone()),
            tier: original_tier,
            articles: original_articles.clone(),
            reasoning,
            status,
            winner: ReVerificationWinner::Original,
            verified_at: now,
        };

        if let Some(existing) = self.store.get(corrected).await? {
            if existing.is_manual_override {
                let reasoning = format!(
                    "Corrected date {corrected} holds a manual entry and cannot be replaced; requires manual review"
                );
                info!(date = %record.date, %corrected, "Corrected date is manual, marking problem");
                return Ok(ReVerifyOutcome {
                    re_verification: keep_original(reasoning.clone(), ReVerificationStatus::Problem),
                    flag: Some(reasoning),
                    corrected_analysis: None,
                });
            }
        }

        let resolution = self.resolver.waterfall(corrected, &CancelFlag::new()).await;
        let selected = match resolution {
            Resolution::Resolved(selected) => Some(selected),
            _ => None,
        };
        let original = record.original_evidence();
        let candidate: Evidence = selected
            .as_ref()
            .map(|s| (s.tier, s.tier_articles().len()));

        let outcome = match (decide(original, candidate, self.weighting), selected) {
            (Some(ReVerificationWinner::Original), _) => ReVerifyOutcome {
                re_verification: keep_original(
                    format!(
                        "Original {} evidence {} is at least as strong as corrected {}",
                        record.date,
                        describe(original),
                        describe(candidate)
                    ),
                    ReVerificationStatus::Success,
                ),
                flag: None,
                corrected_analysis: None,
            },
            (Some(ReVerificationWinner::Corrected), Some(selected)) => {
                let reasoning = format!(
                    "Corrected {corrected} evidence {} beats original {} evidence {}",
                    describe(candidate),
                    record.date,
                    describe(original)
                );
                ReVerifyOutcome {
                    re_verification: ReVerification {
                        date: corrected,
                        summary: Some(selected.summary.clone()),
                        tier: Some(selected.tier),
                        articles: selected.tier_articles().to_vec(),
                        reasoning,
                        status: ReVerificationStatus::Success,
                        winner: ReVerificationWinner::Corrected,
                        verified_at: now,
                    },
                    flag: Some(format!("Event appears to belong to {corrected}")),
                    corrected_analysis: Some(selected.into_analysis()),
                }
            }
            _ => {
                let reasoning = format!(
                    "Neither {} nor {corrected} has usable evidence; requires manual review",
                    record.date
                );
                ReVerifyOutcome {
                    re_verification: keep_original(reasoning.clone(), ReVerificationStatus::Problem),
                    flag: Some(reasoning),
                    corrected_analysis: None,
                }
            }
        };

        info!(
            date = %record.date,
            %corrected,
            winner = %outcome.winner(),
            status = ?outcome.re_verification.status,
            "Re-verification decided"
        );
        Ok(outcome)
    }
}

fn describe(evidence: Evidence) -> String {
    match evidence {
        Some((tier, count)) => format!("({tier}, {count} articles)"),
        None => "(none)".to_string(),
    }
}

/// `None` when neither side is usable. Ties keep the original.
pub(crate) fn decide(
    original: Evidence,
    corrected: Evidence,
    weighting: ReVerifyWeighting,
) -> Option<ReVerificationWinner> {
    match (original, corrected) {
        (None, None) => None,
        (Some(_), None) => Some(ReVerificationWinner::Original),
        (None, Some(_)) => Some(ReVerificationWinner::Corrected),
        (Some(o), Some(c)) => {
            let key = |(tier, count): (Tier, usize)| match weighting {
                ReVerifyWeighting::TierFirst => (tier.priority() as usize, count),
                ReVerifyWeighting::CountFirst => (count, tier.priority() as usize),
            };
            match key(c).cmp(&key(o)) {
                Ordering::Greater => Some(ReVerificationWinner::Corrected),
                Ordering::Less | Ordering::Equal => Some(ReVerificationWinner::Original),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_first_prefers_specific_tier_over_volume() {
        let original = Some((Tier::Primary, 2));
        let corrected = Some((Tier::Broad, 9));
        assert_eq!(
            decide(original, corrected, ReVerifyWeighting::TierFirst),
            Some(ReVerificationWinner::Original)
        );
        assert_eq!(
            decide(original, corrected, ReVerifyWeighting::CountFirst),
            Some(ReVerificationWinner::Corrected)
        );
    }

    #[test]
    fn ties_keep_original() {
        let evidence = Some((Tier::Broad, 4));
        assert_eq!(
            decide(evidence, evidence, ReVerifyWeighting::TierFirst),
            Some(ReVerificationWinner::Original)
        );
    }

    #[test]
    fn one_usable_side_wins_and_none_is_a_problem() {
        assert_eq!(
            decide(None, Some((Tier::Macro, 1)), ReVerifyWeighting::TierFirst),
            Some(ReVerificationWinner::Corrected)
        );
        assert_eq!(
            decide(Some((Tier::Macro, 1)), None, ReVerifyWeighting::TierFirst),
            Some(ReVerificationWinner::Original)
        );
        assert_eq!(decide(None, None, ReVerifyWeighting::CountFirst), None);
    }
}
