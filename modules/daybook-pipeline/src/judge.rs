use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use daybook_common::{Article, Tier};

use crate::retry::RetryPolicy;
use crate::traits::{AiProvider, Judgment};

/// Decides whether a tier's articles hold a notable event for the date.
pub struct SignificanceJudge {
    provider: Arc<dyn AiProvider>,
    retry: RetryPolicy,
}

impl SignificanceJudge {
    pub fn new(provider: Arc<dyn AiProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Never fails. An empty tier or an exhausted provider is "not significant",
    /// and the reasoning always says why.
    pub async fn judge(&self, articles: &[Article], date: NaiveDate, tier: Tier) -> Judgment {
        if articles.is_empty() {
            return Judgment::not_significant(format!("No {tier} articles found for {date}"));
        }

        let result = self
            .retry
            .run("judge_significance", || {
                self.provider.judge_significance(articles, date, tier)
            })
            .await;

        let mut judgment = match result {
            Ok(j) => j,
            Err(e) => {
                warn!(%date, %tier, error = %e, "Significance judgment failed");
                return Judgment::not_significant(format!("{tier} tier judgment failed: {e}"));
            }
        };

        if judgment.reasoning.trim().is_empty() {
            judgment.reasoning = if judgment.significant {
                format!("{tier} tier judged significant")
            } else {
                format!("{tier} tier judged not significant")
            };
        }

        if judgment.significant {
            let known = judgment
                .top_article_id
                .as_deref()
                .is_some_and(|id| articles.iter().any(|a| a.id == id));
            if !known {
                let fallback = highest_scoring(articles).map(|a| a.id.clone());
                warn!(
                    %date, %tier,
                    returned = ?judgment.top_article_id,
                    fallback = ?fallback,
                    "Judge named an unknown article, using highest-scoring"
                );
                judgment.top_article_id = fallback;
            }
        }

        info!(%date, %tier, significant = judgment.significant, "Tier judged");
        judgment
    }
}

/// Highest score; the earlier article wins ties.
pub(crate) fn highest_scoring(articles: &[Article]) -> Option<&Article> {
    articles
        .iter()
        .reduce(|best, a| if a.score > best.score { a } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{article, day, ScriptedProvider};

    #[tokio::test]
    async fn empty_tier_skips_provider() {
        let provider = Arc::new(ScriptedProvider::new("judge"));
        let judge = SignificanceJudge::new(provider.clone(), RetryPolicy::immediate(1));
        let j = judge.judge(&[], day(2024, 12, 1), Tier::Primary).await;
        assert!(!j.significant);
        assert!(j.reasoning.contains("No primary articles"));
        assert_eq!(provider.calls("judge_significance"), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_not_significant() {
        let provider = Arc::new(ScriptedProvider::new("judge").failing("judge_significance"));
        let judge = SignificanceJudge::new(provider, RetryPolicy::immediate(2));
        let j = judge
            .judge(&[article("a", 0.5)], day(2024, 12, 1), Tier::Broad)
            .await;
        assert!(!j.significant);
        assert!(j.reasoning.contains("failed"));
    }

    #[tokio::test]
    async fn unknown_top_article_falls_back_to_highest_score() {
        let date = day(2024, 12, 1);
        let provider = Arc::new(ScriptedProvider::new("judge").judge(
            date,
            Tier::Primary,
            Judgment {
                significant: true,
                top_article_id: Some("ghost".into()),
                summary: None,
                reasoning: "big day".into(),
            },
        ));
        let judge = SignificanceJudge::new(provider, RetryPolicy::immediate(1));
        let j = judge
            .judge(&[article("low", 0.1), article("high", 0.8)], date, Tier::Primary)
            .await;
        assert!(j.significant);
        assert_eq!(j.top_article_id.as_deref(), Some("high"));
    }

    #[test]
    fn highest_scoring_prefers_earlier_on_tie() {
        let articles = [article("first", 0.5), article("second", 0.5)];
        assert_eq!(highest_scoring(&articles).map(|a| a.id.as_str()), Some("first"));
    }
}
