use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use daybook_common::{Article, Tier};

use crate::error::ProviderError;
use crate::retry::RetryPolicy;
use crate::traits::AiProvider;

pub const SUMMARY_MIN_CHARS: usize = 100;
pub const SUMMARY_MAX_CHARS: usize = 110;
pub const MAX_ADJUST_ROUNDS: usize = 3;

fn target() -> RangeInclusive<usize> {
    SUMMARY_MIN_CHARS..=SUMMARY_MAX_CHARS
}

/// Writes record summaries and holds them to the target length.
pub struct Summarizer {
    provider: Arc<dyn AiProvider>,
    retry: RetryPolicy,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn AiProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn provider(&self) -> &Arc<dyn AiProvider> {
        &self.provider
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn summarize(
        &self,
        article: &Article,
        date: NaiveDate,
        tier: Tier,
    ) -> Result<String, ProviderError> {
        let draft = self
            .retry
            .run("summarize", || self.provider.summarize(article, date, tier))
            .await?;
        self.finalize(draft, date).await
    }

    /// Bring an existing draft into range. At most [`MAX_ADJUST_ROUNDS`]
    /// rewrites; an out-of-range result after that is kept with a warning.
    pub async fn finalize(&self, draft: String, date: NaiveDate) -> Result<String, ProviderError> {
        let mut summary = draft.trim().to_string();
        if summary.is_empty() {
            return Err(ProviderError::Invalid("provider returned an empty summary".into()));
        }

        for round in 1..=MAX_ADJUST_ROUNDS {
            let len = summary.chars().count();
            if target().contains(&len) {
                break;
            }
            debug!(%date, round, len, "Adjusting summary length");
            let adjusted = self
                .retry
                .run("adjust_summary", || {
                    self.provider
                        .adjust_summary(&summary, SUMMARY_MIN_CHARS, SUMMARY_MAX_CHARS)
                })
                .await;
            match adjusted {
                Ok(s) if !s.trim().is_empty() => summary = s.trim().to_string(),
                Ok(_) => warn!(%date, round, "Summary adjustment came back empty"),
                Err(e) => {
                    warn!(%date, round, error = %e, "Summary adjustment failed");
                    break;
                }
            }
        }

        let len = summary.chars().count();
        if !target().contains(&len) {
            warn!(%date, len, "Summary still outside {SUMMARY_MIN_CHARS}-{SUMMARY_MAX_CHARS} chars, accepting");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{article, day, sized, ScriptedProvider};

    #[tokio::test]
    async fn in_range_summary_needs_no_adjustment() {
        let provider = Arc::new(ScriptedProvider::new("writer").summary("a", sized(105)));
        let summarizer = Summarizer::new(provider.clone(), RetryPolicy::immediate(1));
        let s = summarizer
            .summarize(&article("a", 0.5), day(2024, 1, 1), Tier::Primary)
            .await
            .unwrap();
        assert_eq!(s.chars().count(), 105);
        assert_eq!(provider.calls("adjust_summary"), 0);
    }

    #[tokio::test]
    async fn adjustment_rounds_are_capped() {
        // The scripted adjuster never reaches the range.
        let provider = Arc::new(
            ScriptedProvider::new("writer")
                .summary("a", sized(40))
                .adjusted(sized(60)),
        );
        let summarizer = Summarizer::new(provider.clone(), RetryPolicy::immediate(1));
        let s = summarizer
            .summarize(&article("a", 0.5), day(2024, 1, 1), Tier::Primary)
            .await
            .unwrap();
        assert_eq!(s.chars().count(), 60);
        assert_eq!(provider.calls("adjust_summary"), MAX_ADJUST_ROUNDS);
    }

    #[tokio::test]
    async fn adjustment_stops_once_in_range() {
        let provider = Arc::new(
            ScriptedProvider::new("writer")
                .summary("a", sized(200))
                .adjusted(sized(108)),
        );
        let summarizer = Summarizer::new(provider.clone(), RetryPolicy::immediate(1));
        let s = summarizer
            .summarize(&article("a", 0.5), day(2024, 1, 1), Tier::Primary)
            .await
            .unwrap();
        assert_eq!(s.chars().count(), 108);
        assert_eq!(provider.calls("adjust_summary"), 1);
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new("writer").summary("a", "   "));
        let summarizer = Summarizer::new(provider, RetryPolicy::immediate(1));
        let result = summarizer
            .summarize(&article("a", 0.5), day(2024, 1, 1), Tier::Primary)
            .await;
        assert!(matches!(result, Err(ProviderError::Invalid(_))));
    }
}
