use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use ai_client::{extract, truncate_to_char_boundary, ChatModel, Claude, OpenAi, Perplexity};
use daybook_common::{Article, Config, DaybookError, ProviderKind, Tier, Verdict};

use crate::error::ProviderError;
use crate::traits::{AiProvider, ArticleLabel, Judgment, VerificationReport};

const ARTICLE_TEXT_BUDGET: usize = 600;

// ---------------------------------------------------------------------------
// Structured responses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct JudgeResponse {
    /// True if at least one article describes a notable event that happened on the date.
    significant: bool,
    /// Id of the article that best represents the event.
    top_article_id: Option<String>,
    /// One-sentence summary of the event, 100-110 characters.
    summary: Option<String>,
    reasoning: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SummaryResponse {
    summary: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PickResponse {
    /// Id of the best article, or null if none is acceptable.
    article_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LabelItem {
    /// Article id (or URL if the id is unknown).
    id: String,
    /// Relevance 0-1.
    score: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LabelResponse {
    articles: Vec<LabelItem>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct VerifyResponse {
    /// One of: verified, contradicted, uncertain.
    verdict: String,
    /// 0-100
    confidence: f64,
    reasoning: String,
    /// If the event happened on a different date, that date (YYYY-MM-DD) or a short description.
    correct_date: Option<String>,
}

// ---------------------------------------------------------------------------
// LlmProvider
// ---------------------------------------------------------------------------

/// [`AiProvider`] backed by any chat model.
pub struct LlmProvider {
    model: Arc<dyn ChatModel>,
}

impl LlmProvider {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

/// Build the provider for `kind` from configuration.
pub fn build_provider(config: &Config, kind: ProviderKind) -> Result<Arc<dyn AiProvider>, DaybookError> {
    let key = config
        .api_key(kind)
        .ok_or_else(|| DaybookError::Config(format!("no API key configured for {kind}")))?
        .to_string();
    let model = config.model(kind).to_string();
    let chat: Arc<dyn ChatModel> = match kind {
        ProviderKind::Claude => Arc::new(Claude::new(key, model)),
        ProviderKind::OpenAi => Arc::new(OpenAi::new(key, model)),
        ProviderKind::Perplexity => Arc::new(Perplexity::new(key, model)),
    };
    Ok(Arc::new(LlmProvider::new(chat)))
}

fn describe_articles(articles: &[Article]) -> String {
    let mut out = String::new();
    for a in articles {
        let published = a
            .published_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".into());
        let body = if a.summary.is_empty() { &a.text } else { &a.summary };
        let _ = writeln!(
            out,
            "- id: {}\n  title: {}\n  url: {}\n  published: {}\n  content: {}",
            a.id,
            a.title,
            a.url,
            published,
            truncate_to_char_boundary(body, ARTICLE_TEXT_BUDGET)
        );
    }
    out
}

fn parse_verdict(raw: &str) -> Verdict {
    match raw.trim().to_ascii_lowercase().as_str() {
        "verified" => Verdict::Verified,
        "contradicted" => Verdict::Contradicted,
        _ => Verdict::Uncertain,
    }
}

#[async_trait]
impl AiProvider for LlmProvider {
    fn name(&self) -> &str {
        self.model.provider()
    }

    async fn judge_significance(
        &self,
        articles: &[Article],
        date: NaiveDate,
        tier: Tier,
    ) -> Result<Judgment, ProviderError> {
        let system = "You curate a daily record of notable news events. Decide whether \
                      the articles describe a significant event that happened on the given \
                      date. Ignore predictions, price analysis and opinion pieces.";
        let user = format!(
            "Date: {date}\nTier: {tier}\n\nArticles:\n{}",
            describe_articles(articles)
        );
        let response = extract::<JudgeResponse>(self.model.as_ref(), system, &user).await?;
        let r = response.value;
        debug!(provider = self.name(), %date, %tier, significant = r.significant, "Significance judged");
        Ok(Judgment {
            significant: r.significant,
            top_article_id: r.top_article_id.filter(|id| !id.trim().is_empty()),
            summary: r.summary.filter(|s| !s.trim().is_empty()),
            reasoning: r.reasoning,
        })
    }

    async fn summarize(
        &self,
        article: &Article,
        date: NaiveDate,
        tier: Tier,
    ) -> Result<String, ProviderError> {
        let system = "Write a single factual sentence of 100 to 110 characters describing \
                      the event. No dates, no quotes, present tense.";
        let user = format!(
            "Date: {date}\nTier: {tier}\n\nArticle:\n{}",
            describe_articles(std::slice::from_ref(article))
        );
        let response = extract::<SummaryResponse>(self.model.as_ref(), system, &user).await?;
        Ok(response.value.summary.trim().to_string())
    }

    async fn adjust_summary(
        &self,
        summary: &str,
        min: usize,
        max: usize,
    ) -> Result<String, ProviderError> {
        let system = "Rewrite the sentence to the requested length while keeping its meaning.";
        let user = format!(
            "Rewrite to between {min} and {max} characters (currently {}):\n{summary}",
            summary.chars().count()
        );
        let response = extract::<SummaryResponse>(self.model.as_ref(), system, &user).await?;
        Ok(response.value.summary.trim().to_string())
    }

    async fn pick_best(
        &self,
        candidates: &[Article],
        date: NaiveDate,
    ) -> Result<Option<String>, ProviderError> {
        let system = "Pick the single article that best represents the most important \
                      event of the date.";
        let user = format!("Date: {date}\n\nCandidates:\n{}", describe_articles(candidates));
        let response = extract::<PickResponse>(self.model.as_ref(), system, &user).await?;
        Ok(response.value.article_id.filter(|id| !id.trim().is_empty()))
    }

    async fn label_articles(
        &self,
        articles: &[Article],
        date: NaiveDate,
    ) -> Result<Vec<ArticleLabel>, ProviderError> {
        let system = "List every article that reports a real, notable event that happened \
                      on the given date. Use the article ids exactly as given.";
        let user = format!("Date: {date}\n\nArticles:\n{}", describe_articles(articles));
        let response = extract::<LabelResponse>(self.model.as_ref(), system, &user).await?;
        Ok(response
            .value
            .articles
            .into_iter()
            .map(|item| ArticleLabel {
                id: item.id,
                score: item.score,
            })
            .collect())
    }

    async fn verify(&self, date: NaiveDate, summary: &str) -> Result<VerificationReport, ProviderError> {
        let system = "You are a fact checker. Decide whether the described event happened \
                      on the given date. If it happened on another date, give that date.";
        let user = format!("Date: {date}\nEvent: {summary}");
        let response = extract::<VerifyResponse>(self.model.as_ref(), system, &user).await?;
        let r = response.value;
        Ok(VerificationReport {
            verdict: parse_verdict(&r.verdict),
            confidence: r.confidence.clamp(0.0, 100.0).round() as u8,
            reasoning: r.reasoning,
            correct_date_text: r.correct_date.filter(|s| !s.trim().is_empty()),
            citations: response.citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use ai_client::StructuredOutput;

    use super::*;

    #[test]
    fn unknown_verdicts_are_uncertain() {
        assert_eq!(parse_verdict("Verified"), Verdict::Verified);
        assert_eq!(parse_verdict("contradicted "), Verdict::Contradicted);
        assert_eq!(parse_verdict("probably"), Verdict::Uncertain);
    }

    #[test]
    fn article_descriptions_are_truncated() {
        let article = Article {
            id: "a1".into(),
            title: "Halving".into(),
            url: "https://example.com/a1".into(),
            published_at: None,
            author: None,
            text: "x".repeat(5000),
            summary: String::new(),
            score: 0.5,
        };
        let text = describe_articles(&[article]);
        assert!(text.contains("id: a1"));
        assert!(text.len() < 1000);
    }

    #[test]
    fn verify_schema_is_strict() {
        let schema = VerifyResponse::strict_schema();
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"].as_array().unwrap().len(), 4);
    }
}
