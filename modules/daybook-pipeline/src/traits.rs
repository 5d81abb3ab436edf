// Trait seams for the pipeline's external collaborators.
//
// ArticleSource: where candidate articles come from (Exa in production).
// AiProvider: every model-backed judgment the pipeline asks for. One
//   implementation per chat backend; roles are assigned by configuration.
//
// Both have in-memory implementations in `testing` for deterministic tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use daybook_common::{Article, Tier, Verdict};

use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// ArticleSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Articles published on `date` for the search profile of `tier`.
    async fn fetch_articles(&self, date: NaiveDate, tier: Tier) -> Result<Vec<Article>, ProviderError>;
}

// ---------------------------------------------------------------------------
// AiProvider
// ---------------------------------------------------------------------------

/// Whether a tier holds a notable event for the date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub significant: bool,
    pub top_article_id: Option<String>,
    pub summary: Option<String>,
    pub reasoning: String,
}

impl Judgment {
    pub fn not_significant(reasoning: impl Into<String>) -> Self {
        Self {
            significant: false,
            top_article_id: None,
            summary: None,
            reasoning: reasoning.into(),
        }
    }
}

/// An article a labeller considers acceptable. `id` may be an article id or
/// the article's URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleLabel {
    pub id: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verdict: Verdict,
    /// 0-100
    pub confidence: u8,
    pub reasoning: String,
    pub correct_date_text: Option<String>,
    pub citations: Vec<String>,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name recorded as provenance (`ai_provider`, log fields).
    fn name(&self) -> &str;

    async fn judge_significance(
        &self,
        articles: &[Article],
        date: NaiveDate,
        tier: Tier,
    ) -> Result<Judgment, ProviderError>;

    async fn summarize(
        &self,
        article: &Article,
        date: NaiveDate,
        tier: Tier,
    ) -> Result<String, ProviderError>;

    /// Rewrite `summary` to between `min` and `max` characters.
    async fn adjust_summary(
        &self,
        summary: &str,
        min: usize,
        max: usize,
    ) -> Result<String, ProviderError>;

    /// Id (or URL) of the best candidate, if any is acceptable.
    async fn pick_best(
        &self,
        candidates: &[Article],
        date: NaiveDate,
    ) -> Result<Option<String>, ProviderError>;

    async fn label_articles(
        &self,
        articles: &[Article],
        date: NaiveDate,
    ) -> Result<Vec<ArticleLabel>, ProviderError>;

    async fn verify(&self, date: NaiveDate, summary: &str) -> Result<VerificationReport, ProviderError>;
}
