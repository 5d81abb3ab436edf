use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use daybook_common::{Article, Tier, TieredArticles};
use exa_client::{ExaClient, SearchRequest, SearchResult};

use crate::error::ProviderError;
use crate::retry::RetryPolicy;
use crate::traits::ArticleSource;

/// Outlets the macro tier is restricted to.
const MACRO_DOMAINS: &[&str] = &[
    "news.bbc.co.uk",
    "bbc.com",
    "reuters.com",
    "washingtonpost.com",
    "nytimes.com",
    "cnn.com",
    "wsj.com",
    "ft.com",
    "bloomberg.com",
    "forbes.com",
    "economist.com",
    "fortune.com",
    "aljazeera.com",
];

fn tier_query(tier: Tier) -> &'static str {
    match tier {
        Tier::Primary => "bitcoin news, ecosystem updates, halvings, important days",
        Tier::Broad => "important cryptocurrency web3 news, no predictions or analysis",
        Tier::Macro => "important financial political news",
    }
}

// ---------------------------------------------------------------------------
// ExaArticleSource
// ---------------------------------------------------------------------------

/// Article source backed by Exa neural news search.
pub struct ExaArticleSource {
    client: ExaClient,
    max_results: u32,
}

impl ExaArticleSource {
    pub fn new(client: ExaClient, max_results: u32) -> Self {
        Self { client, max_results }
    }

    fn request(&self, date: NaiveDate, tier: Tier) -> SearchRequest {
        let request = SearchRequest::news_on_day(tier_query(tier), date, self.max_results);
        match tier {
            Tier::Macro => request.include_domains(MACRO_DOMAINS.iter().copied()),
            Tier::Primary | Tier::Broad => request,
        }
    }
}

fn to_article(result: SearchResult) -> Article {
    Article {
        id: result.id,
        title: result
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled Article".to_string()),
        url: result.url,
        published_at: result.published_date,
        author: result.author.filter(|a| !a.trim().is_empty()),
        text: result.text.unwrap_or_default(),
        summary: result.summary.unwrap_or_default(),
        score: result.score.unwrap_or(0.0),
    }
}

#[async_trait]
impl ArticleSource for ExaArticleSource {
    async fn fetch_articles(&self, date: NaiveDate, tier: Tier) -> Result<Vec<Article>, ProviderError> {
        let results = self
            .client
            .search_and_contents(&self.request(date, tier))
            .await?;
        Ok(results.into_iter().map(to_article).collect())
    }
}

// ---------------------------------------------------------------------------
// TierFetcher
// ---------------------------------------------------------------------------

/// Fetches one tier's candidates with retries. Never fails: an exhausted
/// source yields an empty tier.
pub struct TierFetcher {
    source: Arc<dyn ArticleSource>,
    retry: RetryPolicy,
    max_results: usize,
}

impl TierFetcher {
    pub fn new(source: Arc<dyn ArticleSource>, retry: RetryPolicy, max_results: usize) -> Self {
        Self {
            source,
            retry,
            max_results,
        }
    }

    pub async fn fetch(&self, date: NaiveDate, tier: Tier) -> Vec<Article> {
        let result = self
            .retry
            .run("fetch_articles", || self.source.fetch_articles(date, tier))
            .await;

        match result {
            Ok(articles) => {
                let articles = normalize(articles, self.max_results);
                info!(%date, %tier, count = articles.len(), "Fetched tier articles");
                articles
            }
            Err(e) => {
                warn!(%date, %tier, error = %e, "Article fetch failed, treating tier as empty");
                Vec::new()
            }
        }
    }

    /// All three tiers concurrently.
    pub async fn fetch_all(&self, date: NaiveDate) -> TieredArticles {
        let (primary, broad, macro_context) = tokio::join!(
            self.fetch(date, Tier::Primary),
            self.fetch(date, Tier::Broad),
            self.fetch(date, Tier::Macro),
        );
        TieredArticles {
            primary,
            broad,
            macro_context,
        }
    }
}

/// Dedup by id (first wins), order by score descending (stable), cap.
fn normalize(articles: Vec<Article>, max_results: usize) -> Vec<Article> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Article> = articles
        .into_iter()
        .filter(|a| seen.insert(a.id.clone()))
        .collect();
    unique.sort_by(|a, b| b.score.total_cmp(&a.score));
    unique.truncate(max_results);
    unique
}
