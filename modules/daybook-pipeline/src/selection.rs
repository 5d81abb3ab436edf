use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use daybook_common::{
    AnalysisFields, Article, CancelFlag, SelectionStrategy, Tier, TierUsed, TieredArticles,
};

use crate::fetcher::TierFetcher;
use crate::judge::SignificanceJudge;
use crate::retry::RetryPolicy;
use crate::summary::Summarizer;
use crate::traits::{AiProvider, ArticleLabel};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// An article chosen automatically, with its summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    pub date: NaiveDate,
    pub article_id: String,
    pub tier: Tier,
    pub summary: String,
    pub reasoning: String,
    pub tiered_articles: TieredArticles,
    pub provider: String,
}

impl Selected {
    pub fn into_analysis(self) -> AnalysisFields {
        AnalysisFields {
            summary: self.summary,
            top_article_id: Some(self.article_id),
            reasoning: self.reasoning,
            confidence_score: None,
            tier_used: Some(TierUsed::from(self.tier)),
            winning_tier: Some(self.tier),
            tiered_articles: self.tiered_articles,
            ai_provider: Some(self.provider),
        }
    }

    /// Articles of the winning tier.
    pub fn tier_articles(&self) -> &[Article] {
        self.tiered_articles.get(self.tier)
    }
}

/// No tier produced a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub reasoning: String,
    pub tiered_articles: TieredArticles,
    /// Set when only the macro tier was significant.
    pub winning_tier: Option<Tier>,
}

impl Unresolved {
    pub fn into_analysis(self) -> AnalysisFields {
        AnalysisFields {
            summary: String::new(),
            top_article_id: None,
            reasoning: self.reasoning,
            confidence_score: None,
            tier_used: None,
            winning_tier: self.winning_tier,
            tiered_articles: self.tiered_articles,
            ai_provider: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Nothing was fetched for the date.
    NoArticles,
    /// Articles exist but the two labellers share none.
    NoAgreement,
}

/// One labeller's accepted articles, mapped to article ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    pub provider: String,
    pub article_ids: Vec<String>,
    pub scores: HashMap<String, f64>,
    pub error: Option<String>,
}

impl LabelSet {
    fn contains(&self, id: &str) -> bool {
        self.article_ids.iter().any(|a| a == id)
    }

    fn score(&self, id: &str) -> f64 {
        self.scores.get(id).copied().unwrap_or(0.0)
    }
}

/// Everything a person needs to pick the article for a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub date: NaiveDate,
    pub mode: SelectionMode,
    pub reasoning: String,
    pub tiered_articles: TieredArticles,
    pub first_labels: LabelSet,
    pub second_labels: LabelSet,
    pub suggested_article_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Selected),
    Unresolved(Unresolved),
    RequiresSelection(SelectionRequest),
    Cancelled,
}

// ---------------------------------------------------------------------------
// SelectionResolver
// ---------------------------------------------------------------------------

/// Decides which article represents a date.
pub struct SelectionResolver {
    fetcher: TierFetcher,
    judge: SignificanceJudge,
    summarizer: Summarizer,
    labelers: [Arc<dyn AiProvider>; 2],
    retry: RetryPolicy,
}

impl SelectionResolver {
    pub fn new(
        fetcher: TierFetcher,
        judge: SignificanceJudge,
        summarizer: Summarizer,
        labelers: [Arc<dyn AiProvider>; 2],
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            judge,
            summarizer,
            labelers,
            retry,
        }
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    pub async fn resolve(
        &self,
        date: NaiveDate,
        strategy: SelectionStrategy,
        cancel: &CancelFlag,
    ) -> Resolution {
        match strategy {
            SelectionStrategy::Waterfall => self.waterfall(date, cancel).await,
            SelectionStrategy::DualVerification => self.dual_verification(date, cancel).await,
        }
    }

    /// Tiers in order; the first significant non-macro tier wins. A significant
    /// macro tier is recorded but never summarized.
    pub async fn waterfall(&self, date: NaiveDate, cancel: &CancelFlag) -> Resolution {
        let mut tiered = TieredArticles::default();
        let mut reasoning = Vec::new();
        let mut winning_tier = None;

        for tier in Tier::ALL {
            if cancel.is_cancelled() {
                return Resolution::Cancelled;
            }
            let articles = self.fetcher.fetch(date, tier).await;
            tiered.set(tier, articles.clone());

            if cancel.is_cancelled() {
                return Resolution::Cancelled;
            }
            let judgment = self.judge.judge(&articles, date, tier).await;
            reasoning.push(format!("[{tier}] {}", judgment.reasoning));

            if !judgment.significant {
                continue;
            }
            if tier == Tier::Macro {
                winning_tier = Some(Tier::Macro);
                reasoning.push(
                    "[macro] Significant macro context only; not summarized automatically".into(),
                );
                break;
            }

            let Some(article) = judgment
                .top_article_id
                .as_deref()
                .and_then(|id| articles.iter().find(|a| a.id == id))
            else {
                continue;
            };

            if cancel.is_cancelled() {
                return Resolution::Cancelled;
            }
            let summary = match judgment.summary {
                Some(draft) => self.summarizer.finalize(draft, date).await,
                None => self.summarizer.summarize(article, date, tier).await,
            };

            match summary {
                Ok(summary) => {
                    info!(%date, %tier, article = %article.id, "Waterfall resolved");
                    return Resolution::Resolved(Selected {
                        date,
                        article_id: article.id.clone(),
                        tier,
                        summary,
                        reasoning: reasoning.join("\n"),
                        tiered_articles: tiered,
                        provider: self.summarizer.provider_name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(%date, %tier, error = %e, "Summary failed, continuing waterfall");
                    reasoning.push(format!("[{tier}] Summary failed: {e}"));
                }
            }
        }

        info!(%date, macro_only = winning_tier.is_some(), "Waterfall unresolved");
        Resolution::Unresolved(Unresolved {
            reasoning: reasoning.join("\n"),
            tiered_articles: tiered,
            winning_tier,
        })
    }

    /// All tiers at once, two independent labellers, intersection of their picks.
    pub async fn dual_verification(&self, date: NaiveDate, cancel: &CancelFlag) -> Resolution {
        if cancel.is_cancelled() {
            return Resolution::Cancelled;
        }
        let tiered = self.fetcher.fetch_all(date).await;

        if tiered.is_empty() {
            info!(%date, "No articles for any tier, selection required");
            return Resolution::RequiresSelection(SelectionRequest {
                date,
                mode: SelectionMode::NoArticles,
                reasoning: format!("No articles were found for {date}"),
                tiered_articles: tiered,
                first_labels: LabelSet::default(),
                second_labels: LabelSet::default(),
                suggested_article_id: None,
            });
        }

        if cancel.is_cancelled() {
            return Resolution::Cancelled;
        }
        let articles = unique_articles(&tiered);
        let (first, second) = tokio::join!(
            self.label(&self.labelers[0], &articles, date),
            self.label(&self.labelers[1], &articles, date),
        );

        let intersection: Vec<&Article> = articles
            .iter()
            .filter(|a| first.contains(&a.id) && second.contains(&a.id))
            .collect();

        info!(
            %date,
            first = first.article_ids.len(),
            second = second.article_ids.len(),
            agreed = intersection.len(),
            "Labels compared"
        );

        if cancel.is_cancelled() {
            return Resolution::Cancelled;
        }

        if intersection.is_empty() {
            let suggested_article_id = self.suggest(&articles, date).await;
            return Resolution::RequiresSelection(SelectionRequest {
                date,
                mode: SelectionMode::NoAgreement,
                reasoning: format!(
                    "No articles were approved by both {} and {}. User selection required.",
                    first.provider, second.provider
                ),
                tiered_articles: tiered,
                first_labels: first,
                second_labels: second,
                suggested_article_id,
            });
        }

        let chosen = match self.suggest(&intersection_owned(&intersection), date).await {
            Some(id) => intersection.iter().copied().find(|a| a.id == id),
            None => None,
        }
        .or_else(|| rank(&intersection, &tiered, &first, &second).first().copied());

        let Some(article) = chosen else {
            return Resolution::Unresolved(Unresolved {
                reasoning: "Intersection could not be ranked".into(),
                tiered_articles: tiered,
                winning_tier: None,
            });
        };
        let tier = tiered.find(&article.id).map(|(t, _)| t).unwrap_or(Tier::Primary);

        match self.summarizer.summarize(article, date, tier).await {
            Ok(summary) => Resolution::Resolved(Selected {
                date,
                article_id: article.id.clone(),
                tier,
                summary,
                reasoning: format!(
                    "{} and {} agreed on {} article(s); selected {} from the {tier} tier",
                    first.provider,
                    second.provider,
                    intersection.len(),
                    article.id
                ),
                tiered_articles: tiered.clone(),
                provider: self.summarizer.provider_name().to_string(),
            }),
            Err(e) => {
                warn!(%date, error = %e, "Summary of agreed article failed");
                Resolution::Unresolved(Unresolved {
                    reasoning: format!("Summary of {} failed: {e}", article.id),
                    tiered_articles: tiered.clone(),
                    winning_tier: None,
                })
            }
        }
    }

    async fn label(
        &self,
        provider: &Arc<dyn AiProvider>,
        articles: &[Article],
        date: NaiveDate,
    ) -> LabelSet {
        let mut set = LabelSet {
            provider: provider.name().to_string(),
            ..Default::default()
        };
        match self
            .retry
            .run("label_articles", || provider.label_articles(articles, date))
            .await
        {
            Ok(labels) => {
                for ArticleLabel { id, score } in labels {
                    match resolve_label(&id, articles) {
                        Some(article_id) => {
                            if let Some(score) = score {
                                set.scores.insert(article_id.clone(), score);
                            }
                            if !set.article_ids.contains(&article_id) {
                                set.article_ids.push(article_id);
                            }
                        }
                        None => warn!(
                            %date,
                            provider = %set.provider,
                            label = %ai_client::truncate_to_char_boundary(&id, 80),
                            "Label does not match any article"
                        ),
                    }
                }
            }
            Err(e) => {
                warn!(%date, provider = %set.provider, error = %e, "Labelling failed");
                set.error = Some(e.to_string());
            }
        }
        set
    }

    /// Summarizer's pick among `candidates`, mapped to an article id.
    async fn suggest(&self, candidates: &[Article], date: NaiveDate) -> Option<String> {
        let provider = self.summarizer.provider();
        match self
            .retry
            .run("pick_best", || provider.pick_best(candidates, date))
            .await
        {
            Ok(Some(pick)) => resolve_label(&pick, candidates),
            Ok(None) => None,
            Err(e) => {
                warn!(%date, error = %e, "Best-article pick failed");
                None
            }
        }
    }
}

fn intersection_owned(articles: &[&Article]) -> Vec<Article> {
    articles.iter().map(|a| (*a).clone()).collect()
}

/// Every fetched article once, first tier wins.
fn unique_articles(tiered: &TieredArticles) -> Vec<Article> {
    let mut seen = HashSet::new();
    tiered
        .iter()
        .filter(|(_, a)| seen.insert(a.id.clone()))
        .map(|(_, a)| a.clone())
        .collect()
}

/// Combined labeller score, then tier priority, then earliest publication, then id.
fn rank<'a>(
    candidates: &[&'a Article],
    tiered: &TieredArticles,
    first: &LabelSet,
    second: &LabelSet,
) -> Vec<&'a Article> {
    let tier_priority = |a: &Article| tiered.find(&a.id).map(|(t, _)| t.priority()).unwrap_or(0);
    let combined = |a: &Article| first.score(&a.id) + second.score(&a.id);

    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| {
        combined(b)
            .total_cmp(&combined(a))
            .then_with(|| tier_priority(b).cmp(&tier_priority(a)))
            .then_with(|| match (a.published_at, b.published_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

/// `scheme://host/path`, lowercased, without a trailing slash.
pub(crate) fn normalize_url(raw: &str) -> String {
    let normalized = match url::Url::parse(raw.trim()) {
        Ok(u) => format!("{}://{}{}", u.scheme(), u.host_str().unwrap_or_default(), u.path()),
        Err(_) => raw.trim().to_string(),
    };
    normalized.to_lowercase().trim_end_matches('/').to_string()
}

/// Map a label (article id or URL) back to an article id.
pub(crate) fn resolve_label(label: &str, articles: &[Article]) -> Option<String> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    if let Some(a) = articles.iter().find(|a| a.id == label) {
        return Some(a.id.clone());
    }
    if !(label.contains("://") || label.starts_with("www.")) {
        return None;
    }
    let wanted = normalize_url(label);
    let with_url = || articles.iter().filter(|a| !a.url.is_empty());
    with_url()
        .find(|a| normalize_url(&a.url) == wanted)
        .or_else(|| with_url().find(|a| label.contains(a.url.as_str()) || a.url.contains(label)))
        .map(|a| a.id.clone())
}
