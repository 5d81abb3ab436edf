// Test mocks for the pipeline.
//
// Two mocks matching the two trait boundaries:
// - MockSource (ArticleSource): (date, tier) -> articles
// - ScriptedProvider (AiProvider): per-date/per-article scripted answers with
//   call counters, failure injection and artificial stalls
//
// Plus helpers for building articles, dates and fixed-length summaries, and
// for wiring mocks into a resolver or analyzer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use ai_client::AiError;
use daybook_common::{Article, ReVerifyWeighting, SelectionStrategy, Tier, Verdict};
use daybook_store::RecordStore;

use crate::analyzer::Analyzer;
use crate::error::ProviderError;
use crate::fact_check::FactChecker;
use crate::fetcher::TierFetcher;
use crate::judge::SignificanceJudge;
use crate::retry::RetryPolicy;
use crate::selection::SelectionResolver;
use crate::summary::Summarizer;
use crate::traits::{AiProvider, ArticleLabel, ArticleSource, Judgment, VerificationReport};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

pub fn article(id: &str, score: f64) -> Article {
    Article {
        id: id.to_string(),
        title: format!("Headline {id}"),
        url: format!("https://news.example.com/{id}"),
        published_at: None,
        author: None,
        text: format!("Body of {id}"),
        summary: format!("Summary of {id}"),
        score,
    }
}

pub fn article_at(id: &str, score: f64, published: DateTime<Utc>) -> Article {
    Article {
        published_at: Some(published),
        ..article(id, score)
    }
}

pub fn at_hour(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).expect("valid hour"))
}

/// A summary of exactly `len` characters.
pub fn sized(len: usize) -> String {
    let base = "Bitcoin network records a notable event that shapes the market and the wider ecosystem today ";
    base.chars().cycle().take(len).collect()
}

pub fn verified(confidence: u8) -> VerificationReport {
    VerificationReport {
        verdict: Verdict::Verified,
        confidence,
        reasoning: "Matches multiple sources".into(),
        correct_date_text: None,
        citations: vec!["https://source.example.com/1".into()],
    }
}

pub fn contradicted(confidence: u8, hint: Option<&str>) -> VerificationReport {
    VerificationReport {
        verdict: Verdict::Contradicted,
        confidence,
        reasoning: "Sources disagree on the date".into(),
        correct_date_text: hint.map(str::to_string),
        citations: Vec::new(),
    }
}

pub fn uncertain(confidence: u8) -> VerificationReport {
    VerificationReport {
        verdict: Verdict::Uncertain,
        confidence,
        reasoning: "Not enough evidence".into(),
        correct_date_text: None,
        citations: Vec::new(),
    }
}

pub fn labels(ids: &[&str]) -> Vec<ArticleLabel> {
    ids.iter()
        .map(|id| ArticleLabel {
            id: id.to_string(),
            score: None,
        })
        .collect()
}

pub fn significant(top: &str) -> Judgment {
    Judgment {
        significant: true,
        top_article_id: Some(top.to_string()),
        summary: None,
        reasoning: format!("{top} reports a notable event"),
    }
}

fn scripted_failure(op: &str) -> ProviderError {
    ProviderError::Ai(AiError::Api {
        status: 503,
        message: format!("scripted failure in {op}"),
    })
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Map-based article source. Unregistered (date, tier) pairs return no articles.
#[derive(Default)]
pub struct MockSource {
    articles: HashMap<(NaiveDate, Tier), Vec<Article>>,
    failing: HashSet<Tier>,
    calls: Mutex<Vec<(NaiveDate, Tier)>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, date: NaiveDate, tier: Tier, articles: Vec<Article>) -> Self {
        self.articles.insert((date, tier), articles);
        self
    }

    pub fn failing(mut self, tier: Tier) -> Self {
        self.failing.insert(tier);
        self
    }

    pub fn calls(&self) -> Vec<(NaiveDate, Tier)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArticleSource for MockSource {
    async fn fetch_articles(&self, date: NaiveDate, tier: Tier) -> Result<Vec<Article>, ProviderError> {
        self.calls.lock().unwrap().push((date, tier));
        if self.failing.contains(&tier) {
            return Err(scripted_failure("fetch_articles"));
        }
        Ok(self.articles.get(&(date, tier)).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// AiProvider with scripted answers. Unscripted calls get neutral defaults:
/// not significant, a 105-char summary, no labels, no pick, verified at 90.
pub struct ScriptedProvider {
    name: String,
    judgments: HashMap<(NaiveDate, Tier), Judgment>,
    summaries: HashMap<String, String>,
    adjusted: Option<String>,
    picks: HashMap<NaiveDate, Option<String>>,
    labels: HashMap<NaiveDate, Vec<ArticleLabel>>,
    reports: HashMap<NaiveDate, VerificationReport>,
    failing: HashSet<&'static str>,
    stalls: HashMap<&'static str, Duration>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            judgments: HashMap::new(),
            summaries: HashMap::new(),
            adjusted: None,
            picks: HashMap::new(),
            labels: HashMap::new(),
            reports: HashMap::new(),
            failing: HashSet::new(),
            stalls: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn judge(mut self, date: NaiveDate, tier: Tier, judgment: Judgment) -> Self {
        self.judgments.insert((date, tier), judgment);
        self
    }

    pub fn summary(mut self, article_id: &str, summary: impl Into<String>) -> Self {
        self.summaries.insert(article_id.to_string(), summary.into());
        self
    }

    /// Every `adjust_summary` call returns this text.
    pub fn adjusted(mut self, summary: impl Into<String>) -> Self {
        self.adjusted = Some(summary.into());
        self
    }

    pub fn pick(mut self, date: NaiveDate, id: Option<&str>) -> Self {
        self.picks.insert(date, id.map(str::to_string));
        self
    }

    pub fn labels(mut self, date: NaiveDate, labels: Vec<ArticleLabel>) -> Self {
        self.labels.insert(date, labels);
        self
    }

    pub fn report(mut self, date: NaiveDate, report: VerificationReport) -> Self {
        self.reports.insert(date, report);
        self
    }

    /// Every call to `op` fails with a transient error.
    pub fn failing(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    /// Every call to `op` sleeps for `delay` first.
    pub fn stalling(mut self, op: &'static str, delay: Duration) -> Self {
        self.stalls.insert(op, delay);
        self
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    async fn enter(&self, op: &'static str) -> Result<(), ProviderError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if let Some(delay) = self.stalls.get(op) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(op) {
            return Err(scripted_failure(op));
        }
        Ok(())
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn judge_significance(
        &self,
        _articles: &[Article],
        date: NaiveDate,
        tier: Tier,
    ) -> Result<Judgment, ProviderError> {
        self.enter("judge_significance").await?;
        Ok(self
            .judgments
            .get(&(date, tier))
            .cloned()
            .unwrap_or_else(|| Judgment::not_significant(format!("nothing notable in {tier}"))))
    }

    async fn summarize(
        &self,
        article: &Article,
        _date: NaiveDate,
        _tier: Tier,
    ) -> Result<String, ProviderError> {
        self.enter("summarize").await?;
        Ok(self
            .summaries
            .get(&article.id)
            .cloned()
            .unwrap_or_else(|| sized(105)))
    }

    async fn adjust_summary(
        &self,
        summary: &str,
        _min: usize,
        _max: usize,
    ) -> Result<String, ProviderError> {
        self.enter("adjust_summary").await?;
        Ok(self.adjusted.clone().unwrap_or_else(|| summary.to_string()))
    }

    async fn pick_best(
        &self,
        _candidates: &[Article],
        date: NaiveDate,
    ) -> Result<Option<String>, ProviderError> {
        self.enter("pick_best").await?;
        Ok(self.picks.get(&date).cloned().flatten())
    }

    async fn label_articles(
        &self,
        _articles: &[Article],
        date: NaiveDate,
    ) -> Result<Vec<ArticleLabel>, ProviderError> {
        self.enter("label_articles").await?;
        Ok(self.labels.get(&date).cloned().unwrap_or_default())
    }

    async fn verify(&self, date: NaiveDate, _summary: &str) -> Result<VerificationReport, ProviderError> {
        self.enter("verify").await?;
        Ok(self.reports.get(&date).cloned().unwrap_or_else(|| verified(90)))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Mocks for every pipeline role. `writer` judges and summarizes.
pub struct Mocks {
    pub source: Arc<MockSource>,
    pub writer: Arc<ScriptedProvider>,
    pub labelers: [Arc<ScriptedProvider>; 2],
    pub verifiers: [Arc<ScriptedProvider>; 2],
}

impl Mocks {
    pub fn new(source: MockSource, writer: ScriptedProvider) -> Self {
        Self {
            source: Arc::new(source),
            writer: Arc::new(writer),
            labelers: [
                Arc::new(ScriptedProvider::new("claude")),
                Arc::new(ScriptedProvider::new("perplexity")),
            ],
            verifiers: [
                Arc::new(ScriptedProvider::new("openai")),
                Arc::new(ScriptedProvider::new("perplexity")),
            ],
        }
    }

    pub fn labelers(mut self, first: ScriptedProvider, second: ScriptedProvider) -> Self {
        self.labelers = [Arc::new(first), Arc::new(second)];
        self
    }

    pub fn verifiers(mut self, primary: ScriptedProvider, secondary: ScriptedProvider) -> Self {
        self.verifiers = [Arc::new(primary), Arc::new(secondary)];
        self
    }

    pub fn resolver(&self) -> SelectionResolver {
        let retry = RetryPolicy::immediate(1);
        SelectionResolver::new(
            TierFetcher::new(self.source.clone(), retry, 10),
            SignificanceJudge::new(self.writer.clone(), retry),
            Summarizer::new(self.writer.clone(), retry),
            [self.labelers[0].clone(), self.labelers[1].clone()],
            retry,
        )
    }

    pub fn fact_checker(&self) -> FactChecker {
        FactChecker::new(
            self.verifiers[0].clone(),
            self.verifiers[1].clone(),
            RetryPolicy::immediate(1),
        )
    }

    pub fn analyzer(&self, store: Arc<dyn RecordStore>, strategy: SelectionStrategy) -> Analyzer {
        Analyzer::new(
            store,
            Arc::new(self.resolver()),
            Arc::new(self.fact_checker()),
            strategy,
            ReVerifyWeighting::TierFirst,
        )
    }
}
