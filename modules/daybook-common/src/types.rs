use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Tiers ---

/// Search tier, from most to least specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Broad,
    Macro,
}

impl Tier {
    /// Waterfall order.
    pub const ALL: [Tier; 3] = [Tier::Primary, Tier::Broad, Tier::Macro];

    /// Higher is more specific. Used for tie-breaks and evidence weighting.
    pub fn priority(self) -> u8 {
        match self {
            Tier::Primary => 3,
            Tier::Broad => 2,
            Tier::Macro => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Broad => "broad",
            Tier::Macro => "macro",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tier the stored summary came from. `Fallback` marks summaries that
/// were not produced by a significant tier (human selection, orphan dates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierUsed {
    Primary,
    Broad,
    Macro,
    Fallback,
}

impl From<Tier> for TierUsed {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Primary => TierUsed::Primary,
            Tier::Broad => TierUsed::Broad,
            Tier::Macro => TierUsed::Macro,
        }
    }
}

impl fmt::Display for TierUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierUsed::Primary => write!(f, "primary"),
            TierUsed::Broad => write!(f, "broad"),
            TierUsed::Macro => write!(f, "macro"),
            TierUsed::Fallback => write!(f, "fallback"),
        }
    }
}

// --- Articles ---

/// A candidate news article returned by the article source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    #[serde(default)]
    pub text: String,
    /// Short provider-written summary of the article.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub score: f64,
}

/// All articles fetched for a date, grouped by tier. Kept on the record even
/// when a tier did not win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TieredArticles {
    #[serde(default)]
    pub primary: Vec<Article>,
    #[serde(default)]
    pub broad: Vec<Article>,
    #[serde(default, rename = "macro")]
    pub macro_context: Vec<Article>,
}

impl TieredArticles {
    pub fn get(&self, tier: Tier) -> &[Article] {
        match tier {
            Tier::Primary => &self.primary,
            Tier::Broad => &self.broad,
            Tier::Macro => &self.macro_context,
        }
    }

    pub fn set(&mut self, tier: Tier, articles: Vec<Article>) {
        match tier {
            Tier::Primary => self.primary = articles,
            Tier::Broad => self.broad = articles,
            Tier::Macro => self.macro_context = articles,
        }
    }

    /// Every article with its tier, in waterfall order.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &Article)> {
        Tier::ALL
            .into_iter()
            .flat_map(move |tier| self.get(tier).iter().map(move |a| (tier, a)))
    }

    /// First occurrence of `id`, searching tiers in waterfall order.
    pub fn find(&self, id: &str) -> Option<(Tier, &Article)> {
        self.iter().find(|(_, a)| a.id == id)
    }

    pub fn total(&self) -> usize {
        self.primary.len() + self.broad.len() + self.macro_context.len()
    }

    pub fn unique_count(&self) -> usize {
        self.iter().map(|(_, a)| a.id.as_str()).collect::<HashSet<_>>().len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// --- Verification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    Contradicted,
    Uncertain,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Verified => write!(f, "verified"),
            Verdict::Contradicted => write!(f, "contradicted"),
            Verdict::Uncertain => write!(f, "uncertain"),
        }
    }
}

/// One verification provider's opinion on a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCheck {
    pub verdict: Verdict,
    /// 0-100
    pub confidence: u8,
    pub reasoning: String,
    /// Free-form corrected-date hint. Only the secondary provider reports one.
    #[serde(default)]
    pub correct_date_text: Option<String>,
    #[serde(default)]
    pub citations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProviderCheck {
    /// Degraded result used when the provider failed or timed out.
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self {
            verdict: Verdict::Uncertain,
            confidence: 0,
            reasoning: format!("Verification failed: {reason}"),
            correct_date_text: None,
            citations: Vec::new(),
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReVerificationStatus {
    Success,
    Problem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReVerificationWinner {
    Original,
    Corrected,
}

impl fmt::Display for ReVerificationWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReVerificationWinner::Original => write!(f, "original"),
            ReVerificationWinner::Corrected => write!(f, "corrected"),
        }
    }
}

/// Evidence gathered for a corrected date and the decision taken on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReVerification {
    pub date: NaiveDate,
    pub summary: Option<String>,
    pub tier: Option<Tier>,
    pub articles: Vec<Article>,
    pub reasoning: String,
    pub status: ReVerificationStatus,
    pub winner: ReVerificationWinner,
    pub verified_at: DateTime<Utc>,
}

// --- Records ---

/// The stored record for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub date: NaiveDate,

    pub summary: String,
    pub top_article_id: Option<String>,
    pub reasoning: String,
    pub confidence_score: Option<u8>,

    pub tier_used: Option<TierUsed>,
    pub winning_tier: Option<Tier>,
    pub tiered_articles: TieredArticles,
    pub total_articles_fetched: usize,
    pub unique_articles_analyzed: usize,
    pub ai_provider: Option<String>,
    pub last_analyzed: Option<DateTime<Utc>>,

    pub is_manual_override: bool,

    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub flagged_at: Option<DateTime<Utc>>,

    pub fact_check_verdict: Option<Verdict>,
    pub fact_check_confidence: Option<u8>,
    pub fact_check_reasoning: Option<String>,
    pub fact_checked_at: Option<DateTime<Utc>>,

    pub perplexity_verdict: Option<Verdict>,
    pub perplexity_confidence: Option<u8>,
    pub perplexity_reasoning: Option<String>,
    pub perplexity_checked_at: Option<DateTime<Utc>>,
    pub perplexity_correct_date_text: Option<String>,
    #[serde(default)]
    pub perplexity_citations: Vec<String>,

    pub re_verified: bool,
    pub re_verified_at: Option<DateTime<Utc>>,
    pub re_verification_date: Option<NaiveDate>,
    pub re_verification_summary: Option<String>,
    pub re_verification_tier: Option<Tier>,
    #[serde(default)]
    pub re_verification_articles: Vec<Article>,
    pub re_verification_reasoning: Option<String>,
    pub re_verification_status: Option<ReVerificationStatus>,
    pub re_verification_winner: Option<ReVerificationWinner>,
}

impl EventRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            summary: String::new(),
            top_article_id: None,
            reasoning: String::new(),
            confidence_score: None,
            tier_used: None,
            winning_tier: None,
            tiered_articles: TieredArticles::default(),
            total_articles_fetched: 0,
            unique_articles_analyzed: 0,
            ai_provider: None,
            last_analyzed: None,
            is_manual_override: false,
            is_flagged: false,
            flag_reason: None,
            flagged_at: None,
            fact_check_verdict: None,
            fact_check_confidence: None,
            fact_check_reasoning: None,
            fact_checked_at: None,
            perplexity_verdict: None,
            perplexity_confidence: None,
            perplexity_reasoning: None,
            perplexity_checked_at: None,
            perplexity_correct_date_text: None,
            perplexity_citations: Vec::new(),
            re_verified: false,
            re_verified_at: None,
            re_verification_date: None,
            re_verification_summary: None,
            re_verification_tier: None,
            re_verification_articles: Vec::new(),
            re_verification_reasoning: None,
            re_verification_status: None,
            re_verification_winner: None,
        }
    }

    pub fn has_summary(&self) -> bool {
        !self.summary.trim().is_empty()
    }

    /// The primary provider's check, if one has been recorded.
    pub fn fact_check(&self) -> Option<ProviderCheck> {
        Some(ProviderCheck {
            verdict: self.fact_check_verdict?,
            confidence: self.fact_check_confidence.unwrap_or(0),
            reasoning: self.fact_check_reasoning.clone().unwrap_or_default(),
            correct_date_text: None,
            citations: Vec::new(),
            checked_at: self.fact_checked_at.unwrap_or_else(Utc::now),
        })
    }

    /// The secondary provider's check, if one has been recorded.
    pub fn cross_check(&self) -> Option<ProviderCheck> {
        Some(ProviderCheck {
            verdict: self.perplexity_verdict?,
            confidence: self.perplexity_confidence.unwrap_or(0),
            reasoning: self.perplexity_reasoning.clone().unwrap_or_default(),
            correct_date_text: self.perplexity_correct_date_text.clone(),
            citations: self.perplexity_citations.clone(),
            checked_at: self.perplexity_checked_at.unwrap_or_else(Utc::now),
        })
    }

    fn clear_verification(&mut self) {
        self.fact_check_verdict = None;
        self.fact_check_confidence = None;
        self.fact_check_reasoning = None;
        self.fact_checked_at = None;
        self.perplexity_verdict = None;
        self.perplexity_confidence = None;
        self.perplexity_reasoning = None;
        self.perplexity_checked_at = None;
        self.perplexity_correct_date_text = None;
        self.perplexity_citations.clear();
        self.re_verified = false;
        self.re_verified_at = None;
        self.re_verification_date = None;
        self.re_verification_summary = None;
        self.re_verification_tier = None;
        self.re_verification_articles.clear();
        self.re_verification_reasoning = None;
        self.re_verification_status = None;
        self.re_verification_winner = None;
        self.is_flagged = false;
        self.flag_reason = None;
        self.flagged_at = None;
    }

    /// Winning tier and the number of articles fetched for it.
    pub fn original_evidence(&self) -> Option<(Tier, usize)> {
        if !self.has_summary() {
            return None;
        }
        let tier = self.winning_tier?;
        Some((tier, self.tiered_articles.get(tier).len()))
    }

    /// Apply a patch. Ownership checks happen in the store, not here.
    pub fn apply(&mut self, patch: &RecordPatch, now: DateTime<Utc>) {
        if patch.clear_verification {
            self.clear_verification();
        }

        if let Some(a) = &patch.analysis {
            self.summary = a.summary.clone();
            self.top_article_id = a.top_article_id.clone();
            self.reasoning = a.reasoning.clone();
            self.confidence_score = a.confidence_score;
            self.tier_used = a.tier_used;
            self.winning_tier = a.winning_tier;
            self.total_articles_fetched = a.tiered_articles.total();
            self.unique_articles_analyzed = a.tiered_articles.unique_count();
            self.tiered_articles = a.tiered_articles.clone();
            self.ai_provider = a.ai_provider.clone();
            self.last_analyzed = Some(now);
        }

        if let Some(check) = &patch.fact_check {
            self.fact_check_verdict = Some(check.verdict);
            self.fact_check_confidence = Some(check.confidence);
            self.fact_check_reasoning = Some(check.reasoning.clone());
            self.fact_checked_at = Some(check.checked_at);
        }

        if let Some(check) = &patch.cross_check {
            self.perplexity_verdict = Some(check.verdict);
            self.perplexity_confidence = Some(check.confidence);
            self.perplexity_reasoning = Some(check.reasoning.clone());
            self.perplexity_checked_at = Some(check.checked_at);
            self.perplexity_correct_date_text = check.correct_date_text.clone();
            self.perplexity_citations = check.citations.clone();
        }

        if let Some(rv) = &patch.re_verification {
            self.re_verified = true;
            self.re_verified_at = Some(rv.verified_at);
            self.re_verification_date = Some(rv.date);
            self.re_verification_summary = rv.summary.clone();
            self.re_verification_tier = rv.tier;
            self.re_verification_articles = rv.articles.clone();
            self.re_verification_reasoning = Some(rv.reasoning.clone());
            self.re_verification_status = Some(rv.status);
            self.re_verification_winner = Some(rv.winner);
        }

        match &patch.flag {
            Some(FlagChange::Set(reason)) => {
                if !self.is_flagged {
                    self.flagged_at = Some(now);
                }
                self.is_flagged = true;
                self.flag_reason = Some(reason.clone());
            }
            Some(FlagChange::Clear) => {
                self.is_flagged = false;
                self.flag_reason = None;
                self.flagged_at = None;
            }
            None => {}
        }

        if let Some(manual) = patch.manual_override {
            self.is_manual_override = manual;
        }
    }
}

// --- Patches ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOrigin {
    /// Written by the pipeline, the curator or a bulk run.
    Automated,
    /// Written on behalf of a person.
    Human,
}

/// Result of resolving which article represents a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFields {
    pub summary: String,
    pub top_article_id: Option<String>,
    pub reasoning: String,
    pub confidence_score: Option<u8>,
    pub tier_used: Option<TierUsed>,
    pub winning_tier: Option<Tier>,
    pub tiered_articles: TieredArticles,
    pub ai_provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlagChange {
    Set(String),
    Clear,
}

/// A partial update to an [`EventRecord`]. Absent groups are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub origin: PatchOrigin,
    pub analysis: Option<AnalysisFields>,
    pub fact_check: Option<ProviderCheck>,
    pub cross_check: Option<ProviderCheck>,
    pub re_verification: Option<ReVerification>,
    pub flag: Option<FlagChange>,
    pub manual_override: Option<bool>,
    /// Drop checks, re-verification and any flag left by earlier content
    /// before the rest of the patch lands.
    #[serde(default)]
    pub clear_verification: bool,
}

impl RecordPatch {
    fn empty(origin: PatchOrigin) -> Self {
        Self {
            origin,
            analysis: None,
            fact_check: None,
            cross_check: None,
            re_verification: None,
            flag: None,
            manual_override: None,
            clear_verification: false,
        }
    }

    pub fn automated() -> Self {
        Self::empty(PatchOrigin::Automated)
    }

    pub fn human() -> Self {
        Self::empty(PatchOrigin::Human)
    }

    pub fn analysis(mut self, fields: AnalysisFields) -> Self {
        self.analysis = Some(fields);
        self
    }

    pub fn fact_check(mut self, check: ProviderCheck) -> Self {
        self.fact_check = Some(check);
        self
    }

    pub fn cross_check(mut self, check: ProviderCheck) -> Self {
        self.cross_check = Some(check);
        self
    }

    pub fn re_verification(mut self, rv: ReVerification) -> Self {
        self.re_verification = Some(rv);
        self
    }

    pub fn flag(mut self, reason: impl Into<String>) -> Self {
        self.flag = Some(FlagChange::Set(reason.into()));
        self
    }

    pub fn unflag(mut self) -> Self {
        self.flag = Some(FlagChange::Clear);
        self
    }

    pub fn manual_override(mut self, manual: bool) -> Self {
        self.manual_override = Some(manual);
        self
    }

    pub fn clear_verification(mut self) -> Self {
        self.clear_verification = true;
        self
    }

    /// True when the patch writes content, verification or ownership fields.
    /// Automated patches that do so are refused on manual records.
    pub fn touches_protected(&self) -> bool {
        self.analysis.is_some()
            || self.fact_check.is_some()
            || self.cross_check.is_some()
            || self.re_verification.is_some()
            || self.manual_override.is_some()
            || self.clear_verification
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_protected() && self.flag.is_none()
    }
}
