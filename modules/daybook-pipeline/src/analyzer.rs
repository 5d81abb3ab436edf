use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use daybook_common::{
    AnalysisFields, CancelFlag, Config, DaybookError, EventRecord, PatchOrigin, RecordPatch,
    ReVerifyWeighting, SelectionStrategy, TierUsed,
};
use daybook_store::RecordStore;
use exa_client::ExaClient;

use crate::error::AnalysisError;
use crate::fact_check::FactChecker;
use crate::fetcher::{ExaArticleSource, TierFetcher};
use crate::judge::SignificanceJudge;
use crate::llm::build_provider;
use crate::retry::RetryPolicy;
use crate::reverify::ReVerifier;
use crate::selection::{Resolution, SelectionRequest, SelectionResolver};
use crate::summary::Summarizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run holds the date lock.
    Locked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed(EventRecord),
    RequiresSelection(SelectionRequest),
    Skipped(SkipReason),
    Cancelled,
}

/// The single-date path: resolve an article, persist, fact-check, re-verify.
pub struct Analyzer {
    store: Arc<dyn RecordStore>,
    resolver: Arc<SelectionResolver>,
    fact_checker: Arc<FactChecker>,
    reverifier: ReVerifier,
    strategy: SelectionStrategy,
    pending: Mutex<HashMap<NaiveDate, SelectionRequest>>,
    holder_prefix: String,
}

impl Analyzer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<SelectionResolver>,
        fact_checker: Arc<FactChecker>,
        strategy: SelectionStrategy,
        weighting: ReVerifyWeighting,
    ) -> Self {
        let reverifier = ReVerifier::new(resolver.clone(), store.clone(), weighting);
        Self {
            store,
            resolver,
            fact_checker,
            reverifier,
            strategy,
            pending: Mutex::new(HashMap::new()),
            holder_prefix: "analyzer".to_string(),
        }
    }

    /// Wire the production pipeline: Exa for articles, configured chat
    /// backends for each role.
    pub fn from_config(config: &Config, store: Arc<dyn RecordStore>) -> Result<Self, DaybookError> {
        let retry = RetryPolicy::from_config(config);

        let source = Arc::new(ExaArticleSource::new(
            ExaClient::new(config.exa_api_key.clone()),
            config.exa_max_results,
        ));
        let fetcher = TierFetcher::new(source, retry, config.exa_max_results as usize);
        let judge = SignificanceJudge::new(build_provider(config, config.judge_provider)?, retry);
        let summarizer = Summarizer::new(build_provider(config, config.summary_provider)?, retry);
        let (first, second) = config.label_providers;
        let labelers = [build_provider(config, first)?, build_provider(config, second)?];
        let resolver = Arc::new(SelectionResolver::new(fetcher, judge, summarizer, labelers, retry));

        let fact_checker = Arc::new(FactChecker::new(
            build_provider(config, config.verifier_primary)?,
            build_provider(config, config.verifier_secondary)?,
            retry,
        ));

        Ok(Self::new(
            store,
            resolver,
            fact_checker,
            config.selection_strategy,
            config.reverify_weighting,
        ))
    }

    /// Lock holders are named `<prefix>-<uuid>`.
    pub fn with_holder_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.holder_prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<SelectionResolver> {
        &self.resolver
    }

    pub fn fact_checker(&self) -> &Arc<FactChecker> {
        &self.fact_checker
    }

    pub fn reverifier(&self) -> &ReVerifier {
        &self.reverifier
    }

    fn holder(&self) -> String {
        format!("{}-{}", self.holder_prefix, Uuid::new_v4())
    }

    pub fn pending_selection(&self, date: NaiveDate) -> Option<SelectionRequest> {
        self.pending_map().get(&date).cloned()
    }

    /// Drop a pending selection without writing anything.
    pub fn discard_selection(&self, date: NaiveDate) -> bool {
        self.pending_map().remove(&date).is_some()
    }

    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<NaiveDate, SelectionRequest>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Analyze one date. Manual records are never touched; an existing
    /// summary is kept unless `force` is set.
    pub async fn analyze_one(
        &self,
        date: NaiveDate,
        force: bool,
        cancel: &CancelFlag,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.analyze_with(date, force, self.strategy, cancel).await
    }

    /// [`Analyzer::analyze_one`] with an explicit selection strategy.
    pub async fn analyze_with(
        &self,
        date: NaiveDate,
        force: bool,
        strategy: SelectionStrategy,
        cancel: &CancelFlag,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let existing = self.store.get(date).await?;
        if let Some(existing) = &existing {
            if existing.is_manual_override {
                debug!(%date, "Manual record, leaving untouched");
                return Ok(AnalysisOutcome::Completed(existing.clone()));
            }
            if existing.has_summary() && !force {
                debug!(%date, "Record already analyzed");
                return Ok(AnalysisOutcome::Completed(existing.clone()));
            }
        }
        let had_summary = existing.is_some_and(|r| r.has_summary());
        if cancel.is_cancelled() {
            return Ok(AnalysisOutcome::Cancelled);
        }

        let holder = self.holder();
        if !self.store.try_lock_date(date, &holder).await? {
            info!(%date, "Date locked by another run, skipping");
            return Ok(AnalysisOutcome::Skipped(SkipReason::Locked));
        }

        let result = self.analyze_locked(date, strategy, had_summary, cancel).await;
        if let Err(e) = self.store.unlock_date(date, &holder).await {
            warn!(%date, error = %e, "Failed to release date lock");
        }
        result
    }

    async fn analyze_locked(
        &self,
        date: NaiveDate,
        strategy: SelectionStrategy,
        had_summary: bool,
        cancel: &CancelFlag,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        match self.resolver.resolve(date, strategy, cancel).await {
            Resolution::Cancelled => Ok(AnalysisOutcome::Cancelled),
            Resolution::RequiresSelection(request) => {
                info!(%date, mode = ?request.mode, "Selection required");
                self.pending_map().insert(date, request.clone());
                Ok(AnalysisOutcome::RequiresSelection(request))
            }
            Resolution::Unresolved(unresolved) => {
                if cancel.is_cancelled() {
                    return Ok(AnalysisOutcome::Cancelled);
                }
                if had_summary {
                    // Keep the existing summary for a human to judge.
                    info!(%date, "Re-analysis found nothing significant, flagging existing summary");
                    let patch = RecordPatch::automated()
                        .flag("Re-analysis found no significant coverage; existing summary kept for review");
                    let record = self.store.upsert(date, patch).await?;
                    return Ok(AnalysisOutcome::Completed(record));
                }
                let macro_only = unresolved.winning_tier.is_some();
                let mut patch = RecordPatch::automated().analysis(unresolved.into_analysis());
                if macro_only {
                    patch = patch.flag("Only macro context was significant; needs manual review");
                }
                let record = self.store.upsert(date, patch).await?;
                Ok(AnalysisOutcome::Completed(record))
            }
            Resolution::Resolved(selected) => {
                if cancel.is_cancelled() {
                    return Ok(AnalysisOutcome::Cancelled);
                }
                let record = self
                    .finalize(date, selected.into_analysis(), PatchOrigin::Automated)
                    .await?;
                Ok(AnalysisOutcome::Completed(record))
            }
        }
    }

    /// Persist a human choice for a date awaiting selection, then verify it
    /// like any other record.
    pub async fn confirm_selection(
        &self,
        date: NaiveDate,
        article_id: &str,
    ) -> Result<EventRecord, AnalysisError> {
        let existing = self.store.get(date).await?;
        if existing.as_ref().is_some_and(|r| r.is_manual_override) {
            return Err(AnalysisError::ManualOverride(date));
        }

        let tiered = match (self.pending_selection(date), existing) {
            (Some(request), _) => request.tiered_articles,
            (None, Some(record)) if !record.tiered_articles.is_empty() => record.tiered_articles,
            _ => return Err(AnalysisError::NoPendingSelection(date)),
        };
        let (tier, article) = tiered
            .find(article_id)
            .map(|(tier, article)| (tier, article.clone()))
            .ok_or_else(|| AnalysisError::UnknownArticle(article_id.to_string()))?;

        let holder = self.holder();
        if !self.store.try_lock_date(date, &holder).await? {
            return Err(AnalysisError::DateLocked(date));
        }

        let result = async {
            let summarizer = self.resolver.summarizer();
            let summary = summarizer.summarize(&article, date, tier).await?;
            let analysis = AnalysisFields {
                summary,
                top_article_id: Some(article.id.clone()),
                reasoning: format!("Selected by user from the {tier} tier"),
                confidence_score: None,
                tier_used: Some(TierUsed::Fallback),
                winning_tier: Some(tier),
                tiered_articles: tiered,
                ai_provider: Some(summarizer.provider_name().to_string()),
            };
            self.finalize(date, analysis, PatchOrigin::Human).await
        }
        .await;

        if let Err(e) = self.store.unlock_date(date, &holder).await {
            warn!(%date, error = %e, "Failed to release date lock");
        }
        let record = result?;
        self.discard_selection(date);
        info!(%date, article = article_id, "Selection confirmed");
        Ok(record)
    }

    /// Persist analysis over whatever verification the date carried, fact-check,
    /// persist checks, re-verify a corrected date.
    async fn finalize(
        &self,
        date: NaiveDate,
        analysis: AnalysisFields,
        origin: PatchOrigin,
    ) -> Result<EventRecord, AnalysisError> {
        let base = match origin {
            PatchOrigin::Automated => RecordPatch::automated(),
            PatchOrigin::Human => RecordPatch::human(),
        };
        let record = self
            .store
            .upsert(date, base.clear_verification().analysis(analysis.clone()))
            .await?;

        let outcome = self.fact_checker.check(date, &record.summary).await;
        let mut patch = outcome.patch();
        if let Some(confidence) = outcome.agreed_confidence() {
            patch = patch.analysis(AnalysisFields {
                confidence_score: Some(confidence),
                ..analysis
            });
        }
        let mut record = self.store.upsert(date, patch).await?;

        if let Some(corrected) = outcome.corrected_date() {
            let rv = self.reverifier.reverify(&record, corrected).await?;
            record = self.store.upsert(date, rv.patch()).await?;
        }

        info!(
            %date,
            tier = ?record.tier_used,
            flagged = record.is_flagged,
            re_verified = record.re_verified,
            "Record finalized"
        );
        Ok(record)
    }
}
