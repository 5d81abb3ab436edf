use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use daybook_common::{
    AgentConfig, AnalysisFields, CancelFlag, CuratorCounters, CuratorPhase, CuratorSession,
    EventRecord, HaltReason, PlannedChange, RecordPatch, ReVerificationStatus,
};
use daybook_pipeline::{Analyzer, FactCheckOutcome, Resolution};
use daybook_store::SessionStore;

use crate::budget::BudgetTracker;
use crate::error::CuratorError;
use crate::issues::{classify, still_uncertain, IssueKind};

/// Pull-based view of the current (or last) run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CuratorStatus {
    pub session_id: Option<Uuid>,
    pub running: bool,
    pub phase: Option<CuratorPhase>,
    pub pass: u32,
    pub queued: usize,
    pub deferred: usize,
    pub counters: CuratorCounters,
    pub halted: Option<HaltReason>,
}

/// Autonomous cleanup of stored records: a verification sweep, then bounded
/// cleanup passes over whatever the sweep found wrong.
pub struct CuratorAgent {
    analyzer: Arc<Analyzer>,
    sessions: Arc<dyn SessionStore>,
    cancel: Mutex<CancelFlag>,
    running: AtomicBool,
    status: Mutex<CuratorStatus>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Verification,
    Cleanup { final_pass: bool },
}

/// Result of handling one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Nothing to do for this date.
    Skipped,
    /// Fact-checked with no flag raised.
    Checked,
    Approved,
    Rejected,
    Flagged,
    /// Needs another look next pass.
    Deferred,
    /// Date lock held elsewhere; carried to the next pass uncounted.
    Busy,
    /// The date was not started and goes back on the queue.
    Halted(HaltReason),
}

#[derive(Default)]
struct Tally {
    processed: AtomicU64,
    approved: AtomicU64,
    rejected: AtomicU64,
    flagged: AtomicU64,
    deferred: AtomicU64,
}

impl Tally {
    fn from_counters(c: &CuratorCounters) -> Self {
        Self {
            processed: AtomicU64::new(c.processed),
            approved: AtomicU64::new(c.approved),
            rejected: AtomicU64::new(c.rejected),
            flagged: AtomicU64::new(c.flagged),
            deferred: AtomicU64::new(c.deferred),
        }
    }

    fn snapshot(&self, spent: f64) -> CuratorCounters {
        CuratorCounters {
            processed: self.processed.load(Ordering::SeqCst),
            approved: self.approved.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            flagged: self.flagged.load(Ordering::SeqCst),
            deferred: self.deferred.load(Ordering::SeqCst),
            spent,
        }
    }
}

/// State shared by the workers of one execution.
struct Run {
    /// Prefix of this run's lock holders.
    holder: String,
    config: AgentConfig,
    cancel: CancelFlag,
    budget: BudgetTracker,
    tally: Tally,
    /// Dates started against the test limit.
    claimed: AtomicU64,
    deadline: Option<Instant>,
    halt: Mutex<Option<HaltReason>>,
    carry: Mutex<Vec<NaiveDate>>,
    planned: Mutex<Vec<PlannedChange>>,
    /// Test mode keeps its would-be writes here instead of the store.
    overlay: Mutex<HashMap<NaiveDate, EventRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn change(date: NaiveDate, action: &str, detail: impl Into<String>, confidence: Option<u8>) -> PlannedChange {
    PlannedChange {
        date,
        action: action.to_string(),
        detail: detail.into(),
        confidence,
    }
}

impl Run {
    fn new(session: &CuratorSession, cancel: CancelFlag) -> Self {
        let remaining = session
            .config
            .max_runtime()
            .saturating_sub(Duration::try_from_secs_f64(session.active_secs).unwrap_or(Duration::MAX));
        Self {
            holder: format!("curator-{}", session.id),
            config: session.config.clone(),
            cancel,
            budget: BudgetTracker::resume(session.config.max_budget, session.counters.spent),
            tally: Tally::from_counters(&session.counters),
            claimed: AtomicU64::new(session.counters.processed),
            deadline: Instant::now().checked_add(remaining),
            halt: Mutex::new(None),
            carry: Mutex::new(Vec::new()),
            planned: Mutex::new(Vec::new()),
            overlay: Mutex::new(HashMap::new()),
        }
    }

    /// One holder per locked step; the store lets a holder re-enter its own lock.
    fn lock_holder(&self) -> String {
        format!("{}-{}", self.holder, Uuid::new_v4())
    }

    fn halted(&self) -> Option<HaltReason> {
        *lock(&self.halt)
    }

    /// First reason wins.
    fn halt(&self, reason: HaltReason) {
        let mut halt = lock(&self.halt);
        if halt.is_none() {
            info!(%reason, "Curator halting");
            *halt = Some(reason);
        }
    }

    fn limit_reached(&self) -> Option<HaltReason> {
        if self.cancel.is_cancelled() {
            return Some(HaltReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(HaltReason::Runtime);
        }
        None
    }

    fn claim(&self) -> bool {
        if !self.config.test_mode {
            return true;
        }
        let limit = self.config.test_limit as u64;
        self.claimed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| (c < limit).then_some(c + 1))
            .is_ok()
    }

    fn unclaim(&self) {
        if self.config.test_mode {
            self.claimed.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn reserve(&self, cost: f64) -> bool {
        let granted = self.budget.try_reserve(cost);
        if !granted {
            debug!(cost, remaining = self.budget.remaining(), "Reservation refused");
        }
        granted
    }

    fn carry(&self, date: NaiveDate) {
        lock(&self.carry).push(date);
    }

    fn plan(&self, change: PlannedChange) {
        lock(&self.planned).push(change);
    }

    fn record(&self, step: Step) {
        let t = &self.tally;
        let counter = match step {
            Step::Approved => Some(&t.approved),
            Step::Rejected => Some(&t.rejected),
            Step::Flagged => Some(&t.flagged),
            Step::Deferred => Some(&t.deferred),
            _ => None,
        };
        t.processed.fetch_add(1, Ordering::SeqCst);
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counters(&self) -> CuratorCounters {
        self.tally.snapshot(self.budget.spent())
    }
}

impl CuratorAgent {
    pub fn new(analyzer: Arc<Analyzer>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            analyzer,
            sessions,
            cancel: Mutex::new(CancelFlag::new()),
            running: AtomicBool::new(false),
            status: Mutex::new(CuratorStatus::default()),
        }
    }

    pub fn status(&self) -> CuratorStatus {
        lock(&self.status).clone()
    }

    /// Ask the current run to stop. Work already started finishes first.
    pub fn cancel(&self) {
        lock(&self.cancel).cancel();
    }

    /// Validate, build the initial queue and checkpoint a new session.
    pub async fn prepare(&self, config: AgentConfig) -> Result<CuratorSession> {
        config.validate()?;
        let mut session = CuratorSession::new(config);
        let store = self.analyzer.store();
        let dates = store.list_dates().await?;

        if session.config.skip_verification {
            session.pass = 1;
            for date in dates {
                if let Some(record) = store.get(date).await? {
                    if classify(&record).is_some() {
                        session.queue.push_back(date);
                    }
                }
            }
            if session.queue.is_empty() || session.config.max_passes == 0 {
                session.phase = CuratorPhase::Completed;
            }
        } else {
            session.queue = dates.into();
        }

        self.checkpoint(&session).await;
        if !self.running.load(Ordering::SeqCst) {
            self.publish(&session, false);
        }
        info!(
            session = %session.id,
            phase = %session.phase,
            queued = session.queue.len(),
            test_mode = session.config.test_mode,
            "Curator session prepared"
        );
        Ok(session)
    }

    /// Prepare a session and drive it to completion or a limit.
    pub async fn run(&self, config: AgentConfig) -> Result<CuratorSession> {
        let cancel = self.claim_run()?;
        match self.prepare(config).await {
            Ok(session) => Ok(self.execute_claimed(session, cancel).await),
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Continue a checkpointed session in the phase and pass it stopped in.
    pub async fn resume(&self, id: Uuid) -> Result<CuratorSession> {
        let cancel = self.claim_run()?;
        match self.load_resumable(id).await {
            Ok(session) if !session.is_complete() => Ok(self.execute_claimed(session, cancel).await),
            Ok(session) => {
                self.release();
                Ok(session)
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Drive a prepared session until it completes or a limit stops it.
    pub async fn execute(&self, session: CuratorSession) -> Result<CuratorSession> {
        let cancel = self.claim_run()?;
        Ok(self.execute_claimed(session, cancel).await)
    }

    /// [`CuratorAgent::run`] on a background task. The agent is claimed
    /// before this returns, so a concurrent start fails with
    /// [`CuratorError::AlreadyRunning`].
    pub async fn start(self: &Arc<Self>, config: AgentConfig) -> Result<CuratorSession> {
        let cancel = self.claim_run()?;
        match self.prepare(config).await {
            Ok(session) => {
                self.spawn(session.clone(), cancel);
                Ok(session)
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// [`CuratorAgent::resume`] on a background task.
    pub async fn start_resume(self: &Arc<Self>, id: Uuid) -> Result<CuratorSession> {
        let cancel = self.claim_run()?;
        match self.load_resumable(id).await {
            Ok(session) if !session.is_complete() => {
                self.spawn(session.clone(), cancel);
                Ok(session)
            }
            Ok(session) => {
                self.release();
                Ok(session)
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Mark the agent busy and arm a fresh cancel flag. Cancels from here
    /// on reach the run, even before its first batch starts.
    fn claim_run(&self) -> Result<CancelFlag> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CuratorError::AlreadyRunning.into());
        }
        let cancel = CancelFlag::new();
        *lock(&self.cancel) = cancel.clone();
        Ok(cancel)
    }

    fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn spawn(self: &Arc<Self>, session: CuratorSession, cancel: CancelFlag) {
        self.publish(&session, true);
        let agent = self.clone();
        tokio::spawn(async move {
            agent.execute_claimed(session, cancel).await;
        });
    }

    async fn load_resumable(&self, id: Uuid) -> Result<CuratorSession> {
        let session = self
            .sessions
            .load_session(id)
            .await?
            .ok_or(CuratorError::UnknownSession(id))?;
        if session.is_complete() {
            info!(session = %id, "Session already complete");
        } else {
            info!(
                session = %id,
                phase = %session.phase,
                pass = session.pass,
                queued = session.queue.len(),
                previous_halt = ?session.halted,
                "Resuming curator session"
            );
        }
        Ok(session)
    }

    async fn execute_claimed(&self, session: CuratorSession, cancel: CancelFlag) -> CuratorSession {
        let session = self.execute_inner(session, cancel).await;
        if session.is_complete() {
            self.forget(&session).await;
        }

        // Always clear the running flag
        self.publish(&session, false);
        self.release();

        info!(
            session = %session.id,
            phase = %session.phase,
            pass = session.pass,
            halted = ?session.halted,
            planned = session.planned.len(),
            "Curator run finished. {}",
            session.counters
        );
        session
    }

    async fn execute_inner(&self, mut session: CuratorSession, cancel: CancelFlag) -> CuratorSession {
        session.halted = None;
        let run = Run::new(&session, cancel);
        let started = Instant::now();
        let prior_secs = session.active_secs;
        self.publish(&session, true);

        while !session.is_complete() {
            if session.queue.is_empty() {
                advance(&mut session);
            } else {
                let stage = match session.phase {
                    CuratorPhase::Verification => Stage::Verification,
                    _ => Stage::Cleanup {
                        final_pass: session.pass >= session.config.max_passes,
                    },
                };
                let take = session.queue.len().min(session.config.batch_size);
                let batch: VecDeque<NaiveDate> = session.queue.drain(..take).collect();
                let leftover = self.run_batch(&run, batch, stage).await;
                for date in leftover.into_iter().rev() {
                    session.queue.push_front(date);
                }
            }

            session.counters = run.counters();
            session.active_secs = prior_secs + started.elapsed().as_secs_f64();
            session.deferred.extend(lock(&run.carry).drain(..));
            session.planned.append(&mut lock(&run.planned));
            session.halted = run.halted();
            session.updated_at = Utc::now();

            self.checkpoint(&session).await;
            self.publish(&session, true);
            if session.halted.is_some() {
                break;
            }
        }
        session
    }

    /// Drain one batch with the worker pool. Returns dates not started.
    async fn run_batch(&self, run: &Run, batch: VecDeque<NaiveDate>, stage: Stage) -> VecDeque<NaiveDate> {
        debug!(size = batch.len(), ?stage, "Starting batch");
        let work = Mutex::new(batch);
        let workers = (0..run.config.parallel_workers).map(|_| self.worker(run, &work, stage));
        join_all(workers).await;
        work.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn worker(&self, run: &Run, work: &Mutex<VecDeque<NaiveDate>>, stage: Stage) {
        loop {
            if run.halted().is_some() {
                return;
            }
            if let Some(reason) = run.limit_reached() {
                run.halt(reason);
                return;
            }
            if !run.claim() {
                run.halt(HaltReason::TestLimit);
                return;
            }
            let Some(date) = lock(work).pop_front() else {
                run.unclaim();
                return;
            };

            let step = match self.process(run, date, stage).await {
                Ok(step) => step,
                Err(e) => {
                    warn!(%date, error = %e, "Curator step failed, carrying to next pass");
                    Step::Busy
                }
            };
            debug!(%date, ?step, "Date handled");

            match step {
                Step::Halted(reason) => {
                    run.unclaim();
                    lock(work).push_front(date);
                    run.halt(reason);
                    return;
                }
                Step::Skipped => run.unclaim(),
                Step::Busy => {
                    run.unclaim();
                    run.carry(date);
                }
                Step::Deferred => {
                    run.carry(date);
                    run.record(step);
                }
                _ => run.record(step),
            }
            lock(&self.status).counters = run.counters();
        }
    }

    async fn process(&self, run: &Run, date: NaiveDate, stage: Stage) -> Result<Step> {
        let Some(record) = self.load(run, date).await? else {
            return Ok(Step::Skipped);
        };
        if record.is_manual_override {
            return Ok(Step::Skipped);
        }

        let Stage::Cleanup { final_pass } = stage else {
            return self.locked(run, date, move || self.verify(run, record)).await;
        };
        let Some(issue) = classify(&record) else {
            return Ok(Step::Skipped);
        };
        debug!(%date, %issue, "Curating");

        match issue {
            IssueKind::Unresolved => self.locked(run, date, move || self.reanalyze(run, record)).await,
            IssueKind::Contradicted | IssueKind::Disagreement => {
                self.locked(run, date, move || self.flag_contradiction(run, record)).await
            }
            IssueKind::Uncertain => {
                self.locked(run, date, move || self.recheck(run, record, final_pass)).await
            }
            IssueKind::DateMismatch {
                corrected,
                confidence,
            } => {
                self.locked(run, date, move || self.correct_date(run, record, corrected, confidence))
                    .await
            }
        }
    }

    // --- Phase 0 ---

    async fn verify(&self, run: &Run, record: EventRecord) -> Result<Step> {
        let date = record.date;
        if !record.has_summary() {
            run.carry(date);
            return Ok(Step::Checked);
        }
        if !run.reserve(run.config.costs.fact_check) {
            return Ok(Step::Halted(HaltReason::Budget));
        }

        let outcome = self.analyzer.fact_checker().check(date, &record.summary).await;
        let patch = outcome.patch();
        let flagged = patch.flag.is_some();
        let detail = format!(
            "{} {}, {} {}",
            outcome.primary_provider, outcome.primary.verdict, outcome.secondary_provider, outcome.secondary.verdict
        );
        let updated = self
            .apply(run, record, patch, change(date, "fact_check", detail, outcome.agreed_confidence()))
            .await?;

        if classify(&updated).is_some() {
            run.carry(date);
        }
        Ok(if flagged { Step::Flagged } else { Step::Checked })
    }

    // --- Cleanup ---

    async fn flag_contradiction(&self, run: &Run, record: EventRecord) -> Result<Step> {
        let date = record.date;
        let reason = FactCheckOutcome::from_record(&record)
            .and_then(|outcome| outcome.flag_reason())
            .unwrap_or_else(|| "Fact checks contradict the summary".to_string());
        let patch = RecordPatch::automated().flag(reason.clone());
        self.apply(run, record, patch, change(date, "flag", reason, None)).await?;
        Ok(Step::Flagged)
    }

    async fn recheck(&self, run: &Run, record: EventRecord, final_pass: bool) -> Result<Step> {
        let date = record.date;
        let threshold = run.config.auto_approve_threshold;
        if !run.reserve(run.config.costs.fact_check) {
            return Ok(Step::Halted(HaltReason::Budget));
        }

        let outcome = self.analyzer.fact_checker().check(date, &record.summary).await;
        let mut patch = outcome.patch();

        if let Some(confidence) = outcome.agreed_confidence() {
            if confidence >= threshold {
                let accepted = AnalysisFields {
                    confidence_score: Some(confidence),
                    ..analysis_of(&record)
                };
                patch = patch.analysis(accepted);
                self.apply(run, record, patch, change(date, "accept_summary", "Verified by both checkers", Some(confidence)))
                    .await?;
                return Ok(Step::Approved);
            }
            let reason = format!(
                "Verified at {confidence}% confidence, below the {threshold}% auto-approve threshold"
            );
            patch = patch.flag(reason.clone());
            self.apply(run, record, patch, change(date, "flag", reason, Some(confidence)))
                .await?;
            return Ok(Step::Rejected);
        }

        if still_uncertain(&outcome) {
            if final_pass {
                let reason = "Fact checks still uncertain after the final cleanup pass".to_string();
                patch = patch.flag(reason.clone());
                self.apply(run, record, patch, change(date, "flag", reason, None)).await?;
                return Ok(Step::Flagged);
            }
            self.apply(run, record, patch, change(date, "fact_check", "Still uncertain", None))
                .await?;
            return Ok(Step::Deferred);
        }

        // A new contradiction or a date hint surfaced.
        let flagged = patch.flag.is_some();
        let updated = self
            .apply(run, record, patch, change(date, "fact_check", "New contradiction", None))
            .await?;
        if flagged {
            Ok(Step::Flagged)
        } else if classify(&updated).is_some() {
            Ok(Step::Deferred)
        } else {
            Ok(Step::Checked)
        }
    }

    async fn correct_date(
        &self,
        run: &Run,
        record: EventRecord,
        corrected: NaiveDate,
        confidence: u8,
    ) -> Result<Step> {
        let date = record.date;
        let threshold = run.config.auto_approve_threshold;
        if confidence < threshold {
            let reason = format!(
                "Suggested date {corrected} at {confidence}% confidence is below the {threshold}% auto-approve threshold"
            );
            let patch = RecordPatch::automated().flag(reason.clone());
            self.apply(run, record, patch, change(date, "flag", reason, Some(confidence)))
                .await?;
            return Ok(Step::Rejected);
        }
        if !run.reserve(run.config.costs.re_verification) {
            return Ok(Step::Halted(HaltReason::Budget));
        }

        let outcome = self.analyzer.reverifier().reverify(&record, corrected).await?;
        let status = outcome.re_verification.status;
        let winner = outcome.winner();
        let detail = format!("{} (winner: {winner})", outcome.re_verification.reasoning);
        self.apply(run, record, outcome.patch(), change(date, "re_verify", detail, Some(confidence)))
            .await?;

        if status == ReVerificationStatus::Problem {
            return Ok(Step::Flagged);
        }
        if let Some(analysis) = outcome.corrected_analysis {
            self.move_to(run, date, corrected, analysis, confidence).await?;
        }
        Ok(Step::Approved)
    }

    /// Write the event to its corrected date, unless that date already has
    /// content of its own.
    async fn move_to(
        &self,
        run: &Run,
        from: NaiveDate,
        corrected: NaiveDate,
        analysis: AnalysisFields,
        confidence: u8,
    ) -> Result<()> {
        let detail = format!("Event from {from} written to {corrected}");
        if run.config.test_mode {
            run.plan(change(corrected, "apply_date_correction", detail, Some(confidence)));
            return Ok(());
        }

        let store = self.analyzer.store();
        let holder = run.lock_holder();
        if !store.try_lock_date(corrected, &holder).await? {
            warn!(%from, %corrected, "Corrected date is locked, leaving correction for review");
            return Ok(());
        }
        let result: Result<()> = async {
            if let Some(existing) = store.get(corrected).await? {
                if existing.is_manual_override || existing.has_summary() {
                    info!(%from, %corrected, "Corrected date already has content, not overwriting");
                    return Ok(());
                }
            }
            store
                .upsert(corrected, RecordPatch::automated().analysis(analysis))
                .await?;
            info!(%from, %corrected, "{detail}");
            Ok(())
        }
        .await;
        if let Err(e) = store.unlock_date(corrected, &holder).await {
            warn!(date = %corrected, error = %e, "Failed to release date lock");
        }
        result
    }

    /// Find an article for a date with no summary and keep it only if both
    /// checkers verify it at the auto-approve threshold.
    async fn reanalyze(&self, run: &Run, record: EventRecord) -> Result<Step> {
        let date = record.date;
        let threshold = run.config.auto_approve_threshold;
        if !run.reserve(run.config.costs.re_analysis) {
            return Ok(Step::Halted(HaltReason::Budget));
        }

        let selected = match self.analyzer.resolver().waterfall(date, &run.cancel).await {
            Resolution::Cancelled => return Ok(Step::Halted(HaltReason::Cancelled)),
            Resolution::Resolved(selected) => selected,
            Resolution::Unresolved(_) | Resolution::RequiresSelection(_) => {
                let reason = "No significant coverage found";
                let patch = RecordPatch::automated().flag(reason);
                self.apply(run, record, patch, change(date, "flag", reason, None)).await?;
                return Ok(Step::Flagged);
            }
        };
        let detail = format!("Summarized {} from the {} tier", selected.article_id, selected.tier);
        let analysis = selected.into_analysis();

        let outcome = self.analyzer.fact_checker().check(date, &analysis.summary).await;
        match outcome.agreed_confidence() {
            Some(confidence) if confidence >= threshold => {
                let patch = outcome.patch().clear_verification().analysis(AnalysisFields {
                    confidence_score: Some(confidence),
                    ..analysis
                });
                self.apply(run, record, patch, change(date, "re_analysis", detail, Some(confidence)))
                    .await?;
                Ok(Step::Approved)
            }
            confidence => {
                let reason = format!(
                    "Re-analysis of {} was not verified at the {threshold}% auto-approve threshold ({})",
                    analysis.top_article_id.as_deref().unwrap_or("unknown article"),
                    confidence.map(|c| format!("{c}%")).unwrap_or_else(|| "no agreement".into())
                );
                let patch = RecordPatch::automated().flag(reason.clone());
                self.apply(run, record, patch, change(date, "flag", reason, confidence))
                    .await?;
                Ok(Step::Rejected)
            }
        }
    }

    // --- Plumbing ---

    async fn load(&self, run: &Run, date: NaiveDate) -> Result<Option<EventRecord>> {
        if run.config.test_mode {
            let cached = lock(&run.overlay).get(&date).cloned();
            if cached.is_some() {
                return Ok(cached);
            }
        }
        Ok(self.analyzer.store().get(date).await?)
    }

    /// Persist a patch, or in test mode apply it in memory and plan it.
    async fn apply(
        &self,
        run: &Run,
        mut record: EventRecord,
        patch: RecordPatch,
        planned: PlannedChange,
    ) -> Result<EventRecord> {
        if run.config.test_mode {
            record.apply(&patch, Utc::now());
            run.plan(planned);
            lock(&run.overlay).insert(record.date, record.clone());
            return Ok(record);
        }
        Ok(self.analyzer.store().upsert(record.date, patch).await?)
    }

    /// Run `f` holding the date lock. Test mode takes no locks.
    async fn locked<F, Fut>(&self, run: &Run, date: NaiveDate, f: F) -> Result<Step>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Step>>,
    {
        if run.config.test_mode {
            return f().await;
        }
        let store = self.analyzer.store();
        let holder = run.lock_holder();
        if !store.try_lock_date(date, &holder).await? {
            debug!(%date, "Date locked elsewhere");
            return Ok(Step::Busy);
        }
        let result = f().await;
        if let Err(e) = store.unlock_date(date, &holder).await {
            warn!(%date, error = %e, "Failed to release date lock");
        }
        result
    }

    /// Completed sessions have nothing left to resume.
    async fn forget(&self, session: &CuratorSession) {
        if session.config.test_mode {
            return;
        }
        if let Err(e) = self.sessions.delete_session(session.id).await {
            warn!(session = %session.id, error = %e, "Failed to delete finished curator session");
        }
    }

    async fn checkpoint(&self, session: &CuratorSession) {
        if session.config.test_mode {
            return;
        }
        if let Err(e) = self.sessions.save_session(session).await {
            warn!(session = %session.id, error = %e, "Failed to checkpoint curator session");
        }
    }

    fn publish(&self, session: &CuratorSession, running: bool) {
        *lock(&self.status) = CuratorStatus {
            session_id: Some(session.id),
            running,
            phase: Some(session.phase),
            pass: session.pass,
            queued: session.queue.len(),
            deferred: session.deferred.len(),
            counters: session.counters.clone(),
            halted: session.halted,
        };
    }
}

/// Move to the next phase or pass once the queue is empty.
fn advance(session: &mut CuratorSession) {
    let mut carried: Vec<NaiveDate> = session.deferred.drain(..).collect();
    carried.sort();
    carried.dedup();

    match session.phase {
        CuratorPhase::Verification => {
            session.phase = CuratorPhase::Cleanup;
            session.pass = 1;
        }
        CuratorPhase::Cleanup => session.pass += 1,
        CuratorPhase::Completed => return,
    }

    if carried.is_empty() || session.pass > session.config.max_passes {
        session.phase = CuratorPhase::Completed;
        session.deferred = carried.into();
    } else {
        info!(pass = session.pass, queued = carried.len(), "Starting cleanup pass");
        session.queue = carried.into();
    }
}

fn analysis_of(record: &EventRecord) -> AnalysisFields {
    AnalysisFields {
        summary: record.summary.clone(),
        top_article_id: record.top_article_id.clone(),
        reasoning: record.reasoning.clone(),
        confidence_score: record.confidence_score,
        tier_used: record.tier_used,
        winning_tier: record.winning_tier,
        tiered_articles: record.tiered_articles.clone(),
        ai_provider: record.ai_provider.clone(),
    }
}
