use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use daybook_common::CancelFlag;

use crate::analyzer::{AnalysisOutcome, Analyzer, SkipReason};
use crate::error::AnalysisError;
use crate::selection::SelectionRequest;

// ---------------------------------------------------------------------------
// Status and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Running,
    AwaitingSelection,
    Completed,
    Cancelled,
    /// The controlling side went away while a selection was pending.
    Failed,
}

impl BulkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BulkStatus::Completed | BulkStatus::Cancelled | BulkStatus::Failed)
    }
}

impl fmt::Display for BulkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkStatus::Running => write!(f, "running"),
            BulkStatus::AwaitingSelection => write!(f, "awaiting_selection"),
            BulkStatus::Completed => write!(f, "completed"),
            BulkStatus::Cancelled => write!(f, "cancelled"),
            BulkStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Answer to a pending selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionDecision {
    Choose(String),
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BulkEvent {
    Started {
        total: usize,
    },
    Progress {
        completed: usize,
        total: usize,
        current_date: Option<NaiveDate>,
    },
    SelectionRequired {
        request: SelectionRequest,
    },
    DateFailed {
        date: NaiveDate,
        error: String,
    },
    Finished {
        status: BulkStatus,
    },
}

/// Pull-based view of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkSnapshot {
    pub run_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub current_date: Option<NaiveDate>,
    pub status: BulkStatus,
    pub failed: Vec<NaiveDate>,
    pub skipped: Vec<NaiveDate>,
    pub pending_selection: Option<SelectionRequest>,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Control side of a running batch.
pub struct BulkHandle {
    pub run_id: Uuid,
    cancel: CancelFlag,
    decisions: mpsc::UnboundedSender<(NaiveDate, SelectionDecision)>,
    snapshot: watch::Receiver<BulkSnapshot>,
}

impl BulkHandle {
    /// Stop after the in-flight step. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Answer the selection pending for `date`. A decision naming any other
    /// date is discarded by the run. Returns false if the run has ended.
    pub fn decide(&self, date: NaiveDate, decision: SelectionDecision) -> bool {
        self.decisions.send((date, decision)).is_ok()
    }

    pub fn snapshot(&self) -> BulkSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Resolves with the terminal status.
    pub async fn finished(&self) -> BulkStatus {
        let mut rx = self.snapshot.clone();
        let status = match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(snapshot) => snapshot.status,
            Err(_) => self.snapshot.borrow().status,
        };
        status
    }
}

// ---------------------------------------------------------------------------
// BulkOrchestrator
// ---------------------------------------------------------------------------

/// Runs the analyzer over a list of dates, one at a time, pausing for a
/// human whenever a date needs an article chosen.
pub struct BulkOrchestrator {
    analyzer: Arc<Analyzer>,
}

struct Run {
    analyzer: Arc<Analyzer>,
    dates: Vec<NaiveDate>,
    cancel: CancelFlag,
    decisions: mpsc::UnboundedReceiver<(NaiveDate, SelectionDecision)>,
    events: mpsc::UnboundedSender<BulkEvent>,
    snapshot: watch::Sender<BulkSnapshot>,
}

impl BulkOrchestrator {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self { analyzer }
    }

    /// Spawn a run. Events are buffered until the receiver reads them.
    pub fn start(&self, dates: Vec<NaiveDate>) -> (BulkHandle, mpsc::UnboundedReceiver<BulkEvent>) {
        let run_id = Uuid::new_v4();
        let cancel = CancelFlag::new();
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(BulkSnapshot {
            run_id,
            total: dates.len(),
            completed: 0,
            current_date: None,
            status: BulkStatus::Running,
            failed: Vec::new(),
            skipped: Vec::new(),
            pending_selection: None,
            started_at: Utc::now(),
        });

        let run = Run {
            analyzer: self.analyzer.clone(),
            dates,
            cancel: cancel.clone(),
            decisions: decision_rx,
            events: event_tx,
            snapshot: snapshot_tx,
        };
        tokio::spawn(async move {
            let status = run.execute().await;
            info!(%run_id, %status, "Bulk run finished");
        });

        let handle = BulkHandle {
            run_id,
            cancel,
            decisions: decision_tx,
            snapshot: snapshot_rx,
        };
        (handle, event_rx)
    }
}

impl Run {
    fn emit(&self, event: BulkEvent) {
        // The receiver may have been dropped; the run continues regardless.
        let _ = self.events.send(event);
    }

    fn update(&self, f: impl FnOnce(&mut BulkSnapshot)) {
        self.snapshot.send_modify(f);
    }

    fn finish(&self, status: BulkStatus) -> BulkStatus {
        self.update(|s| {
            s.status = status;
            s.current_date = None;
            s.pending_selection = None;
        });
        self.emit(BulkEvent::Finished { status });
        status
    }

    async fn execute(mut self) -> BulkStatus {
        let total = self.dates.len();
        let run_id = self.snapshot.borrow().run_id;
        info!(%run_id, total, "Bulk run started");
        self.emit(BulkEvent::Started { total });

        let dates = std::mem::take(&mut self.dates);
        for (index, date) in dates.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return self.finish(BulkStatus::Cancelled);
            }
            self.update(|s| s.current_date = Some(date));
            self.emit(BulkEvent::Progress {
                completed: index,
                total,
                current_date: Some(date),
            });

            let outcome = self.analyzer.analyze_one(date, true, &self.cancel).await;
            match outcome {
                Ok(AnalysisOutcome::Completed(_)) => {}
                Ok(AnalysisOutcome::Skipped(SkipReason::Locked)) => {
                    self.update(|s| s.skipped.push(date));
                }
                Ok(AnalysisOutcome::Cancelled) => return self.finish(BulkStatus::Cancelled),
                Ok(AnalysisOutcome::RequiresSelection(request)) => {
                    if let Some(status) = self.await_selection(date, request).await {
                        return self.finish(status);
                    }
                }
                Err(e) => self.fail_date(date, &e),
            }

            self.update(|s| s.completed = index + 1);
            if self.cancel.is_cancelled() {
                return self.finish(BulkStatus::Cancelled);
            }
        }

        self.emit(BulkEvent::Progress {
            completed: total,
            total,
            current_date: None,
        });
        self.finish(BulkStatus::Completed)
    }

    fn fail_date(&self, date: NaiveDate, error: &AnalysisError) {
        warn!(%date, error = %error, "Bulk date failed");
        self.update(|s| s.failed.push(date));
        self.emit(BulkEvent::DateFailed {
            date,
            error: error.to_string(),
        });
    }

    /// Suspend until the caller chooses or skips. Returns a terminal status
    /// if the run has to stop instead.
    async fn await_selection(
        &mut self,
        date: NaiveDate,
        request: SelectionRequest,
    ) -> Option<BulkStatus> {
        // Anything queued now was meant for an earlier prompt.
        while let Ok((stale, decision)) = self.decisions.try_recv() {
            warn!(%date, %stale, ?decision, "Discarding stale selection decision");
        }
        self.update(|s| {
            s.status = BulkStatus::AwaitingSelection;
            s.pending_selection = Some(request.clone());
        });
        self.emit(BulkEvent::SelectionRequired {
            request: request.clone(),
        });

        let stop = loop {
            let decision = tokio::select! {
                decision = self.decisions.recv() => decision,
                _ = self.cancel.cancelled() => break Some(BulkStatus::Cancelled),
            };

            match decision {
                None => break Some(BulkStatus::Failed),
                Some((answered, decision)) if answered != date => {
                    warn!(%date, %answered, ?decision, "Decision is for another date, ignoring");
                }
                Some((_, SelectionDecision::Skip)) => {
                    info!(%date, "Selection skipped");
                    self.update(|s| s.skipped.push(date));
                    break None;
                }
                Some((_, SelectionDecision::Choose(article_id))) => {
                    match self.analyzer.confirm_selection(date, &article_id).await {
                        Ok(_) => break None,
                        Err(AnalysisError::UnknownArticle(id)) => {
                            warn!(%date, article = %id, "Chosen article is not a candidate, asking again");
                            self.emit(BulkEvent::SelectionRequired {
                                request: request.clone(),
                            });
                        }
                        Err(e) => {
                            self.fail_date(date, &e);
                            break None;
                        }
                    }
                }
            }
        };

        if stop.is_some() || self.analyzer.pending_selection(date).is_some() {
            self.analyzer.discard_selection(date);
        }
        self.update(|s| {
            s.status = BulkStatus::Running;
            s.pending_selection = None;
        });
        stop
    }
}
