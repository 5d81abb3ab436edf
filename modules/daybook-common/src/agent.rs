use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DaybookError;

// --- Configuration ---

/// Estimated USD cost of each paid operation. Reserved against the budget
/// before the call is made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationCosts {
    pub fact_check: f64,
    pub re_verification: f64,
    pub re_analysis: f64,
}

impl Default for OperationCosts {
    fn default() -> Self {
        Self {
            fact_check: 0.02,
            re_verification: 0.05,
            re_analysis: 0.05,
        }
    }
}

/// Limits and switches for one curator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_runtime_hours: f64,
    /// USD
    pub max_budget: f64,
    pub max_passes: u32,
    pub parallel_workers: usize,
    pub batch_size: usize,
    pub test_mode: bool,
    pub test_limit: usize,
    /// Confidence percentage at or above which a decision is applied without review.
    pub auto_approve_threshold: u8,
    pub skip_verification: bool,
    pub costs: OperationCosts,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_runtime_hours: 4.0,
            max_budget: 35.0,
            max_passes: 10,
            parallel_workers: 5,
            batch_size: 100,
            test_mode: false,
            test_limit: 50,
            auto_approve_threshold: 90,
            skip_verification: false,
            costs: OperationCosts::default(),
        }
    }
}

impl AgentConfig {
    pub const AUTO_APPROVE_THRESHOLD: u8 = 70;

    pub fn validate(&self) -> Result<(), DaybookError> {
        if !self.max_budget.is_finite() || self.max_budget < 0.0 {
            return Err(DaybookError::Validation(format!(
                "max_budget must be a non-negative amount, got {}",
                self.max_budget
            )));
        }
        if !self.max_runtime_hours.is_finite() || self.max_runtime_hours < 0.0 {
            return Err(DaybookError::Validation(format!(
                "max_runtime_hours must be non-negative, got {}",
                self.max_runtime_hours
            )));
        }
        if self.parallel_workers == 0 {
            return Err(DaybookError::Validation(
                "parallel_workers must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(DaybookError::Validation("batch_size must be at least 1".into()));
        }
        if self.auto_approve_threshold > 100 {
            return Err(DaybookError::Validation(format!(
                "auto_approve_threshold must be 0-100, got {}",
                self.auto_approve_threshold
            )));
        }
        let costs = [
            self.costs.fact_check,
            self.costs.re_verification,
            self.costs.re_analysis,
        ];
        if costs.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(DaybookError::Validation(
                "operation costs must be non-negative".into(),
            ));
        }
        Ok(())
    }

    pub fn max_runtime(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.max_runtime_hours * 3600.0)
            .unwrap_or(std::time::Duration::MAX)
    }
}

// --- Session ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CuratorPhase {
    Verification,
    Cleanup,
    Completed,
}

impl fmt::Display for CuratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CuratorPhase::Verification => write!(f, "verification"),
            CuratorPhase::Cleanup => write!(f, "cleanup"),
            CuratorPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Why a run stopped before finishing its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    Runtime,
    Budget,
    TestLimit,
    Cancelled,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Runtime => write!(f, "runtime limit reached"),
            HaltReason::Budget => write!(f, "budget exhausted"),
            HaltReason::TestLimit => write!(f, "test limit reached"),
            HaltReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuratorCounters {
    pub processed: u64,
    pub approved: u64,
    pub rejected: u64,
    pub flagged: u64,
    pub deferred: u64,
    /// USD
    pub spent: f64,
}

impl fmt::Display for CuratorCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} approved={} rejected={} flagged={} deferred={} spent=${:.2}",
            self.processed, self.approved, self.rejected, self.flagged, self.deferred, self.spent
        )
    }
}

/// A change the curator would have written, recorded instead of applied in test mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub date: NaiveDate,
    pub action: String,
    pub detail: String,
    pub confidence: Option<u8>,
}

/// Checkpointed state of a curator run. Enough to continue the same phase and
/// pass after an interruption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratorSession {
    pub id: Uuid,
    pub config: AgentConfig,
    pub phase: CuratorPhase,
    pub pass: u32,
    pub queue: VecDeque<NaiveDate>,
    pub deferred: VecDeque<NaiveDate>,
    pub counters: CuratorCounters,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Seconds of active work across all resumptions.
    pub active_secs: f64,
    pub halted: Option<HaltReason>,
    #[serde(default)]
    pub planned: Vec<PlannedChange>,
}

impl CuratorSession {
    pub fn new(config: AgentConfig) -> Self {
        let now = Utc::now();
        let phase = if config.skip_verification {
            CuratorPhase::Cleanup
        } else {
            CuratorPhase::Verification
        };
        Self {
            id: Uuid::new_v4(),
            config,
            phase,
            pass: 0,
            queue: VecDeque::new(),
            deferred: VecDeque::new(),
            counters: CuratorCounters::default(),
            started_at: now,
            updated_at: now,
            active_secs: 0.0,
            halted: None,
            planned: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == CuratorPhase::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli() {
        let config = AgentConfig::default();
        assert_eq!(config.max_runtime_hours, 4.0);
        assert_eq!(config.max_budget, 35.0);
        assert_eq!(config.max_passes, 10);
        assert_eq!(config.parallel_workers, 5);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.test_limit, 50);
        assert_eq!(config.auto_approve_threshold, 90);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_limits() {
        let bad = [
            AgentConfig { max_budget: -1.0, ..Default::default() },
            AgentConfig { max_budget: f64::NAN, ..Default::default() },
            AgentConfig { max_runtime_hours: -0.5, ..Default::default() },
            AgentConfig { parallel_workers: 0, ..Default::default() },
            AgentConfig { batch_size: 0, ..Default::default() },
            AgentConfig { auto_approve_threshold: 101, ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(DaybookError::Validation(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn zero_budget_is_valid() {
        let config = AgentConfig { max_budget: 0.0, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn skipping_verification_starts_in_cleanup() {
        let session = CuratorSession::new(AgentConfig {
            skip_verification: true,
            ..Default::default()
        });
        assert_eq!(session.phase, CuratorPhase::Cleanup);
        assert_eq!(CuratorSession::new(AgentConfig::default()).phase, CuratorPhase::Verification);
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"max_budget": 5.0}"#).unwrap();
        assert_eq!(config.max_budget, 5.0);
        assert_eq!(config.parallel_workers, 5);
    }
}
