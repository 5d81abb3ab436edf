use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use daybook_common::{parse_date_hint, EventRecord, ProviderCheck, RecordPatch, Verdict};

use crate::retry::RetryPolicy;
use crate::traits::{AiProvider, VerificationReport};

/// Two verification providers asked the same question concurrently.
pub struct FactChecker {
    primary: Arc<dyn AiProvider>,
    secondary: Arc<dyn AiProvider>,
    retry: RetryPolicy,
}

/// Both providers' opinions on one record.
#[derive(Debug, Clone, PartialEq)]
pub struct FactCheckOutcome {
    pub date: NaiveDate,
    pub primary_provider: String,
    pub secondary_provider: String,
    pub primary: ProviderCheck,
    pub secondary: ProviderCheck,
}

impl FactChecker {
    pub fn new(primary: Arc<dyn AiProvider>, secondary: Arc<dyn AiProvider>, retry: RetryPolicy) -> Self {
        Self {
            primary,
            secondary,
            retry,
        }
    }

    /// Never fails. A provider that errors or stalls past the timeout is
    /// recorded as uncertain with zero confidence.
    pub async fn check(&self, date: NaiveDate, summary: &str) -> FactCheckOutcome {
        let (primary, secondary) = tokio::join!(
            self.ask(&self.primary, date, summary),
            self.ask(&self.secondary, date, summary),
        );

        let outcome = FactCheckOutcome {
            date,
            primary_provider: self.primary.name().to_string(),
            secondary_provider: self.secondary.name().to_string(),
            primary,
            secondary,
        };
        info!(
            %date,
            primary = %outcome.primary.verdict,
            secondary = %outcome.secondary.verdict,
            corrected = ?outcome.corrected_date(),
            "Fact check complete"
        );
        outcome
    }

    async fn ask(&self, provider: &Arc<dyn AiProvider>, date: NaiveDate, summary: &str) -> ProviderCheck {
        match self
            .retry
            .run("verify", || provider.verify(date, summary))
            .await
        {
            Ok(report) => to_check(report),
            Err(e) => {
                warn!(%date, provider = provider.name(), error = %e, "Verification failed");
                ProviderCheck::failed(e)
            }
        }
    }
}

fn to_check(report: VerificationReport) -> ProviderCheck {
    ProviderCheck {
        verdict: report.verdict,
        confidence: report.confidence.min(100),
        reasoning: report.reasoning,
        correct_date_text: report.correct_date_text,
        citations: report.citations,
        checked_at: Utc::now(),
    }
}

impl FactCheckOutcome {
    /// Rebuild the outcome stored on a record. `None` until both checks ran.
    pub fn from_record(record: &EventRecord) -> Option<Self> {
        Some(Self {
            date: record.date,
            primary_provider: "fact check".to_string(),
            secondary_provider: "cross check".to_string(),
            primary: record.fact_check()?,
            secondary: record.cross_check()?,
        })
    }

    /// The secondary provider's corrected-date hint. Only that hint is
    /// stored on the record, so a primary hint is ignored here too.
    pub fn hint(&self) -> Option<&str> {
        self.secondary
            .correct_date_text
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    /// The hinted date, when it parses and differs from the record's date.
    pub fn corrected_date(&self) -> Option<NaiveDate> {
        self.hint()
            .and_then(parse_date_hint)
            .filter(|d| *d != self.date)
    }

    /// A hint was given but holds no calendar date.
    pub fn unparseable_hint(&self) -> Option<&str> {
        self.hint().filter(|h| parse_date_hint(h).is_none())
    }

    pub fn is_contradicted(&self) -> bool {
        self.primary.verdict == Verdict::Contradicted || self.secondary.verdict == Verdict::Contradicted
    }

    pub fn both_verified(&self) -> bool {
        self.primary.verdict == Verdict::Verified && self.secondary.verdict == Verdict::Verified
    }

    /// One verified, the other contradicted.
    pub fn disagree(&self) -> bool {
        matches!(
            (self.primary.verdict, self.secondary.verdict),
            (Verdict::Verified, Verdict::Contradicted) | (Verdict::Contradicted, Verdict::Verified)
        )
    }

    /// Lower of the two confidences when both verified.
    pub fn agreed_confidence(&self) -> Option<u8> {
        self.both_verified()
            .then(|| self.primary.confidence.min(self.secondary.confidence))
    }

    /// Why the record needs a human look, if it does. A usable corrected date
    /// is not a flag by itself; re-verification decides that case.
    pub fn flag_reason(&self) -> Option<String> {
        if let Some(hint) = self.unparseable_hint() {
            return Some(format!("Corrected date hint '{hint}' could not be parsed"));
        }
        if !self.is_contradicted() || self.corrected_date().is_some() {
            return None;
        }
        if self.disagree() {
            let (verifier, contradictor) = if self.primary.verdict == Verdict::Verified {
                (&self.primary_provider, &self.secondary_provider)
            } else {
                (&self.secondary_provider, &self.primary_provider)
            };
            return Some(format!(
                "Fact checkers disagree: {verifier} verified, {contradictor} contradicted"
            ));
        }
        let (provider, check) = if self.primary.verdict == Verdict::Contradicted {
            (&self.primary_provider, &self.primary)
        } else {
            (&self.secondary_provider, &self.secondary)
        };
        Some(format!(
            "Contradicted by {provider} with no usable corrected date: {}",
            check.reasoning
        ))
    }

    /// Check fields for both providers, plus a flag when one is warranted.
    pub fn patch(&self) -> RecordPatch {
        let patch = RecordPatch::automated()
            .fact_check(self.primary.clone())
            .cross_check(self.secondary.clone());
        match self.flag_reason() {
            Some(reason) => patch.flag(reason),
            None => patch,
        }
    }
}
