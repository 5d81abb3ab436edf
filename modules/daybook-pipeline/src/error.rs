use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use ai_client::AiError;
use daybook_common::DaybookError;
use daybook_store::StoreError;
use exa_client::ExaError;

/// A failed call to an external provider (chat model or article search).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Search(#[from] ExaError),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid provider response: {0}")]
    Invalid(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Ai(e) => e.is_transient(),
            ProviderError::Search(e) => e.is_transient(),
            ProviderError::Timeout(_) => true,
            ProviderError::Invalid(_) => false,
        }
    }
}

impl From<ProviderError> for DaybookError {
    fn from(err: ProviderError) -> Self {
        DaybookError::Provider(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Article {0} is not among the candidates for this date")]
    UnknownArticle(String),

    #[error("No pending selection or stored articles for {0}")]
    NoPendingSelection(NaiveDate),

    #[error("Record for {0} is a manual override")]
    ManualOverride(NaiveDate),

    #[error("Date {0} is locked by another run")]
    DateLocked(NaiveDate),

    #[error("Summary failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AnalysisError> for DaybookError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::DateLocked(date) => DaybookError::DateLocked(date),
            AnalysisError::Store(e) => e.into(),
            AnalysisError::Provider(e) => e.into(),
            other => DaybookError::Validation(other.to_string()),
        }
    }
}
