use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaybookError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Date {0} is locked by another run")]
    DateLocked(NaiveDate),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
