use chrono::NaiveDate;
use thiserror::Error;

use daybook_common::DaybookError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record for {0} is a manual override and cannot be changed automatically")]
    ManualOverride(NaiveDate),
}

impl From<StoreError> for DaybookError {
    fn from(err: StoreError) -> Self {
        DaybookError::Store(err.to_string())
    }
}
