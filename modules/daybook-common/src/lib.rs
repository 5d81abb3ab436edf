pub mod agent;
pub mod cancel;
pub mod config;
pub mod dates;
pub mod error;
pub mod types;

pub use agent::*;
pub use cancel::CancelFlag;
pub use config::{Config, ProviderKind, ReVerifyWeighting, SelectionStrategy};
pub use dates::parse_date_hint;
pub use error::DaybookError;
pub use types::*;
