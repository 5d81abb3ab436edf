pub mod agent;
pub mod budget;
pub mod error;
pub mod issues;

pub use agent::{CuratorAgent, CuratorStatus};
pub use budget::BudgetTracker;
pub use error::CuratorError;
pub use issues::{classify, IssueKind};
