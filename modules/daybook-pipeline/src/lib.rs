pub mod analyzer;
pub mod bulk;
pub mod error;
pub mod fact_check;
pub mod fetcher;
pub mod judge;
pub mod llm;
pub mod retry;
pub mod reverify;
pub mod selection;
pub mod summary;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use analyzer::{AnalysisOutcome, Analyzer, SkipReason};
pub use bulk::{BulkEvent, BulkHandle, BulkOrchestrator, BulkSnapshot, BulkStatus, SelectionDecision};
pub use error::{AnalysisError, ProviderError};
pub use fact_check::{FactCheckOutcome, FactChecker};
pub use fetcher::{ExaArticleSource, TierFetcher};
pub use judge::SignificanceJudge;
pub use llm::{build_provider, LlmProvider};
pub use retry::RetryPolicy;
pub use reverify::{ReVerifier, ReVerifyOutcome};
pub use selection::{LabelSet, Resolution, Selected, SelectionMode, SelectionRequest, SelectionResolver};
pub use summary::Summarizer;
pub use traits::{AiProvider, ArticleLabel, ArticleSource, Judgment, VerificationReport};
