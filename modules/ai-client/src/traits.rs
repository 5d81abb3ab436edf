use async_trait::async_trait;

use crate::error::AiError;
use crate::schema::StructuredOutput;

/// Plain-text completion plus any source URLs the provider attached.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub citations: Vec<String>,
}

/// A structured value with the citations that came back alongside it.
#[derive(Debug, Clone)]
pub struct Grounded<T> {
    pub value: T,
    pub citations: Vec<String>,
}

// =============================================================================
// ChatModel Trait
// =============================================================================

/// One chat backend (a provider + model pair). Object-safe so callers can hold
/// `Arc<dyn ChatModel>` and pick the backend from configuration.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Short provider name used in logs and provenance fields.
    fn provider(&self) -> &'static str;

    fn model(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, AiError>;

    /// Ask for a JSON value conforming to `schema`.
    async fn extract_json(
        &self,
        system: &str,
        user: &str,
        schema: serde_json::Value,
    ) -> Result<Grounded<serde_json::Value>, AiError>;
}

/// Typed structured extraction on top of [`ChatModel::extract_json`].
pub async fn extract<T: StructuredOutput>(
    model: &dyn ChatModel,
    system: &str,
    user: &str,
) -> Result<Grounded<T>, AiError> {
    let raw = model.extract_json(system, user, T::strict_schema()).await?;
    let value = serde_json::from_value(raw.value).map_err(|e| {
        AiError::Parse(format!(
            "{} returned JSON that does not match {}: {e}",
            model.provider(),
            T::type_name()
        ))
    })?;
    Ok(Grounded {
        value,
        citations: raw.citations,
    })
}
