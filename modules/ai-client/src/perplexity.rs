use async_trait::async_trait;

use crate::error::AiError;
use crate::openai::types::ChatRequest;
use crate::openai::CompatClient;
use crate::traits::{ChatModel, Completion, Grounded};
use crate::util::strip_code_blocks;

const PERPLEXITY_API_URL: &str = "https://api.perplexity.ai";

/// Perplexity's search-grounded chat models. The wire format is OpenAI
/// compatible; responses carry a top-level `citations` list of source URLs.
#[derive(Clone)]
pub struct Perplexity {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl Perplexity {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: PERPLEXITY_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, AiError> {
        let api_key = std::env::var("PERPLEXITY_API_KEY")
            .map_err(|_| AiError::Config("PERPLEXITY_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn client(&self) -> CompatClient {
        CompatClient::new("perplexity", self.http.clone(), &self.api_key, &self.base_url)
    }
}

#[async_trait]
impl ChatModel for Perplexity {
    fn provider(&self) -> &'static str {
        "perplexity"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, AiError> {
        let request = ChatRequest::new(&self.model, system, user);
        let (text, citations) = self.client().chat(&request).await?;
        Ok(Completion { text, citations })
    }

    async fn extract_json(
        &self,
        system: &str,
        user: &str,
        schema: serde_json::Value,
    ) -> Result<Grounded<serde_json::Value>, AiError> {
        // Perplexity accepts json_schema but not the `strict` flag.
        let request =
            ChatRequest::new(&self.model, system, user).json_schema("structured_response", schema, false);
        let (text, citations) = self.client().chat(&request).await?;
        let value = serde_json::from_str(strip_code_blocks(&text))?;
        Ok(Grounded { value, citations })
    }
}
