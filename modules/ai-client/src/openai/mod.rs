mod client;
pub(crate) mod types;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{ChatModel, Completion, Grounded};
use crate::util::strip_code_blocks;

pub(crate) use client::CompatClient;
use types::ChatRequest;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

// =============================================================================
// OpenAi
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, AiError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn client(&self) -> CompatClient {
        CompatClient::new("openai", self.http.clone(), &self.api_key, &self.base_url)
    }
}

#[async_trait]
impl ChatModel for OpenAi {
    fn provider(&self) -> &'static str {
        "openai"
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
        let request =
            ChatRequest::new(&self.model, system, user).json_schema("structured_response", schema, true);
        let (text, citations) = self.client().chat(&request).await?;
        let value = serde_json::from_str(strip_code_blocks(&text))?;
        Ok(Grounded { value, citations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o");
        assert_eq!(ai.model(), "gpt-4o");
        assert_eq!(ai.provider(), "openai");
    }

    #[test]
    fn structured_request_is_strict() {
        let request = ChatRequest::new("gpt-4o", "sys", "user").json_schema(
            "structured_response",
            serde_json::json!({"type": "object"}),
            true,
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn response_citations_default_to_empty() {
        let raw = r#"{"choices":[{"message":{"content":"hi"}}]}"#;
        let parsed: types::ChatResponse = serde_json::from_str(raw).unwrap();
        let (content, citations) = parsed.into_content().unwrap();
        assert_eq!(content, "hi");
        assert!(citations.is_empty());
    }
}
