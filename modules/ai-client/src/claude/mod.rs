mod client;
mod types;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{ChatModel, Completion, Grounded};

use client::ClaudeClient;
use types::{ChatRequest, WireMessage};

const STRUCTURED_TOOL: &str = "structured_response";

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, AiError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AiError::Config("ANTHROPIC_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    fn client(&self) -> ClaudeClient {
        ClaudeClient::new(self.http.clone(), &self.api_key, self.base_url.as_deref())
    }
}

#[async_trait]
impl ChatModel for Claude {
    fn provider(&self) -> &'static str {
        "claude"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, AiError> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user));

        let response = self.client().chat(&request).await?;
        let text = response.text().ok_or(AiError::EmptyResponse("claude"))?;

        Ok(Completion {
            text,
            citations: Vec::new(),
        })
    }

    async fn extract_json(
        &self,
        system: &str,
        user: &str,
        schema: serde_json::Value,
    ) -> Result<Grounded<serde_json::Value>, AiError> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .forced_tool(STRUCTURED_TOOL, schema);

        let response = self.client().chat(&request).await?;
        let value = response
            .tool_input()
            .ok_or(AiError::EmptyResponse("claude"))?;

        Ok(Grounded {
            value,
            citations: Vec::new(),
        })
    }
}
