use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use super::types::*;
use crate::error::AiError;

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub(crate) struct CompatClient {
    provider: &'static str,
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl CompatClient {
    pub fn new(provider: &'static str, http: reqwest::Client, api_key: &str, base_url: &str) -> Self {
        Self {
            provider,
            api_key: api_key.to_string(),
            http,
            base_url: base_url.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, AiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| AiError::Config(format!("invalid {} API key header: {e}", self.provider)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send a chat request and return the first choice's content plus citations.
    pub async fn chat(&self, request: &ChatRequest) -> Result<(String, Vec<String>), AiError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(provider = self.provider, model = %request.model, "Chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .into_content()
            .ok_or(AiError::EmptyResponse(self.provider))
    }
}
