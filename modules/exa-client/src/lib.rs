pub mod error;
pub mod types;

pub use error::{ExaError, Result};
pub use types::{ContentsOptions, SearchRequest, SearchResponse, SearchResult, SummaryOptions};

const BASE_URL: &str = "https://api.exa.ai";

pub struct ExaClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ExaClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Run a search and fetch contents for every hit in one call.
    pub async fn search_and_contents(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let url = format!("{}/search", self.base_url);

        tracing::debug!(query = %request.query, num_results = request.num_results, "Exa search");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExaError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: SearchResponse = resp.json().await?;
        tracing::debug!(query = %request.query, count = body.results.len(), "Exa search complete");
        Ok(body.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn day_bounds_and_next_midnight_exclusion() {
        let date = NaiveDate::from_ymd_opt(2024, 4, 19).unwrap();
        let request = SearchRequest::news_on_day("bitcoin news", date, 10);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["startPublishedDate"], "2024-04-19T00:00:00.000Z");
        assert_eq!(body["endPublishedDate"], "2024-04-19T23:59:59.999Z");
        assert_eq!(body["excludeText"][0], "2024-04-20T00:00:00.000Z");
        assert_eq!(body["numResults"], 10);
        assert_eq!(body["type"], "neural");
        assert_eq!(body["contents"]["summary"]["query"], "Create 50 words summary");
        assert!(body.get("includeDomains").is_none());
    }

    #[test]
    fn month_rollover_in_exclusion() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let request = SearchRequest::news_on_day("q", date, 5).include_domains(["reuters.com"]);
        assert_eq!(request.exclude_text, vec!["2024-03-01T00:00:00.000Z".to_string()]);
        assert_eq!(request.include_domains, vec!["reuters.com".to_string()]);
    }

    #[test]
    fn parses_sparse_results() {
        let raw = r#"{"results":[{"id":"a1","url":"https://example.com/a","publishedDate":"2024-04-19T08:00:00.000Z"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert!(parsed.results[0].title.is_none());
        assert!(parsed.results[0].published_date.is_some());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(ExaError::Api { status: 502, message: String::new() }.is_transient());
        assert!(!ExaError::Api { status: 401, message: String::new() }.is_transient());
    }
}
