use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Search request ---

/// Body for `POST /search`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(rename = "type")]
    pub search_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub num_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_published_date: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_text: Vec<String>,
    pub contents: ContentsOptions,
}

impl SearchRequest {
    /// Neural news search restricted to a single UTC calendar day.
    ///
    /// Articles whose text mentions the following midnight are excluded; those
    /// are usually next-day stories that were backdated by the publisher.
    pub fn news_on_day(query: impl Into<String>, date: NaiveDate, num_results: u32) -> Self {
        let next = date.succ_opt().unwrap_or(date);
        Self {
            query: query.into(),
            search_type: "neural".to_string(),
            category: Some("news".to_string()),
            num_results,
            start_published_date: Some(format!("{date}T00:00:00.000Z")),
            end_published_date: Some(format!("{date}T23:59:59.999Z")),
            include_domains: Vec::new(),
            exclude_text: vec![format!("{next}T00:00:00.000Z")],
            contents: ContentsOptions::with_summary("Create 50 words summary"),
        }
    }

    pub fn include_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_domains = domains.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentsOptions {
    pub text: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryOptions>,
}

impl ContentsOptions {
    pub fn with_summary(query: impl Into<String>) -> Self {
        Self {
            text: true,
            summary: Some(SummaryOptions {
                query: query.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryOptions {
    pub query: String,
}

// --- Search response ---

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

/// A single search hit with its fetched contents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub score: Option<f64>,
    pub text: Option<String>,
    pub summary: Option<String>,
}
