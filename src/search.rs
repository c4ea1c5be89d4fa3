//! Tavily web search client.
//!
//! Enabled when TAVILY_API_KEY (or TAVAPI) is set. Without a key the search
//! routes answer with an error and the LLM routes run without context.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

pub const TAVILY_BASE_URL: &str = "https://api.tavily.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    #[default]
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub depth: SearchDepth,
    pub include_images: bool,
    pub max_results: Option<u32>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            depth: SearchDepth::Advanced,
            include_images: true,
            max_results: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub raw_content: Option<String>,
}

/// Tavily returns images either as bare URLs or as `{ url, description }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawImage {
    Url(String),
    Described {
        url: String,
        #[serde(default)]
        description: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchImage {
    pub url: String,
    pub description: Option<String>,
}

impl From<RawImage> for SearchImage {
    fn from(raw: RawImage) -> Self {
        match raw {
            RawImage::Url(url) => SearchImage {
                url,
                description: None,
            },
            RawImage::Described { url, description } => SearchImage { url, description },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TavilySearchResponse {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub follow_up_questions: Option<Vec<String>>,
    #[serde(default)]
    pub images: Vec<RawImage>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub response_time: f64,
}

impl TavilySearchResponse {
    /// Images with empty URLs dropped.
    pub fn images(&self) -> Vec<SearchImage> {
        self.images
            .iter()
            .cloned()
            .map(SearchImage::from)
            .filter(|img| !img.url.is_empty())
            .collect()
    }
}

/// Result handed back to the search page: either the data or an error string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    Success { success: bool, data: TavilySearchResponse },
    Failure { success: bool, error: String },
}

impl SearchOutcome {
    pub fn from_result(res: Result<TavilySearchResponse>) -> Self {
        match res {
            Ok(data) => SearchOutcome::Success {
                success: true,
                data,
            },
            Err(e) => {
                error!("Search error: {:#}", e);
                SearchOutcome::Failure {
                    success: false,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct TavilyClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl TavilyClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<TavilySearchResponse> {
        info!(depth = ?options.depth, "Web search: {}", query);

        let mut body = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": options.depth,
            "include_answer": true,
            "include_images": options.include_images,
        });
        if let Some(max) = options.max_results {
            body["max_results"] = json!(max);
        }

        let resp = self
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Search request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(%status, body = %text, "Tavily API error");
            anyhow::bail!("HTTP error! status: {}", status.as_u16());
        }

        resp.json::<TavilySearchResponse>()
            .await
            .map_err(|e| anyhow::anyhow!("Search response parse failed: {}", e))
    }

    /// Advanced search reduced to a JSON list of `{url, content}` pairs, used as
    /// grounding context for the chat route.
    pub async fn search_context(&self, query: &str) -> Result<String> {
        let resp = self
            .search(
                query,
                &SearchOptions {
                    depth: SearchDepth::Advanced,
                    include_images: false,
                    max_results: Some(5),
                },
            )
            .await?;
        Ok(context_json(&resp))
    }
}

fn context_json(resp: &TavilySearchResponse) -> String {
    let sources: Vec<_> = resp
        .results
        .iter()
        .map(|r| json!({ "url": r.url, "content": r.content }))
        .collect();
    serde_json::Value::Array(sources).to_string()
}

/// Answer followed by `title\ncontent` blocks, for model consumption.
pub fn format_context(resp: &TavilySearchResponse) -> String {
    let sources = resp
        .results
        .iter()
        .map(|r| format!("{}\n{}", r.title, r.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    let answer = resp.answer.as_deref().unwrap_or("");
    format!("Search Results:\n{}\n{}", answer, sources)
        .trim()
        .to_string()
}
