use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::sse::data_lines;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4-turbo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chunk from a completion stream: content delta or token usage metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamChunk {
    Delta(String),
    Usage(serde_json::Value),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatStreamChunk>> + Send>>;

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct ChatClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Starts a streamed completion over `messages`.
    pub async fn stream_chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<ChatStream> {
        debug!(model = %self.model, messages = messages.len(), "Starting completion stream");

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": true,
                "stream_options": { "include_usage": true },
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start stream for {}: {}", self.model, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(%status, body = %text, "Completion request rejected");
            anyhow::bail!("Completion request failed with status {}", status.as_u16());
        }

        let stream = data_lines(resp.bytes_stream()).map(|line| line.and_then(|data| parse_chunk(&data)));
        Ok(Box::pin(stream))
    }
}

fn parse_chunk(data: &str) -> anyhow::Result<ChatStreamChunk> {
    let chunk: StreamResponse = serde_json::from_str(data)
        .map_err(|e| anyhow::anyhow!("Malformed stream chunk: {}", e))?;

    if let Some(error) = chunk.error {
        let msg = error
            .get("message")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        anyhow::bail!("Stream error: {}", msg);
    }

    if let Some(usage) = chunk.usage.filter(|u| !u.is_null()) {
        return Ok(ChatStreamChunk::Usage(usage));
    }

    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    Ok(ChatStreamChunk::Delta(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("data: {l}\n\n")).collect()
    }

    #[tokio::test]
    async fn streams_deltas_then_usage() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[],"usage":{"total_tokens":12}}"#,
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "stream": true,
                "messages": [{ "role": "system", "content": "be brief" }, { "role": "user", "content": "hi" }],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new("sk-test", server.uri(), "gpt-test", reqwest::Client::new());
        let stream = client
            .stream_chat(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")])
            .await
            .unwrap();
        let chunks: Vec<_> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(
            chunks,
            vec![
                ChatStreamChunk::Delta(String::new()),
                ChatStreamChunk::Delta("Hel".into()),
                ChatStreamChunk::Delta("lo".into()),
                ChatStreamChunk::Usage(json!({ "total_tokens": 12 })),
            ]
        );
    }

    #[tokio::test]
    async fn rejected_request_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = ChatClient::new("sk-test", server.uri(), "gpt-test", reqwest::Client::new());
        let err = client
            .stream_chat(vec![ChatMessage::user("hi")])
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn error_payload_becomes_stream_error() {
        let err = parse_chunk(r#"{"error":{"message":"context too long"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "Stream error: context too long");
    }

    #[test]
    fn malformed_chunk_is_an_error() {
        assert!(parse_chunk("{oops").is_err());
    }
}
