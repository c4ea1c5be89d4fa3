use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::droplert::{Notification, NotificationHandle, Presentation};
use crate::llm::{ChatClient, ChatMessage};
use crate::search::{SearchDepth, TavilyClient};

pub struct AppState {
    pub settings: Settings,
    pub http: reqwest::Client,
    pub tavily: Option<TavilyClient>,
    pub chat: Option<ChatClient>,
    /// Present when the Droplert client is configured.
    pub notifications: Option<NotificationHandle>,
    pub start_time: Instant,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, alias = "strength")]
    pub search_depth: SearchDepth,
}

#[derive(Deserialize)]
pub struct ImageSearchRequest {
    pub query: String,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

#[derive(Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyForward<'a> {
    pub droplert_id: &'a str,
    pub website_url: &'a str,
}

/// Notification as served to the page, with the variant it should render as.
#[derive(Serialize)]
pub struct NotificationView {
    pub presentation: Option<Presentation>,
    #[serde(flatten)]
    pub notification: Notification,
}

impl From<Notification> for NotificationView {
    fn from(notification: Notification) -> Self {
        Self {
            presentation: notification.presentation(),
            notification,
        }
    }
}

/// Max accepted query length, in bytes.
pub const MAX_QUERY_LEN: usize = 2000;
