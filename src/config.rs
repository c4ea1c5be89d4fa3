use tracing::info;

use crate::droplert::ReconnectPolicy;
use crate::llm::{ChatClient, DEFAULT_MODEL, OPENAI_BASE_URL};
use crate::search::{TavilyClient, TAVILY_BASE_URL};

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SITE_URL: &str = "http://localhost:3000";

/// Everything read from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub bind_addr: String,
    /// Origin announced to the notification server. Derived from the request
    /// `Host` header by the verify route when unset.
    pub site_url: Option<String>,
    pub tavily_api_key: Option<String>,
    pub tavily_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub ws_server_url: Option<String>,
    pub droplert_id: Option<String>,
    pub droplert_key: Option<String>,
    pub reconnect: ReconnectPolicy,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` returns the raw value of a variable; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(*key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        };

        let reconnect = match get(&["DROPLERT_RECONNECT"]).as_deref() {
            Some(v) if v.eq_ignore_ascii_case("backoff") => ReconnectPolicy::backoff(),
            _ => ReconnectPolicy::default(),
        };

        Self {
            bind_addr: get(&["BIND_ADDR"]).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            site_url: get(&["SITE_URL"]).map(|u| u.trim_end_matches('/').to_string()),
            tavily_api_key: get(&["TAVILY_API_KEY", "TAVAPI"]),
            tavily_base_url: get(&["TAVILY_BASE_URL"]).unwrap_or_else(|| TAVILY_BASE_URL.to_string()),
            openai_api_key: get(&["OPENAI_API_KEY"]),
            openai_base_url: get(&["OPENAI_BASE_URL"]).unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            openai_model: get(&["OPENAI_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ws_server_url: get(&["WS_SERVER_URL", "NEXT_PUBLIC_WS_SERVER_URL"]),
            droplert_id: get(&["DROPLERT_ID", "NEXT_PUBLIC_DROPLERT_ID"]),
            droplert_key: get(&["DROPLERT_KEY"]),
            reconnect,
        }
    }

    pub fn site_url_or_default(&self) -> &str {
        self.site_url.as_deref().unwrap_or(DEFAULT_SITE_URL)
    }

    /// Logs which keys are present without revealing them.
    pub fn log_key_check(&self) {
        let check_key = |name: &str, value: &Option<String>| match value {
            Some(val) => {
                let mask = if val.len() > 4 {
                    format!("{}...", val.chars().take(4).collect::<String>())
                } else {
                    "***".to_string()
                };
                info!("🔑 Key check: {} is SET (Starts with: {})", name, mask);
            }
            None => info!("❌ Key check: {} is MISSING", name),
        };
        check_key("Tavily", &self.tavily_api_key);
        check_key("OpenAI", &self.openai_api_key);
        check_key("Droplert", &self.droplert_key);
    }
}

/// API clients available for this run. A missing key disables the matching client.
#[derive(Clone)]
pub struct Clients {
    pub http: reqwest::Client,
    pub tavily: Option<TavilyClient>,
    pub chat: Option<ChatClient>,
}

pub fn init_clients(settings: &Settings) -> anyhow::Result<Clients> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("droplert-search/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

    let tavily = settings
        .tavily_api_key
        .as_ref()
        .map(|key| TavilyClient::new(key.as_str(), settings.tavily_base_url.as_str(), http.clone()));
    let chat = settings.openai_api_key.as_ref().map(|key| {
        ChatClient::new(
            key.as_str(),
            settings.openai_base_url.as_str(),
            settings.openai_model.as_str(),
            http.clone(),
        )
    });

    if let Some(chat) = &chat {
        info!("✅ Completion provider ready, model: {}", chat.model());
    }
    if tavily.is_some() {
        info!("✅ Tavily search ready");
    }

    Ok(Clients { http, tavily, chat })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let s = settings(&[]);
        assert_eq!(s.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(s.tavily_base_url, TAVILY_BASE_URL);
        assert_eq!(s.openai_model, DEFAULT_MODEL);
        assert_eq!(s.droplert_id, None);
        assert_eq!(s.reconnect, ReconnectPolicy::default());
        assert_eq!(s.site_url_or_default(), DEFAULT_SITE_URL);
    }

    #[test]
    fn legacy_names_are_accepted() {
        let s = settings(&[
            ("TAVAPI", "tvly-legacy"),
            ("NEXT_PUBLIC_WS_SERVER_URL", "wss://push.test"),
            ("NEXT_PUBLIC_DROPLERT_ID", "drop-9"),
        ]);
        assert_eq!(s.tavily_api_key.as_deref(), Some("tvly-legacy"));
        assert_eq!(s.ws_server_url.as_deref(), Some("wss://push.test"));
        assert_eq!(s.droplert_id.as_deref(), Some("drop-9"));
    }

    #[test]
    fn primary_names_win_and_blank_values_are_unset() {
        let s = settings(&[
            ("TAVILY_API_KEY", "tvly-new"),
            ("TAVAPI", "tvly-legacy"),
            ("DROPLERT_ID", "  "),
            ("SITE_URL", "https://site.test/"),
        ]);
        assert_eq!(s.tavily_api_key.as_deref(), Some("tvly-new"));
        assert_eq!(s.droplert_id, None);
        assert_eq!(s.site_url.as_deref(), Some("https://site.test"));
    }

    #[test]
    fn backoff_is_opt_in() {
        let s = settings(&[("DROPLERT_RECONNECT", "Backoff")]);
        assert_eq!(s.reconnect, ReconnectPolicy::backoff());
    }

    #[test]
    fn clients_follow_key_presence() {
        let clients = init_clients(&settings(&[("OPENAI_API_KEY", "sk-x")])).unwrap();
        assert!(clients.chat.is_some());
        assert!(clients.tavily.is_none());
    }
}
