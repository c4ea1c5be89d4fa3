use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::droplert::{Notification, NotificationHandle};
use crate::llm::{ChatMessage, ChatStreamChunk};
use crate::prompts::{build_chat_prompt, build_completion_prompt};
use crate::search::{format_context, SearchDepth, SearchOptions, SearchOutcome};
use crate::types::{
    AppState, ChatRequest, CompletionRequest, ImageSearchRequest, NotificationView,
    SearchRequest, VerifyForward, MAX_QUERY_LEN,
};

/// Build the Axum router over the shared state.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/search", post(search))
        .route("/api/tavily-search", post(image_search))
        .route("/api/chat", post(chat_stream))
        .route("/api/completion", post(completion))
        .route("/api/droplert/verify", post(droplert_verify))
        .route("/api/droplert/current", get(droplert_current))
        .route("/api/droplert/stream", get(droplert_stream))
        .route("/api/droplert/dismiss", post(droplert_dismiss))
        .route("/api/droplert/preview", post(droplert_preview))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(120),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .with_state(state)
}

pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    info!(
        "droplert-search v{} running at http://{}",
        env!("CARGO_PKG_VERSION"),
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

// --- HTTP handlers -----------------------------------------------------------

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "features": {
            "search": state.tavily.is_some(),
            "completion": state.chat.is_some(),
            "notifications": state.notifications.is_some(),
        },
        "model": state.chat.as_ref().map(|c| c.model()),
    }))
}

async fn search(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchRequest>,
) -> Json<SearchOutcome> {
    let query = payload.query.trim();
    if query.is_empty() || query.len() > MAX_QUERY_LEN {
        return Json(SearchOutcome::from_result(Err(anyhow::anyhow!(
            "Please enter a search query"
        ))));
    }
    let Some(tavily) = &state.tavily else {
        return Json(SearchOutcome::from_result(Err(anyhow::anyhow!(
            "TAVILY_API_KEY not set"
        ))));
    };

    let options = SearchOptions {
        depth: payload.search_depth,
        ..SearchOptions::default()
    };
    Json(SearchOutcome::from_result(tavily.search(query, &options).await))
}

async fn image_search(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ImageSearchRequest>,
) -> Response {
    let failed = || (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "images": [] }))).into_response();

    let Some(tavily) = &state.tavily else {
        error!("Tavily API error: TAVILY_API_KEY not set");
        return failed();
    };
    let options = SearchOptions {
        depth: SearchDepth::Basic,
        include_images: true,
        max_results: Some(4),
    };
    match tavily.search(&payload.query, &options).await {
        Ok(resp) => Json(json!({ "images": resp.images() })).into_response(),
        Err(e) => {
            error!("Tavily API error: {:#}", e);
            failed()
        }
    }
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let prompt = payload.prompt.trim().to_string();
    if prompt.is_empty() || prompt.len() > MAX_QUERY_LEN {
        return sse_error("invalid_prompt");
    }
    let Some(chat) = state.chat.clone() else {
        return sse_error("completion_unavailable");
    };
    let tavily = state.tavily.clone();

    let stream = async_stream::stream! {
        let context = match &tavily {
            Some(tavily) => match tavily.search_context(&prompt).await {
                Ok(context) => context,
                Err(e) => {
                    yield sse_json(&json!({"type":"error","message": format!("Search failed: {}", e)}));
                    return;
                }
            },
            None => String::new(),
        };

        yield sse_json(&json!({ "type": "start", "model": chat.model() }));

        match chat.stream_chat(build_chat_prompt(&prompt, &context)).await {
            Ok(mut stream) => {
                while let Some(chunk_res) = stream.next().await {
                    match chunk_res {
                        Ok(ChatStreamChunk::Delta(delta)) => {
                            if !delta.is_empty() {
                                yield sse_json(&json!({ "type": "delta", "content": delta }));
                            }
                        }
                        Ok(ChatStreamChunk::Usage(usage)) => {
                            yield sse_json(&json!({ "type": "usage", "usage": usage }));
                        }
                        Err(e) => {
                            yield sse_json(&json!({"type":"error","message": format!("Stream error: {}", e)}));
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                yield sse_json(&json!({"type":"error","message": format!("Completion failed: {}", e)}));
                return;
            }
        }

        yield "data: {\"type\":\"done\"}\n\n".to_string();
    };

    sse_response(stream)
}

async fn completion(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CompletionRequest>,
) -> Response {
    let Some(last) = payload.messages.last() else {
        return json_msg(StatusCode::BAD_REQUEST, "messages must not be empty");
    };
    let Some(chat) = &state.chat else {
        return json_msg(StatusCode::SERVICE_UNAVAILABLE, "OPENAI_API_KEY not set");
    };

    let context = match &state.tavily {
        Some(tavily) => match tavily.search(&last.content, &SearchOptions::default()).await {
            Ok(resp) => format_context(&resp),
            Err(e) => {
                warn!("Search error: {:#}", e);
                String::new()
            }
        },
        None => String::new(),
    };

    let messages: Vec<ChatMessage> = build_completion_prompt(&payload.messages, &context);
    let stream = match chat.stream_chat(messages).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Completion failed: {:#}", e);
            return json_msg(StatusCode::BAD_GATEWAY, &format!("Error: {}", e));
        }
    };

    let body = stream.filter_map(|chunk| async move {
        match chunk {
            Ok(ChatStreamChunk::Delta(delta)) if !delta.is_empty() => Some(Ok(delta)),
            Ok(_) => None,
            Err(e) => {
                error!("Completion stream error: {:#}", e);
                Some(Err(std::io::Error::other(e.to_string())))
            }
        }
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn droplert_verify(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    let (Some(ws_url), Some(droplert_id)) = (
        state.settings.ws_server_url.as_deref(),
        state.settings.droplert_id.as_deref(),
    ) else {
        return json_msg(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server misconfiguration: notification server is not set",
        );
    };
    let api_key = state.settings.droplert_key.as_deref().unwrap_or_default();
    let website_url = website_url(&state, &headers);

    let response = state
        .http
        .post(format!("{}/set", http_base(ws_url)))
        .header("apiKey", api_key)
        .json(&VerifyForward {
            droplert_id,
            website_url: &website_url,
        })
        .send()
        .await;

    match response {
        Ok(resp) if resp.status() == StatusCode::OK => {
            info!(%website_url, "Website subscribed to notification server");
            json_msg(
                StatusCode::OK,
                "API Key validation successful, website subscribed to WebSocket server",
            )
        }
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(%status, %body, "WebSocket server failed to subscribe the website");
            json_msg(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to subscribe website to WebSocket server",
            )
        }
        Err(e) => {
            error!(error = %e, "Error during WebSocket verification request");
            json_msg(StatusCode::BAD_GATEWAY, "Failed to connect to WebSocket server")
        }
    }
}

async fn droplert_current(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let Some(handle) = &state.notifications else {
        return Json(json!({ "enabled": false, "notification": null }));
    };
    Json(json!({
        "enabled": true,
        "connection": handle.connection_state(),
        "notification": handle.current().map(NotificationView::from),
    }))
}

async fn droplert_stream(State(state): State<Arc<AppState>>) -> Response {
    let Some(handle) = state.notifications.clone() else {
        return sse_error("notifications_disabled");
    };
    let mut rx = handle.subscribe();

    let stream = async_stream::stream! {
        loop {
            let view = rx.borrow_and_update().clone().map(NotificationView::from);
            yield sse_json(&json!({ "type": "notification", "notification": view }));
            if rx.changed().await.is_err() {
                break;
            }
        }
    };
    sse_response(stream)
}

/// Clears the notification for every listening page, so it takes the same key as preview.
async fn droplert_dismiss(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match notifications(&state) {
        Ok(handle) => {
            handle.dismiss();
            json_msg(StatusCode::OK, "dismissed")
        }
        Err(resp) => resp,
    }
}

/// Shows a notification locally without involving the server.
async fn droplert_preview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(notification): Json<Notification>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match notifications(&state) {
        Ok(handle) => {
            handle.replace(notification.clone());
            Json(json!({ "notification": NotificationView::from(notification) })).into_response()
        }
        Err(resp) => resp,
    }
}

// --- Helpers ----------------------------------------------------------------

fn notifications(state: &AppState) -> Result<&NotificationHandle, Response> {
    state
        .notifications
        .as_ref()
        .ok_or_else(|| json_msg(StatusCode::NOT_FOUND, "Notifications are not configured"))
}

/// Checks `Authorization: Bearer <DROPLERT_KEY>`.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(json_msg(StatusCode::UNAUTHORIZED, "Missing Authorization header"));
    };
    let api_key = value
        .to_str()
        .ok()
        .and_then(|v| v.split_once("Bearer ").map(|(_, key)| key))
        .filter(|key| !key.is_empty());
    let Some(api_key) = api_key else {
        return Err(json_msg(
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format",
        ));
    };
    let Some(stored) = state.settings.droplert_key.as_deref() else {
        return Err(json_msg(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server misconfiguration: API key is missing",
        ));
    };
    if !constant_time_eq(api_key.as_bytes(), stored.as_bytes()) {
        return Err(json_msg(StatusCode::FORBIDDEN, "Invalid API key"));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn website_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.settings.site_url {
        return url.clone();
    }
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_else(|| state.settings.site_url_or_default().to_string())
}

/// The notification server takes plain HTTP on the same host as its socket.
fn http_base(ws_url: &str) -> String {
    let base = if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        ws_url.to_string()
    };
    base.trim_end_matches('/').to_string()
}

fn json_msg(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "msg": msg }))).into_response()
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = String> + Send + 'static,
{
    let body_stream = stream.map(Ok::<_, std::io::Error>);
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body_stream),
    )
        .into_response()
}

fn sse_error(msg: &str) -> Response {
    sse_response(futures::stream::once(futures::future::ready(sse_json(
        &json!({ "type": "error", "message": msg }),
    ))))
}

fn sse_json(v: &serde_json::Value) -> String {
    format!("data: {}\n\n", v)
}
