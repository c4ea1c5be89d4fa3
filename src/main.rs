mod config;
mod droplert;
mod handlers;
mod llm;
mod prompts;
mod search;
mod types;

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{init_clients, init_tracing, Settings};
use crate::droplert::{run_display, NotificationClient, TracingPresenter, WsTransport};
use crate::handlers::{build_app, serve};
use crate::types::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let settings = Settings::from_env();
    settings.log_key_check();
    let clients = init_clients(&settings)?;

    let display_cancel = CancellationToken::new();
    let mut notifier = start_notifications(&settings);
    if let Some(client) = &notifier {
        tokio::spawn(run_display(
            client.handle(),
            TracingPresenter,
            display_cancel.clone(),
        ));
    }

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    let state = Arc::new(AppState {
        notifications: notifier.as_ref().map(|c| c.handle()),
        http: clients.http,
        tavily: clients.tavily,
        chat: clients.chat,
        settings,
        start_time: Instant::now(),
    });

    let result = serve(listener, build_app(state)).await;

    display_cancel.cancel();
    if let Some(client) = notifier.as_mut() {
        client.stop().await;
    }
    result
}

fn start_notifications(settings: &Settings) -> Option<NotificationClient> {
    let Some(ws_url) = settings.ws_server_url.as_deref() else {
        info!("WS_SERVER_URL not set, notifications disabled");
        return None;
    };

    let mut client = NotificationClient::new(
        Arc::new(WsTransport::new(ws_url)),
        settings.droplert_id.clone(),
        settings.site_url_or_default(),
    )
    .with_policy(settings.reconnect);

    client.start().then_some(client)
}
