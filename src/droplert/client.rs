//! Connection manager for the Droplert notification server.
//!
//! One [`NotificationClient`] owns at most one socket and at most one pending
//! reconnect timer, both living inside a single spawned task. The latest
//! notification is published on a watch channel; a newer one replaces it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::protocol::{Notification, ServerMessage, SubscribeMessage};
use super::transport::{Connection, Transport};

/// Delay before every reconnection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound for [`ReconnectPolicy::Backoff`].
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay after every close, retried forever.
    Fixed(Duration),
    /// Doubles from `initial` after each failed attempt, capped at `max`.
    /// Resets once a connection succeeds.
    Backoff { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn backoff() -> Self {
        ReconnectPolicy::Backoff {
            initial: RECONNECT_DELAY,
            max: MAX_BACKOFF_DELAY,
        }
    }

    /// Delay before reconnect number `attempt` (0-based, counted since the last
    /// successful connection).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Backoff { initial, max } => {
                let factor = 1u32 << attempt.min(16);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Cheap, cloneable view of a client's displayed notification.
#[derive(Clone)]
pub struct NotificationHandle {
    current: Arc<watch::Sender<Option<Notification>>>,
    state: watch::Receiver<ConnectionState>,
}

impl NotificationHandle {
    pub fn current(&self) -> Option<Notification> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Notification>> {
        self.current.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Displays `notification` locally, replacing whatever was shown.
    pub fn replace(&self, notification: Notification) {
        self.current.send_replace(Some(notification));
    }

    /// Clears the displayed notification. The server is not told and the
    /// connection is left alone.
    pub fn dismiss(&self) {
        self.current.send_if_modified(|current| current.take().is_some());
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct NotificationClient {
    transport: Arc<dyn Transport>,
    droplert_id: Option<String>,
    website_url: String,
    policy: ReconnectPolicy,
    current: Arc<watch::Sender<Option<Notification>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    running: Option<Running>,
}

impl NotificationClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        droplert_id: Option<String>,
        website_url: impl Into<String>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            droplert_id,
            website_url: website_url.into(),
            policy: ReconnectPolicy::default(),
            current: Arc::new(current),
            state: Arc::new(state),
            running: None,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn handle(&self) -> NotificationHandle {
        NotificationHandle {
            current: Arc::clone(&self.current),
            state: self.state.subscribe(),
        }
    }

    /// Spawns the connection task. Returns `false` without connecting when the
    /// subscriber id is missing. A second call while running does nothing.
    pub fn start(&mut self) -> bool {
        if self.running.is_some() {
            return true;
        }
        let Some(droplert_id) = self.droplert_id.as_deref().filter(|id| !id.is_empty()) else {
            error!("Missing Droplert ID, notifications disabled");
            return false;
        };

        let subscribe = match serde_json::to_string(&SubscribeMessage::new(
            droplert_id,
            self.website_url.as_str(),
        )) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode subscribe message");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            Arc::clone(&self.transport),
            subscribe,
            self.policy,
            Arc::clone(&self.current),
            Arc::clone(&self.state),
            cancel.clone(),
        ));
        self.running = Some(Running { cancel, task });
        true
    }

    /// Closes the socket and cancels any pending reconnect.
    pub async fn stop(&mut self) {
        let Some(Running { cancel, task }) = self.running.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "Notification task ended abnormally");
        }
        info!("Notification client stopped");
    }
}

impl Drop for NotificationClient {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

enum SessionEnd {
    Closed,
    Cancelled,
}

async fn run(
    transport: Arc<dyn Transport>,
    subscribe: String,
    policy: ReconnectPolicy,
    current: Arc<watch::Sender<Option<Notification>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;
    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            res = transport.connect() => res,
        };

        match connected {
            Ok(mut conn) => {
                info!("Connected to notification server");
                attempt = 0;
                state.send_replace(ConnectionState::Connected);
                let end = session(conn.as_mut(), &subscribe, &current, &cancel).await;
                state.send_replace(ConnectionState::Disconnected);
                if let SessionEnd::Cancelled = end {
                    conn.close().await;
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Socket error"),
        }

        let delay = policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        warn!("Disconnected. Reconnecting in {:?}...", delay);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn session(
    conn: &mut dyn Connection,
    subscribe: &str,
    current: &watch::Sender<Option<Notification>>,
    cancel: &CancellationToken,
) -> SessionEnd {
    if let Err(e) = conn.send_text(subscribe.to_string()).await {
        warn!(error = %e, "Subscribe failed");
        return SessionEnd::Closed;
    }

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            frame = conn.recv_text() => frame,
        };
        match frame {
            Some(Ok(text)) => handle_message(&text, current),
            Some(Err(e)) => {
                error!(error = %e, "Socket error");
                return SessionEnd::Closed;
            }
            None => return SessionEnd::Closed,
        }
    }
}

fn handle_message(text: &str, current: &watch::Sender<Option<Notification>>) {
    match ServerMessage::parse(text) {
        Ok(ServerMessage::Notification { data }) => {
            debug!(title = %data.title, kind = ?data.kind, "Received notification");
            current.send_replace(Some(data));
        }
        Ok(ServerMessage::Other) => debug!("Ignoring non-notification message"),
        Err(e) => error!(error = %e, "Parse error"),
    }
}
