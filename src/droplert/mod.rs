//! Droplert push notifications.
//!
//! A [`NotificationClient`] keeps a WebSocket subscription to the external
//! notification server and publishes the latest notification; [`run_display`]
//! turns that into show/clear calls on a presenter.

mod client;
mod display;
mod protocol;
mod transport;

pub use client::{NotificationClient, NotificationHandle, ReconnectPolicy};
pub use display::{run_display, TracingPresenter};
pub use protocol::{Notification, Presentation};
pub use transport::WsTransport;

#[cfg(test)]
pub use protocol::NotificationKind;
