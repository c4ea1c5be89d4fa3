//! Wire format spoken with the Droplert notification server.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Sent once per successful connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeMessage {
    pub action: &'static str,
    pub droplert_id: String,
    pub website_url: String,
}

impl SubscribeMessage {
    pub fn new(droplert_id: impl Into<String>, website_url: impl Into<String>) -> Self {
        Self {
            action: "subscribe",
            droplert_id: droplert_id.into(),
            website_url: website_url.into(),
        }
    }
}

/// Envelope pushed by the server. Only `notification` carries anything we act on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Notification { data: Notification },
    #[serde(other)]
    Other,
}

impl ServerMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// The `type` tag of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    AlertDialog,
    Toast,
    /// Any tag this client does not know how to present.
    #[default]
    #[serde(other)]
    Unsupported,
}

/// How a notification is put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    /// Top-of-page alert that dismisses itself.
    Banner,
    /// Modal dialog that waits for the user.
    Modal,
    /// Corner pop-up.
    Toast,
}

/// Fields the server sends with the wrong JSON type fall back to their
/// defaults, so a sloppy payload still replaces what is on screen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub message: String,
    #[serde(rename = "type", deserialize_with = "lenient_kind")]
    pub kind: NotificationKind,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_optional_string"
    )]
    pub style: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub background_color: String,
    #[serde(deserialize_with = "lenient_string")]
    pub text_color: String,
    #[serde(deserialize_with = "lenient_string")]
    pub border_color: String,
}

fn lenient_kind<'de, D: Deserializer<'de>>(d: D) -> Result<NotificationKind, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(NotificationKind::deserialize(value).unwrap_or_default())
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(lenient_optional_string(d)?.unwrap_or_default())
}

fn lenient_optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

impl Notification {
    pub fn presentation(&self) -> Option<Presentation> {
        match self.kind {
            NotificationKind::Alert => Some(Presentation::Banner),
            NotificationKind::AlertDialog => Some(Presentation::Modal),
            NotificationKind::Toast => Some(Presentation::Toast),
            NotificationKind::Unsupported => None,
        }
    }
}
