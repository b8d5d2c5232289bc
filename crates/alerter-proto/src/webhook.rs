//! Slack-compatible webhook payloads.
//!
//! [`render`] is the only way the daemon turns a [`Message`] into something
//! it sends. It performs no I/O.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// The body posted to the chat webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Channel override. Omitted to use the webhook's default channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Name the message is posted under: the sending host.
    pub username: String,
    /// Exactly one attachment per alert.
    pub attachments: Vec<Attachment>,
}

/// A colored attachment carrying the alert itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Alert body.
    pub text: String,
    /// Headline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Link attached to the headline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_link: Option<String>,
    /// Hex color derived from the level.
    pub color: String,
    /// Receive time in unix seconds.
    pub ts: i64,
    /// Version marker.
    pub footer: String,
    /// Extra key/value pairs, sorted by key.
    pub fields: Vec<Field>,
}

/// One key/value pair inside an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// The key.
    pub title: String,
    /// The value, verbatim.
    pub value: String,
    /// Lets the chat client lay fields out side by side.
    #[serde(default = "short_default")]
    pub short: bool,
}

const fn short_default() -> bool {
    true
}

impl WebhookPayload {
    /// Serializes the payload to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Renders a message into the webhook payload posted by `username`.
#[must_use]
pub fn render(message: &Message, username: &str) -> WebhookPayload {
    let fields = message
        .fields()
        .iter()
        .map(|(key, value)| Field {
            title: key.clone(),
            value: value.clone(),
            short: true,
        })
        .collect();

    let attachment = Attachment {
        text: message.text().to_string(),
        title: message.title().map(str::to_string),
        title_link: message.link().map(str::to_string),
        color: message.level().color().to_string(),
        ts: message.received_at().timestamp(),
        footer: format!("alert v{}", message.daemon_version()),
        fields,
    };

    WebhookPayload {
        channel: message.channel().map(str::to_string),
        username: username.to_string(),
        attachments: vec![attachment],
    }
}
