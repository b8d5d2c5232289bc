//! Producer messages and their canonical, validated form.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtoError;
use crate::level::Level;

/// A message as written by a producer to the daemon's socket.
///
/// This is the inbound wire schema. Only `text` is required; unknown keys
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRequest {
    /// Body of the alert.
    pub text: String,
    /// Optional headline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Chat channel override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Link to further information, rendered as the title link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Severity name. Kept as free text so a bad value never rejects the alert.
    #[serde(
        default,
        deserialize_with = "lenient_level",
        skip_serializing_if = "Option::is_none"
    )]
    pub level: Option<String>,
    /// Additional key/value pairs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl AlertRequest {
    /// Creates a request carrying only a text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

// Non-string levels are treated like unrecognized ones.
fn lenient_level<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

/// The canonical form of one alert.
///
/// Built only through [`Message::from_request`] (or [`decode`]) and never
/// mutated afterwards. Serializable so the daemon can persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    text: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    level: Level,
    #[serde(default)]
    fields: BTreeMap<String, String>,
    received_at: DateTime<Utc>,
    daemon_version: String,
}

impl Message {
    /// Validates a request and stamps it with its receive time and the
    /// daemon version.
    ///
    /// Empty optional strings are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Malformed` if `text` is empty.
    pub fn from_request(
        request: AlertRequest,
        received_at: DateTime<Utc>,
        daemon_version: impl Into<String>,
    ) -> Result<Self, ProtoError> {
        if request.text.trim().is_empty() {
            return Err(ProtoError::malformed("text must not be empty"));
        }

        Ok(Self {
            level: Level::from_wire(request.level.as_deref()),
            text: request.text,
            title: non_empty(request.title),
            channel: non_empty(request.channel),
            link: non_empty(request.link),
            fields: request.fields,
            received_at,
            daemon_version: daemon_version.into(),
        })
    }

    /// Returns the alert body.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the headline, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Returns the channel override, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Returns the link, if any.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    /// Returns the resolved severity.
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Returns the extra fields in key order.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Returns when the daemon received the message.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Returns the version of the daemon that received the message.
    #[must_use]
    pub fn daemon_version(&self) -> &str {
        &self.daemon_version
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Decodes a raw socket payload into a [`Message`].
///
/// # Errors
///
/// Returns `ProtoError::Malformed` if the payload is not UTF-8, not a JSON
/// object of the expected shape, lacks `text`, or carries an empty `text`.
pub fn decode(
    bytes: &[u8],
    received_at: DateTime<Utc>,
    daemon_version: &str,
) -> Result<Message, ProtoError> {
    let raw = std::str::from_utf8(bytes)
        .map_err(|e| ProtoError::malformed(format!("payload is not UTF-8: {e}")))?;
    let request: AlertRequest = serde_json::from_str(raw)?;
    Message::from_request(request, received_at, daemon_version)
}
