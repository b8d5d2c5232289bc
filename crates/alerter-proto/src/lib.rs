//! # alerter-proto
//!
//! Wire formats shared by the alerter daemon and its producer tool.
//!
//! - [`AlertRequest`] is what a producer writes to the local socket.
//! - [`Message`] is the validated, immutable form the daemon works with.
//! - [`WebhookPayload`] is the Slack-compatible body posted to the webhook.
//!
//! ```
//! use alerter_proto::{decode, render, Level};
//! use chrono::Utc;
//!
//! let raw = br#"{"text": "disk full", "level": "ERROR"}"#;
//! let message = decode(raw, Utc::now(), "1.0.0").unwrap();
//! assert_eq!(message.level(), Level::Error);
//!
//! let payload = render(&message, "web-01");
//! assert_eq!(payload.username, "web-01");
//! assert_eq!(payload.attachments[0].color, "#ff5566");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod level;
pub mod message;
pub mod webhook;

pub use error::ProtoError;
pub use level::Level;
pub use message::{decode, AlertRequest, Message};
pub use webhook::{render, Attachment, Field, WebhookPayload};
