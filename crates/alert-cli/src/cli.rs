//! Command-line argument parsing with clap.

use std::collections::BTreeMap;
use std::path::PathBuf;

use alerter_proto::{AlertRequest, Level};
use clap::{ArgAction, Parser};
use tracing::warn;

use crate::error::CliError;

/// Socket used when neither `--socket` nor `ALERTER_SOCKET` is given.
pub const DEFAULT_SOCKET: &str = "/run/alerter/alerter.sock";

/// Send an alert to the local alerter daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "alert")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Alert title.
    pub title: String,

    /// Alert text.
    pub text: String,

    /// Chat channel to post to instead of the webhook default.
    #[arg(short, long)]
    pub channel: Option<String>,

    /// Severity: OK, WARN, ERROR or UNKNOWN.
    #[arg(short, long, default_value = "UNKNOWN", value_parser = parse_level)]
    pub level: Level,

    /// Link attached to the title.
    #[arg(short = 't', long = "title-link")]
    pub title_link: Option<String>,

    /// Extra field as key:value. May be repeated.
    #[arg(short = 'f', long = "field")]
    pub fields: Vec<String>,

    /// Daemon socket path.
    #[arg(long, env = "ALERTER_SOCKET", default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// Increase log verbosity.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Builds the message to send.
    ///
    /// # Errors
    ///
    /// Returns `CliError::InvalidArgument` if the text is blank.
    pub fn to_request(&self) -> Result<AlertRequest, CliError> {
        if self.text.trim().is_empty() {
            return Err(CliError::InvalidArgument("text must not be empty".into()));
        }

        Ok(AlertRequest {
            text: self.text.clone(),
            title: Some(self.title.clone()),
            channel: self.channel.clone(),
            link: self.title_link.clone(),
            level: Some(self.level.as_str().to_string()),
            fields: parse_fields(&self.fields),
        })
    }
}

fn parse_level(input: &str) -> Result<Level, String> {
    Level::parse(input).map_err(|e| e.to_string())
}

/// Splits `key:value` entries on the first colon.
///
/// Entries without a colon are skipped with a warning. A repeated key keeps
/// its last value.
#[must_use]
pub fn parse_fields(entries: &[String]) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for entry in entries {
        match entry.split_once(':') {
            Some((key, value)) => {
                fields.insert(key.to_string(), value.to_string());
            }
            None => warn!(field = %entry, "ignoring field without ':' separator"),
        }
    }
    fields
}
