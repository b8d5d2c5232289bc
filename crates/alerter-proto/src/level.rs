//! Alert severity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// The severity of an alert.
///
/// Drives the color of the attachment in the webhook payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Everything is fine again.
    Ok,
    /// Something needs attention soon.
    Warn,
    /// Something is broken.
    Error,
    /// Severity not given or not recognized.
    #[default]
    Unknown,
}

impl Level {
    /// All levels, in ascending severity with `Unknown` last.
    pub const ALL: [Self; 4] = [Self::Ok, Self::Warn, Self::Error, Self::Unknown];

    /// Returns the wire name of the level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns the attachment color for this level.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Ok => "#44bb77",
            Self::Warn => "#ffaa44",
            Self::Error => "#ff5566",
            Self::Unknown => "#aa44ff",
        }
    }

    /// Parses a level strictly.
    ///
    /// Matching ignores case and surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::InvalidValue` if the input names no level.
    pub fn parse(input: &str) -> Result<Self, ProtoError> {
        let trimmed = input.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ProtoError::InvalidValue {
                field: "level",
                value: input.to_string(),
            })
    }

    /// Resolves a level received from a producer.
    ///
    /// Absent or unrecognized values become [`Level::Unknown`].
    #[must_use]
    pub fn from_wire(input: Option<&str>) -> Self {
        input
            .and_then(|value| Self::parse(value).ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
