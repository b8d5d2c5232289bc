//! Daemon configuration.
//!
//! Configuration is a JSON file loaded once at startup and passed by value
//! to each component:
//! - Socket, webhook and queue locations
//! - Per-message retry budget
//! - Backoff for requeued messages
//! - Listener limits and shutdown grace period

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

/// Retry budget for one delivery sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total POST attempts before a message is handed back for requeueing.
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
    /// Timeout for a single HTTP request in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
            request_timeout_secs: 10,
        }
    }
}

impl RetryConfig {
    /// Delay between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Timeout for a single request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Backoff applied to messages whose retry budget ran out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequeueConfig {
    /// Delay before the first requeue round in seconds.
    pub initial_delay_secs: u64,
    /// Upper bound for the requeue delay in seconds.
    pub max_delay_secs: u64,
    /// Growth factor applied after each failed round.
    pub backoff_multiplier: f64,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1,
            max_delay_secs: 300,
            backoff_multiplier: 2.0,
        }
    }
}

/// Local socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Largest accepted payload in bytes.
    pub max_message_bytes: usize,
    /// Time a producer gets to send its payload and close, in seconds.
    pub read_timeout_secs: u64,
    /// Permission bits applied to the socket file.
    pub socket_mode: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 64 * 1024,
            read_timeout_secs: 10,
            socket_mode: 0o777,
        }
    }
}

impl ListenerConfig {
    /// Read timeout as a duration.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Path of the Unix socket producers write to.
    pub socket_path: PathBuf,
    /// Chat webhook URL.
    pub webhook_url: String,
    /// Path of the durable queue file.
    pub queue_path: PathBuf,
    /// Name posted as the message author. Defaults to the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Retry budget per delivery.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Backoff for exhausted deliveries.
    #[serde(default)]
    pub requeue: RequeueConfig,
    /// Listener limits.
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Seconds in-flight deliveries get to finish on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

const fn default_shutdown_grace_secs() -> u64 {
    5
}

impl DaemonConfig {
    /// Creates a configuration with default tuning.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        webhook_url: impl Into<String>,
        queue_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            webhook_url: webhook_url.into(),
            queue_path: queue_path.into(),
            username: None,
            retry: RetryConfig::default(),
            requeue: RequeueConfig::default(),
            listener: ListenerConfig::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DaemonError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, DaemonError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| DaemonError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DaemonError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(DaemonError::Config(
                "socket_path cannot be empty".to_string(),
            ));
        }

        if self.queue_path.as_os_str().is_empty() {
            return Err(DaemonError::Config("queue_path cannot be empty".to_string()));
        }

        if self.webhook_url.is_empty() {
            return Err(DaemonError::Config(
                "webhook_url cannot be empty".to_string(),
            ));
        }

        if !self.webhook_url.starts_with("http://") && !self.webhook_url.starts_with("https://") {
            return Err(DaemonError::Config(
                "webhook_url must start with http:// or https://".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(DaemonError::Config(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.retry.request_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "retry.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.requeue.backoff_multiplier < 1.0 {
            return Err(DaemonError::Config(
                "requeue.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.requeue.max_delay_secs < self.requeue.initial_delay_secs {
            return Err(DaemonError::Config(
                "requeue.max_delay_secs must not be below requeue.initial_delay_secs".to_string(),
            ));
        }

        if self.listener.max_message_bytes == 0 {
            return Err(DaemonError::Config(
                "listener.max_message_bytes must be greater than 0".to_string(),
            ));
        }

        if self.listener.socket_mode > 0o777 {
            return Err(DaemonError::Config(
                "listener.socket_mode must be a permission mode (at most 0o777)".to_string(),
            ));
        }

        if self.username.as_deref().is_some_and(str::is_empty) {
            return Err(DaemonError::Config("username cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Grace period for in-flight deliveries on shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    fn valid() -> DaemonConfig {
        DaemonConfig::new(
            "/run/alerter/alerter.sock",
            "https://hooks.example.com/services/T0/B0/x",
            "/var/lib/alerter/queue",
        )
    }

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{
            "socket_path": "/tmp/alerter.sock",
            "webhook_url": "http://127.0.0.1:17553/slack",
            "queue_path": "/tmp/queue"
        }"#;

        let config = DaemonConfig::from_json(json).expect("should parse minimal config");

        assert_eq!(config.socket_path, PathBuf::from("/tmp/alerter.sock"));
        assert_eq!(config.webhook_url, "http://127.0.0.1:17553/slack");
        assert_eq!(config.queue_path, PathBuf::from("/tmp/queue"));
        assert_eq!(config.username, None);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.listener.max_message_bytes, 64 * 1024);
        assert_eq!(config.shutdown_grace_secs, 5);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "socket_path": "/tmp/alerter.sock",
            "webhook_url": "https://hooks.example.com/x",
            "queue_path": "/tmp/queue",
            "username": "backup-host",
            "retry": { "max_attempts": 5, "delay_ms": 250, "request_timeout_secs": 3 },
            "requeue": { "initial_delay_secs": 2, "max_delay_secs": 60, "backoff_multiplier": 1.5 },
            "listener": { "max_message_bytes": 1024, "read_timeout_secs": 2, "socket_mode": 432 },
            "shutdown_grace_secs": 1
        }"#;

        let config = DaemonConfig::from_json(json).expect("should parse full config");

        assert_eq!(config.username.as_deref(), Some("backup-host"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay(), Duration::from_millis(250));
        assert_eq!(config.retry.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.requeue.initial_delay_secs, 2);
        assert_eq!(config.requeue.backoff_multiplier, 1.5);
        assert_eq!(config.listener.socket_mode, 0o660);
        assert_eq!(config.listener.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let json = r#"{
            "socket_path": "/tmp/s",
            "webhook_url": "http://localhost/hook",
            "queue_path": "/tmp/q",
            "retry": { "max_attempts": 7 }
        }"#;

        let config = DaemonConfig::from_json(json).expect("should parse");
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.delay_ms, 1_000);
    }

    #[test]
    fn test_missing_webhook_rejected() {
        let json = r#"{ "socket_path": "/tmp/s", "queue_path": "/tmp/q" }"#;
        let result = DaemonConfig::from_json(json);
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let json = r#"{
            "socket_path": "/tmp/file.sock",
            "webhook_url": "http://localhost:9000/hook",
            "queue_path": "/tmp/file-queue"
        }"#;

        let temp_file = create_temp_config(json);
        let config = DaemonConfig::load(temp_file.path()).expect("should load from file");

        assert_eq!(config.socket_path, PathBuf::from("/tmp/file.sock"));
    }

    #[test]
    fn test_file_not_found() {
        let result = DaemonConfig::load("/nonexistent/path/alerter.json");
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("alerter.json");

        let config = valid();
        config.save(&path).expect("should save");
        let loaded = DaemonConfig::load(&path).expect("should load");

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test_case(|c: &mut DaemonConfig| c.webhook_url = String::new() ; "empty webhook")]
    #[test_case(|c: &mut DaemonConfig| c.webhook_url = "ftp://x".to_string() ; "non http webhook")]
    #[test_case(|c: &mut DaemonConfig| c.socket_path = PathBuf::new() ; "empty socket path")]
    #[test_case(|c: &mut DaemonConfig| c.queue_path = PathBuf::new() ; "empty queue path")]
    #[test_case(|c: &mut DaemonConfig| c.retry.max_attempts = 0 ; "zero attempts")]
    #[test_case(|c: &mut DaemonConfig| c.retry.request_timeout_secs = 0 ; "zero timeout")]
    #[test_case(|c: &mut DaemonConfig| c.requeue.backoff_multiplier = 0.5 ; "shrinking backoff")]
    #[test_case(|c: &mut DaemonConfig| c.requeue.max_delay_secs = 0 ; "max below initial")]
    #[test_case(|c: &mut DaemonConfig| c.listener.max_message_bytes = 0 ; "zero payload limit")]
    #[test_case(|c: &mut DaemonConfig| c.listener.socket_mode = 0o4777 ; "setuid mode")]
    #[test_case(|c: &mut DaemonConfig| c.username = Some(String::new()) ; "empty username")]
    fn test_invalid_config_rejected(mutate: fn(&mut DaemonConfig)) {
        let mut config = valid();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));
    }
}
