//! Webhook delivery.
//!
//! [`DeliveryEngine`] posts rendered payloads to the configured webhook and
//! retries per the configured [`RetryPolicy`]. It never touches the queue:
//! the caller learns about failures through a callback and decides what to
//! persist.

use alerter_proto::WebhookPayload;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{DaemonError, Result};
use crate::retry::{retry_with_policy, RetryPolicy};

/// Posts webhook payloads with bounded retries.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    client: reqwest::Client,
    webhook_url: String,
    policy: RetryPolicy,
}

impl DeliveryEngine {
    /// Creates an engine for the given webhook.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Config` if the HTTP client cannot be built.
    pub fn new(webhook_url: impl Into<String>, retry: &RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(retry.request_timeout())
            .build()
            .map_err(|e| DaemonError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            policy: RetryPolicy::from(retry),
        })
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Performs a single POST.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::DeliveryTransport` if the webhook cannot be
    /// reached and `DaemonError::DeliveryStatus` for any non-2xx answer.
    pub async fn post_once(&self, payload: &WebhookPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DaemonError::DeliveryTransport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "webhook accepted payload");
            Ok(())
        } else {
            Err(DaemonError::DeliveryStatus {
                status: status.as_u16(),
            })
        }
    }

    /// Posts the payload until it is accepted or the retry budget is spent.
    ///
    /// `on_failure` runs after every failed attempt, before the retry delay.
    /// Returns the number of attempts made and the final outcome.
    pub async fn deliver<H>(&self, payload: &WebhookPayload, mut on_failure: H) -> (u32, Result<()>)
    where
        H: FnMut(u32, &DaemonError),
    {
        retry_with_policy(
            &self.policy,
            || self.post_once(payload),
            |attempt, err| {
                warn!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    retryable = err.is_retryable(),
                    error = %err,
                    "webhook delivery attempt failed"
                );
                on_failure(attempt, err);
            },
        )
        .await
    }
}
