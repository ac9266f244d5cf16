// Built-in delivery channels
//
// - LogChannel: writes the handoff to the log (development, demos)
// - WebhookChannel: POSTs the message as JSON to an external mailer/SMS gateway

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::retry::attempt_timeout;
use super::{CodeMessage, DeliveryChannel, DeliveryError};

/// Channel that only logs; never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, message: &CodeMessage, attempt: u32) -> Result<(), DeliveryError> {
        info!(
            recipient = %message.recipient,
            message_id = %message.id,
            code = %mask(&message.code),
            attempt,
            "Verification code handed to log channel"
        );
        Ok(())
    }
}

/// Show only the first two characters of a code
fn mask(code: &str) -> String {
    let visible: String = code.chars().take(2).collect();
    let hidden = code.chars().count().saturating_sub(2);
    format!("{}{}", visible, "*".repeat(hidden))
}

/// Channel that POSTs each message to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    headers: HashMap<String, String>,
    base_timeout_secs: u64,
}

impl WebhookChannel {
    /// Create a channel targeting `url`
    pub fn new(url: String, auth_token: Option<String>, base_timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            auth_token,
            headers: HashMap::new(),
            base_timeout_secs,
        }
    }

    /// Add a custom header sent with every request
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, message: &CodeMessage, attempt: u32) -> Result<(), DeliveryError> {
        let timeout = attempt_timeout(attempt, self.base_timeout_secs);
        let start = Instant::now();

        let mut request = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .header("Idempotency-Key", message.id.to_string())
            .json(message);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let elapsed = start.elapsed().as_millis() as u64;

                debug!(
                    "Webhook delivery {} attempt {} - status {}, time {} ms",
                    message.id, attempt, status, elapsed
                );

                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(DeliveryError::Rejected(status))
                }
            }
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                warn!(
                    "Webhook delivery {} attempt {} failed: {} (time {} ms)",
                    message.id, attempt, e, elapsed
                );
                Err(DeliveryError::Transport(e.to_string()))
            }
        }
    }
}
