//! Delivery gateways: the outbound SMS transport seam.
//!
//! A gateway never returns an error to the dispatcher; transport problems are
//! reported as an unsuccessful `SendOutcome` and recorded as `failed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn delivered(provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            provider_message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Provider name, for logs and error messages.
    fn name(&self) -> &str;

    /// Submit one message to `to` (canonical `+` form).
    async fn send(&self, to: &str, body: &str) -> SendOutcome;

    /// Like `send`, giving each provider attempt at most `timeout`.
    async fn send_with_timeout(&self, to: &str, body: &str, timeout: Duration) -> SendOutcome {
        match tokio::time::timeout(timeout, self.send(to, body)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::failed(
                GatewayError::Timeout {
                    provider: self.name().to_string(),
                    timeout,
                }
                .to_string(),
            ),
        }
    }
}

/// Settings for an HTTP/JSON SMS provider.
#[derive(Debug)]
pub struct HttpGatewayConfig {
    pub name: String,
    /// Endpoint receiving `{"to", "from", "body"}` as a JSON POST.
    pub url: String,
    pub token: SecretString,
    pub from: Option<String>,
}

/// Generic JSON-over-HTTP provider with bearer authentication.
pub struct HttpGateway {
    config: HttpGatewayConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    body: &'a str,
}

/// Providers disagree on the id field name.
#[derive(Deserialize, Default)]
struct SendResponse {
    id: Option<String>,
    message_id: Option<String>,
    sid: Option<String>,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self { config, client })
    }

    async fn post(&self, to: &str, body: &str) -> Result<Option<String>, GatewayError> {
        let request = SendRequest {
            to,
            from: self.config.from.as_deref(),
            body,
        };

        let resp = self
            .client
            .post(&self.config.url)
            .bearer_auth(self.config.token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                provider: self.config.name.clone(),
                reason: format!("{status}: {}", text.trim()),
            });
        }

        let parsed: SendResponse = resp.json().await.unwrap_or_default();
        Ok(parsed.id.or(parsed.message_id).or(parsed.sid))
    }
}

#[async_trait]
impl DeliveryGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, to: &str, body: &str) -> SendOutcome {
        match self.post(to, body).await {
            Ok(id) => {
                debug!(provider = %self.config.name, to, "Message accepted");
                SendOutcome::delivered(id)
            }
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}

/// Tries each provider in order until one accepts the message.
pub struct FallbackGateway {
    providers: Vec<Arc<dyn DeliveryGateway>>,
}

impl FallbackGateway {
    pub fn new(providers: Vec<Arc<dyn DeliveryGateway>>) -> Self {
        Self { providers }
    }

    /// A hung provider costs at most `timeout` before the next one is tried.
    async fn send_in_order(&self, to: &str, body: &str, timeout: Option<Duration>) -> SendOutcome {
        if self.providers.is_empty() {
            return SendOutcome::failed(GatewayError::NotConfigured.to_string());
        }

        let mut errors = Vec::new();
        for provider in &self.providers {
            let outcome = match timeout {
                Some(timeout) => provider.send_with_timeout(to, body, timeout).await,
                None => provider.send(to, body).await,
            };
            if outcome.success {
                return outcome;
            }
            let err = outcome.error.unwrap_or_else(|| "unknown error".into());
            warn!(provider = provider.name(), "Send failed, trying next provider: {err}");
            errors.push(format!("{}: {err}", provider.name()));
        }
        SendOutcome::failed(errors.join("; "))
    }
}

#[async_trait]
impl DeliveryGateway for FallbackGateway {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn send(&self, to: &str, body: &str) -> SendOutcome {
        self.send_in_order(to, body, None).await
    }

    async fn send_with_timeout(&self, to: &str, body: &str, timeout: Duration) -> SendOutcome {
        self.send_in_order(to, body, Some(timeout)).await
    }
}

/// Build the provider chain from `DRIP_GATEWAY_*` and `DRIP_FALLBACK_GATEWAY_*`.
pub fn gateway_from_env(timeout: Duration) -> Result<FallbackGateway, GatewayError> {
    let mut providers: Vec<Arc<dyn DeliveryGateway>> = Vec::new();

    for (prefix, name) in [("DRIP_GATEWAY", "primary"), ("DRIP_FALLBACK_GATEWAY", "secondary")] {
        let Ok(url) = std::env::var(format!("{prefix}_URL")) else {
            continue;
        };
        let token = std::env::var(format!("{prefix}_TOKEN")).unwrap_or_default();
        let from = std::env::var(format!("{prefix}_FROM")).ok();
        providers.push(Arc::new(HttpGateway::new(
            HttpGatewayConfig {
                name: name.to_string(),
                url,
                token: SecretString::from(token),
                from,
            },
            timeout,
        )?));
    }

    if providers.is_empty() {
        return Err(GatewayError::NotConfigured);
    }
    Ok(FallbackGateway::new(providers))
}
