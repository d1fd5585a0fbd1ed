//! Conversions API client
//!
//! Sends one canonical event per request to `<base>/<version>/<pixel>/events`
//! and applies the single sandbox fallback:
//!
//! ```text
//! Built -> Sent -> Acked
//!               -> Rejected (production)              terminal
//!               -> Rejected (sandbox) -> Sent (production) -> Acked | Rejected
//! ```
//!
//! Timeouts and transport failures never trigger the fallback: the first
//! attempt may have been recorded upstream.

pub mod error;

use error::{redact, ForwardError};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::Metrics;
use crate::models::{CanonicalOutboundEvent, UpstreamAck, UpstreamEnvelope};

pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v19.0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Dataset identity and access credential.
#[derive(Clone)]
pub struct Credentials {
    pub pixel_id: String,
    pub access_token: String,
    /// Present when events should land in the Test Events tool.
    pub test_event_code: Option<String>,
}

impl Credentials {
    pub fn mode(&self) -> DeliveryMode<'_> {
        match self.test_event_code.as_deref() {
            Some(code) => DeliveryMode::Sandbox {
                test_event_code: code,
            },
            None => DeliveryMode::Production,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("pixel_id", &self.pixel_id)
            .field("access_token", &"[REDACTED]")
            .field("test_event_code", &self.test_event_code)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode<'a> {
    Sandbox { test_event_code: &'a str },
    Production,
}

impl<'a> DeliveryMode<'a> {
    /// The mode to retry in after a rejection. Production is terminal.
    pub fn fallback(self) -> Option<DeliveryMode<'a>> {
        match self {
            DeliveryMode::Sandbox { .. } => Some(DeliveryMode::Production),
            DeliveryMode::Production => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeliveryMode::Sandbox { .. } => "sandbox",
            DeliveryMode::Production => "production",
        }
    }

    fn test_event_code(self) -> Option<&'a str> {
        match self {
            DeliveryMode::Sandbox { test_event_code } => Some(test_event_code),
            DeliveryMode::Production => None,
        }
    }
}

/// Upstream API client
#[derive(Clone)]
pub struct UpstreamClient {
    base_path: Arc<str>,
    api_version: Arc<str>,
    timeout: Duration,
    http_client: Client,
    metrics: Option<Metrics>,
}

impl UpstreamClient {
    pub fn new(base_path: &str, api_version: &str, timeout: Duration) -> Result<Self, ForwardError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::ConfigError(e.to_string()))?;

        Ok(UpstreamClient {
            base_path: Arc::from(base_path.trim_end_matches('/')),
            api_version: Arc::from(api_version.trim_matches('/')),
            timeout,
            http_client,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn events_url(&self, pixel_id: &str) -> String {
        format!("{}/{}/{}/events", self.base_path, self.api_version, pixel_id)
    }

    /// Send an event, falling back from sandbox to production at most once.
    pub async fn forward(
        &self,
        event: &CanonicalOutboundEvent,
        credentials: &Credentials,
    ) -> Result<UpstreamAck, ForwardError> {
        let mode = credentials.mode();

        let err = match self.send(event, credentials, mode).await {
            Ok(ack) => return Ok(ack),
            Err(err) => err,
        };

        let next = match mode.fallback() {
            Some(next) if err.is_rejection() => next,
            _ => return Err(err),
        };

        tracing::warn!(
            event_id = %event.event_id,
            event_name = %event.event_name,
            from = mode.label(),
            to = next.label(),
            error = %err,
            "Upstream rejected event, retrying once"
        );

        let mut ack = self.send(event, credentials, next).await?;
        ack.used_fallback = true;
        Ok(ack)
    }

    async fn send(
        &self,
        event: &CanonicalOutboundEvent,
        credentials: &Credentials,
        mode: DeliveryMode<'_>,
    ) -> Result<UpstreamAck, ForwardError> {
        let envelope = UpstreamEnvelope {
            data: [event],
            access_token: &credentials.access_token,
            test_event_code: mode.test_event_code(),
        };

        let started = Instant::now();
        let result = self
            .http_client
            .post(self.events_url(&credentials.pixel_id))
            .json(&envelope)
            .send()
            .await;

        let result = match result {
            Ok(response) => self.handle_response(response, &credentials.access_token).await,
            Err(e) if e.is_timeout() => Err(ForwardError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(e) => Err(ForwardError::Transport(
                e.without_url().to_string().replace(&credentials.access_token, "[REDACTED]"),
            )),
        };

        let outcome = match &result {
            Ok(_) => "acked",
            Err(e) => e.category(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_upstream(mode.label(), outcome, started.elapsed());
        }
        tracing::info!(
            event_id = %event.event_id,
            event_name = %event.event_name,
            mode = mode.label(),
            outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upstream attempt finished"
        );

        result
    }

    /// Interpret an upstream response. A 2xx body carrying an `error`
    /// object is a rejection, not an acknowledgement.
    async fn handle_response(
        &self,
        response: reqwest::Response,
        access_token: &str,
    ) -> Result<UpstreamAck, ForwardError> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                ForwardError::Transport(e.without_url().to_string())
            }
        })?;
        let parsed = serde_json::from_str::<Value>(&text).ok();

        if !status.is_success() {
            let body = parsed.unwrap_or(Value::String(text));
            return Err(ForwardError::HttpRejected {
                status_code: status.as_u16(),
                body: redact(body, access_token),
            });
        }

        let Some(body) = parsed else {
            return Err(ForwardError::BusinessRejected {
                status_code: status.as_u16(),
                error: serde_json::json!({
                    "message": "upstream returned a non-JSON body",
                    "body": redact(Value::String(text), access_token),
                }),
            });
        };

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(ForwardError::BusinessRejected {
                status_code: status.as_u16(),
                error: redact(error.clone(), access_token),
            });
        }

        Ok(UpstreamAck {
            events_received: body.get("events_received").and_then(Value::as_u64).unwrap_or(0),
            fbtrace_id: body
                .get("fbtrace_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            messages: body
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            used_fallback: false,
            body,
        })
    }
}
