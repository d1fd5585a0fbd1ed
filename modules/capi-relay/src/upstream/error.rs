use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Upstream request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream rejected the request (status {status_code})")]
    HttpRejected { status_code: u16, body: Value },

    #[error("Upstream reported an error (status {status_code})")]
    BusinessRejected { status_code: u16, error: Value },
}

impl ForwardError {
    /// Rejections are the only failures eligible for the sandbox fallback.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ForwardError::HttpRejected { .. } | ForwardError::BusinessRejected { .. }
        )
    }

    /// Check if the upstream refused the event itself (4xx or business error)
    pub fn is_client_error(&self) -> bool {
        match self {
            ForwardError::HttpRejected { status_code, .. } => (400..500).contains(status_code),
            ForwardError::BusinessRejected { .. } => true,
            _ => false,
        }
    }

    /// Upstream detail for the caller, if there is any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            ForwardError::HttpRejected { body, .. } => Some(body),
            ForwardError::BusinessRejected { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ForwardError::ConfigError(_) => "upstream_misconfigured",
            ForwardError::Timeout { .. } => "upstream_timeout",
            ForwardError::Transport(_) => "upstream_unreachable",
            ForwardError::HttpRejected { .. } => "upstream_rejected",
            ForwardError::BusinessRejected { .. } => "upstream_business_error",
        }
    }
}

/// Replace every occurrence of `secret` inside `value`'s strings.
pub fn redact(value: Value, secret: &str) -> Value {
    if secret.is_empty() {
        return value;
    }
    match value {
        Value::String(s) => Value::String(s.replace(secret, "[REDACTED]")),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| redact(v, secret)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, redact(v, secret)))
                .collect(),
        ),
        other => other,
    }
}
