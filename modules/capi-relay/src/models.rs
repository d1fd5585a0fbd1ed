use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event payload posted by the browser script.
///
/// Everything here is caller-supplied and untrusted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEventRequest {
    pub event_name: Option<String>,
    pub event_time: Option<i64>,
    pub event_source_url: Option<String>,
    pub event_id: Option<String>,
    pub user_agent: Option<String>,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub custom_data: Option<Value>,
}

/// Event in the upstream's server event schema, ready to send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalOutboundEvent {
    pub event_name: String,
    pub event_time: i64,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source_url: Option<String>,
    pub action_source: &'static str,
    pub user_data: UserData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,
}

pub const ACTION_SOURCE_WEBSITE: &str = "website";

/// Customer information parameters.
///
/// Hashed identifiers use the upstream's abbreviated keys and are sent as
/// arrays of lowercase SHA-256 hex digests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserData {
    pub client_ip_address: String,
    pub client_user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbc: Option<String>,
    #[serde(rename = "em", skip_serializing_if = "Option::is_none", serialize_with = "as_digest_list")]
    pub hashed_email: Option<String>,
    #[serde(rename = "ph", skip_serializing_if = "Option::is_none", serialize_with = "as_digest_list")]
    pub hashed_phone: Option<String>,
}

fn as_digest_list<S>(digest: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match digest {
        Some(d) => [d].serialize(serializer),
        None => serializer.serialize_none(),
    }
}

/// Request payload for the upstream events endpoint.
///
/// Holds the access token; never `Debug`-printed.
#[derive(Serialize)]
pub struct UpstreamEnvelope<'a> {
    pub data: [&'a CanonicalOutboundEvent; 1],
    pub access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_event_code: Option<&'a str>,
}

/// Successful upstream response.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamAck {
    pub events_received: u64,
    pub fbtrace_id: Option<String>,
    pub messages: Vec<Value>,
    pub used_fallback: bool,
    pub body: Value,
}

#[derive(Debug, Serialize)]
pub struct EventAcceptedResponse {
    pub success: bool,
    pub event_id: String,
    pub event_name: String,
    pub events_received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbtrace_id: Option<String>,
    pub test_mode: bool,
    pub used_fallback: bool,
    pub meta_response: Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
            debug_message: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub upstream: String,
    pub pixel_id: String,
    pub api_version: String,
    pub test_mode: bool,
    pub timestamp: String,
}
