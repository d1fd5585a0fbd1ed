//! Event normalization
//!
//! Turns an untrusted [`InboundEventRequest`] plus the HTTP request context
//! into a [`CanonicalOutboundEvent`]. Either every step succeeds or a
//! [`ValidationError`] is returned; partial events are never produced.
//!
//! # Steps
//!
//! 1. `event_name` is required
//! 2. `event_name` is canonicalized against the allow-list and alias table;
//!    unknown names are rejected
//! 3. `event_time` defaults to now and must lie within `max_event_age`
//! 4. `event_id` defaults to a generated id
//! 5. client IP from proxy headers or the connection
//! 6. user agent from the payload, the header, or `"Unknown"`
//! 7. `fbp`/`fbc` from the payload or cookies / click id
//! 8. email and phone are hashed; failures drop the field
//! 9. provenance fields are merged into `custom_data`

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use thiserror::Error;

use crate::client_ip::{resolve_client_ip, DEFAULT_TRUSTED_HEADER};
use crate::hashing::{hash_phone, hash_pii};
use crate::identity::extract_identifiers;
use crate::models::{CanonicalOutboundEvent, InboundEventRequest, UserData, ACTION_SOURCE_WEBSITE};

pub const DEFAULT_MAX_EVENT_AGE_SECS: i64 = 7 * 24 * 60 * 60;
pub const UNKNOWN_USER_AGENT: &str = "Unknown";

/// Upstream standard events.
pub const STANDARD_EVENTS: &[&str] = &[
    "AddPaymentInfo",
    "AddToCart",
    "AddToWishlist",
    "CompleteRegistration",
    "Contact",
    "CustomizeProduct",
    "Donate",
    "FindLocation",
    "InitiateCheckout",
    "Lead",
    "PageView",
    "Purchase",
    "Schedule",
    "Search",
    "StartTrial",
    "SubmitApplication",
    "Subscribe",
    "ViewContent",
];

/// Names the browser script and older integrations send, keyed lowercase.
const EVENT_ALIASES: &[(&str, &str)] = &[
    ("whatsappclick", "Lead"),
    ("contactformsubmit", "Lead"),
    ("formsubmit", "Lead"),
    ("form_submit", "Lead"),
    ("buttonclick", "Lead"),
    ("button_click", "Lead"),
    ("ctaclick", "Lead"),
    ("cta_click", "Lead"),
    ("phoneclick", "Lead"),
    ("emailclick", "Lead"),
    ("quoterequest", "Lead"),
    ("demorequest", "Lead"),
    ("pageload", "PageView"),
    ("pagevisit", "PageView"),
];

pub const PROVENANCE_SOURCE_KEY: &str = "_relay_source";
pub const PROVENANCE_VERSION_KEY: &str = "_relay_version";
pub const PROVENANCE_RECEIVED_AT_KEY: &str = "_relay_received_at";
const PROVENANCE_SOURCE: &str = "capi-relay";

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for field '{field}': {message}")]
    InvalidField { field: &'static str, message: String },

    #[error("Event name '{0}' is not allowed")]
    DisallowedEventName(String),

    #[error("event_time {event_time} is more than {max_age_secs}s away from now ({now})")]
    TimestampOutOfRange {
        event_time: i64,
        now: i64,
        max_age_secs: i64,
    },
}

impl ValidationError {
    /// Short category string returned to callers.
    pub fn category(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::InvalidField { .. } => "invalid_field",
            ValidationError::DisallowedEventName(_) => "disallowed_event_name",
            ValidationError::TimestampOutOfRange { .. } => "timestamp_out_of_range",
        }
    }
}

/// Parts of the HTTP request the normalizer reads.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HeaderMap,
    pub connect: Option<SocketAddr>,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, connect: Option<SocketAddr>) -> Self {
        Self { headers, connect }
    }

    fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Policy values the normalizer takes from configuration.
#[derive(Debug, Clone)]
pub struct NormalizerPolicy {
    pub extra_event_names: Vec<String>,
    pub max_event_age_secs: i64,
    pub trusted_ip_header: String,
}

impl Default for NormalizerPolicy {
    fn default() -> Self {
        Self {
            extra_event_names: Vec::new(),
            max_event_age_secs: DEFAULT_MAX_EVENT_AGE_SECS,
            trusted_ip_header: DEFAULT_TRUSTED_HEADER.to_string(),
        }
    }
}

/// Build the canonical outbound event.
pub fn normalize(
    inbound: InboundEventRequest,
    ctx: &RequestContext,
    policy: &NormalizerPolicy,
    now: DateTime<Utc>,
) -> Result<CanonicalOutboundEvent, ValidationError> {
    let raw_name = non_empty(inbound.event_name).ok_or(ValidationError::MissingField("event_name"))?;

    let event_name = canonicalize_event_name(&raw_name, &policy.extra_event_names)
        .ok_or_else(|| ValidationError::DisallowedEventName(raw_name.clone()))?;

    let now_secs = now.timestamp();
    let event_time = inbound.event_time.unwrap_or(now_secs);
    if now_secs.abs_diff(event_time) > policy.max_event_age_secs.unsigned_abs() {
        return Err(ValidationError::TimestampOutOfRange {
            event_time,
            now: now_secs,
            max_age_secs: policy.max_event_age_secs,
        });
    }

    let event_id = non_empty(inbound.event_id)
        .unwrap_or_else(|| generate_event_id(&event_name, now.timestamp_millis()));

    let client_ip_address = resolve_client_ip(&ctx.headers, ctx.connect, &policy.trusted_ip_header);

    let client_user_agent = non_empty(inbound.user_agent)
        .or_else(|| ctx.header(header::USER_AGENT).map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_USER_AGENT.to_string());

    let event_source_url = non_empty(inbound.event_source_url);
    let page_url = event_source_url.as_deref().or_else(|| ctx.header(header::REFERER));
    let derived = extract_identifiers(ctx.header(header::COOKIE), page_url, now_secs);
    let fbp = non_empty(inbound.fbp).or(derived.fbp);
    let fbc = non_empty(inbound.fbc).or(derived.fbc);

    let hashed_email = hash_pii(inbound.email.as_deref());
    let hashed_phone = hash_phone(inbound.phone_number.as_deref());

    let custom_data = match inbound.custom_data {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(with_provenance(map, now)),
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "custom_data",
                message: "expected a JSON object".to_string(),
            })
        }
    };

    Ok(CanonicalOutboundEvent {
        event_name,
        event_time,
        event_id,
        event_source_url,
        action_source: ACTION_SOURCE_WEBSITE,
        user_data: UserData {
            client_ip_address,
            client_user_agent,
            fbp,
            fbc,
            hashed_email,
            hashed_phone,
        },
        custom_data,
    })
}

/// Map a caller-supplied name onto the allow-list.
///
/// Returns `None` for names that are neither allowed nor a known alias.
/// Canonical names map to themselves.
pub fn canonicalize_event_name(name: &str, extra_allowed: &[String]) -> Option<String> {
    let name = name.trim();

    let allowed = STANDARD_EVENTS
        .iter()
        .copied()
        .chain(extra_allowed.iter().map(String::as_str));

    let mut case_insensitive = None;
    for candidate in allowed {
        if candidate == name {
            return Some(candidate.to_string());
        }
        if case_insensitive.is_none() && candidate.eq_ignore_ascii_case(name) {
            case_insensitive = Some(candidate);
        }
    }
    if let Some(candidate) = case_insensitive {
        return Some(candidate.to_string());
    }

    let key = name.to_ascii_lowercase();
    EVENT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| canonical.to_string())
}

/// `<event name>_<unix millis>_<64 random bits as hex>`
pub fn generate_event_id(event_name: &str, now_millis: i64) -> String {
    let entropy: u64 = rand::thread_rng().gen();
    format!("{event_name}_{now_millis}_{entropy:016x}")
}

fn with_provenance(mut custom: Map<String, Value>, now: DateTime<Utc>) -> Map<String, Value> {
    let provenance = [
        (PROVENANCE_SOURCE_KEY, Value::from(PROVENANCE_SOURCE)),
        (PROVENANCE_VERSION_KEY, Value::from(env!("CARGO_PKG_VERSION"))),
        (PROVENANCE_RECEIVED_AT_KEY, Value::from(now.to_rfc3339())),
    ];
    for (key, value) in provenance {
        custom.entry(key).or_insert(value);
    }
    custom
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn lead() -> InboundEventRequest {
        InboundEventRequest {
            event_name: Some("Lead".to_string()),
            ..Default::default()
        }
    }

    fn run(inbound: InboundEventRequest) -> Result<CanonicalOutboundEvent, ValidationError> {
        normalize(inbound, &RequestContext::default(), &NormalizerPolicy::default(), now())
    }

    #[test]
    fn test_missing_event_name() {
        assert_eq!(
            run(InboundEventRequest::default()),
            Err(ValidationError::MissingField("event_name"))
        );
        let blank = InboundEventRequest {
            event_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(run(blank), Err(ValidationError::MissingField("event_name")));
    }

    #[test]
    fn test_canonical_names_are_fixed_points() {
        for name in STANDARD_EVENTS {
            let once = canonicalize_event_name(name, &[]).unwrap();
            assert_eq!(&once, name);
            assert_eq!(canonicalize_event_name(&once, &[]).unwrap(), once);
        }
    }

    #[test]
    fn test_aliases_map_to_standard_events() {
        assert_eq!(canonicalize_event_name("WhatsAppClick", &[]).as_deref(), Some("Lead"));
        assert_eq!(canonicalize_event_name("ContactFormSubmit", &[]).as_deref(), Some("Lead"));
        assert_eq!(canonicalize_event_name("pageload", &[]).as_deref(), Some("PageView"));
        for (alias, _) in EVENT_ALIASES {
            let canonical = canonicalize_event_name(alias, &[]).unwrap();
            assert_eq!(canonicalize_event_name(&canonical, &[]).unwrap(), canonical);
        }
    }

    #[test]
    fn test_case_insensitive_match() {
        assert_eq!(canonicalize_event_name("pageview", &[]).as_deref(), Some("PageView"));
        assert_eq!(canonicalize_event_name(" LEAD ", &[]).as_deref(), Some("Lead"));
    }

    #[test]
    fn test_unknown_name_rejected() {
        let inbound = InboundEventRequest {
            event_name: Some("MysteryEvent".to_string()),
            ..Default::default()
        };
        assert_eq!(
            run(inbound),
            Err(ValidationError::DisallowedEventName("MysteryEvent".to_string()))
        );
    }

    #[test]
    fn test_configured_extra_names_allowed() {
        let policy = NormalizerPolicy {
            extra_event_names: vec!["QuizCompleted".to_string()],
            ..Default::default()
        };
        let inbound = InboundEventRequest {
            event_name: Some("QuizCompleted".to_string()),
            ..Default::default()
        };
        let event = normalize(inbound, &RequestContext::default(), &policy, now()).unwrap();
        assert_eq!(event.event_name, "QuizCompleted");
    }

    #[test]
    fn test_event_time_defaults_to_now() {
        let event = run(lead()).unwrap();
        assert_eq!(event.event_time, 1_700_000_000);
    }

    #[test]
    fn test_event_time_bounds() {
        let within = InboundEventRequest {
            event_time: Some(1_700_000_000 - DEFAULT_MAX_EVENT_AGE_SECS),
            ..lead()
        };
        assert!(run(within).is_ok());

        for event_time in [
            1_700_000_000 - DEFAULT_MAX_EVENT_AGE_SECS - 1,
            1_700_000_000 + DEFAULT_MAX_EVENT_AGE_SECS + 1,
        ] {
            let inbound = InboundEventRequest {
                event_time: Some(event_time),
                ..lead()
            };
            assert!(matches!(
                run(inbound),
                Err(ValidationError::TimestampOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn test_extreme_event_time_is_out_of_range() {
        for event_time in [i64::MIN, i64::MAX] {
            let inbound = InboundEventRequest {
                event_time: Some(event_time),
                ..lead()
            };
            assert!(matches!(
                run(inbound),
                Err(ValidationError::TimestampOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn test_caller_event_id_is_kept() {
        let inbound = InboundEventRequest {
            event_id: Some("evt-123".to_string()),
            ..lead()
        };
        assert_eq!(run(inbound).unwrap().event_id, "evt-123");
    }

    #[test]
    fn test_generated_ids_differ_within_same_millisecond() {
        let a = generate_event_id("Lead", 1_700_000_000_000);
        let b = generate_event_id("Lead", 1_700_000_000_000);
        assert_ne!(a, b);
        assert!(a.starts_with("Lead_1700000000000_"));
        assert_eq!(a.rsplit('_').next().unwrap().len(), 16);
    }

    #[test]
    fn test_generated_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..2_000)
                        .map(|_| generate_event_id("PageView", 1_700_000_000_000))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate event id");
            }
        }
        assert_eq!(seen.len(), 16_000);
    }

    #[test]
    fn test_user_agent_resolution() {
        assert_eq!(run(lead()).unwrap().user_data.client_user_agent, UNKNOWN_USER_AGENT);

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("HeaderAgent/1.0"));
        let ctx = RequestContext::new(headers, None);

        let from_header = normalize(lead(), &ctx, &NormalizerPolicy::default(), now()).unwrap();
        assert_eq!(from_header.user_data.client_user_agent, "HeaderAgent/1.0");

        let inbound = InboundEventRequest {
            user_agent: Some("BodyAgent/2.0".to_string()),
            ..lead()
        };
        let from_body = normalize(inbound, &ctx, &NormalizerPolicy::default(), now()).unwrap();
        assert_eq!(from_body.user_data.client_user_agent, "BodyAgent/2.0");
    }

    #[test]
    fn test_client_ip_from_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));
        let ctx = RequestContext::new(headers, None);

        let event = normalize(lead(), &ctx, &NormalizerPolicy::default(), now()).unwrap();
        assert_eq!(event.user_data.client_ip_address, "203.0.113.5");
    }

    #[test]
    fn test_identifiers_from_cookies_and_click_id() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("_fbp=fb.1.1.999"));
        let ctx = RequestContext::new(headers, None);
        let inbound = InboundEventRequest {
            event_source_url: Some("https://example.com/?fbclid=CLICK".to_string()),
            ..lead()
        };

        let event = normalize(inbound, &ctx, &NormalizerPolicy::default(), now()).unwrap();
        assert_eq!(event.user_data.fbp.as_deref(), Some("fb.1.1.999"));
        assert_eq!(event.user_data.fbc.as_deref(), Some("fb.1.1700000000.CLICK"));
    }

    #[test]
    fn test_payload_identifiers_win() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("_fbp=cookie; _fbc=cookie"));
        let ctx = RequestContext::new(headers, None);
        let inbound = InboundEventRequest {
            fbp: Some("payload-fbp".to_string()),
            fbc: Some("payload-fbc".to_string()),
            ..lead()
        };

        let event = normalize(inbound, &ctx, &NormalizerPolicy::default(), now()).unwrap();
        assert_eq!(event.user_data.fbp.as_deref(), Some("payload-fbp"));
        assert_eq!(event.user_data.fbc.as_deref(), Some("payload-fbc"));
    }

    #[test]
    fn test_pii_is_hashed_never_raw() {
        let inbound = InboundEventRequest {
            email: Some("Test@Example.com ".to_string()),
            phone_number: Some("   ".to_string()),
            ..lead()
        };
        let event = run(inbound).unwrap();

        assert_eq!(event.user_data.hashed_email, hash_pii(Some("test@example.com")));
        assert_eq!(event.user_data.hashed_phone, None);

        let serialized = serde_json::to_string(&event).unwrap();
        assert!(!serialized.to_lowercase().contains("test@example.com"));
    }

    #[test]
    fn test_custom_data_keeps_caller_keys() {
        let inbound = InboundEventRequest {
            custom_data: Some(json!({
                "content_name": "Get a quote",
                "_relay_source": "caller-value"
            })),
            ..lead()
        };
        let custom = run(inbound).unwrap().custom_data.unwrap();

        assert_eq!(custom["content_name"], "Get a quote");
        assert_eq!(custom[PROVENANCE_SOURCE_KEY], "caller-value");
        assert_eq!(custom[PROVENANCE_VERSION_KEY], env!("CARGO_PKG_VERSION"));
        assert!(custom.contains_key(PROVENANCE_RECEIVED_AT_KEY));
    }

    #[test]
    fn test_custom_data_must_be_object() {
        let inbound = InboundEventRequest {
            custom_data: Some(json!(["not", "an", "object"])),
            ..lead()
        };
        assert!(matches!(
            run(inbound),
            Err(ValidationError::InvalidField { field: "custom_data", .. })
        ));
    }

    #[test]
    fn test_absent_custom_data_stays_absent() {
        assert_eq!(run(lead()).unwrap().custom_data, None);
    }
}
