//! Event endpoint
//!
//! `GET /api/capi` reports which dataset and mode the relay targets.
//! `POST /api/capi` normalizes one browser event and forwards it.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::header,
    Json,
};
use chrono::Utc;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use super::AppState;
use crate::error::AppError;
use crate::middleware::tracing::get_trace_id_from_extensions;
use crate::models::{EventAcceptedResponse, InboundEventRequest, StatusResponse};
use crate::normalize::{normalize, RequestContext};

/// Browser events are small; anything larger is not ours.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Handler for GET /api/capi
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        service: "capi-relay",
        version: env!("CARGO_PKG_VERSION"),
        upstream: state.upstream.base_path().to_string(),
        pixel_id: state.credentials.pixel_id.clone(),
        api_version: state.upstream.api_version().to_string(),
        test_mode: state.test_mode(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Handler for POST /api/capi
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<EventAcceptedResponse>, AppError> {
    let result = handle_event(&state, request).await;

    let label = match &result {
        Ok(_) => "forwarded",
        Err(AppError::InvalidJson(_) | AppError::Validation(_)) => "invalid",
        Err(AppError::OriginNotAllowed(_)) => "forbidden",
        Err(AppError::Forward(e)) if e.is_rejection() => "rejected",
        Err(_) => "error",
    };
    state.metrics.record_event(label);

    result.map(Json)
}

async fn handle_event(
    state: &Arc<AppState>,
    request: Request,
) -> Result<EventAcceptedResponse, AppError> {
    let (parts, body) = request.into_parts();
    let trace_id = get_trace_id_from_extensions(&parts.extensions);

    let origin = parts
        .headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !state.origin_allowed(origin) {
        return Err(AppError::OriginNotAllowed(origin.unwrap_or_default().to_string()));
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::InvalidJson(format!("failed to read body: {e}")))?;
    let inbound = parse_inbound(&bytes)?;

    let connect = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ctx = RequestContext::new(parts.headers, connect);

    let event = normalize(inbound, &ctx, &state.policy, Utc::now())?;
    let event_id = event.event_id.clone();
    let event_name = event.event_name.clone();

    tracing::info!(
        trace_id = %trace_id,
        event_id = %event_id,
        event_name = %event_name,
        test_mode = state.test_mode(),
        "Forwarding event"
    );

    // Own task: a dropped inbound connection must not cancel the upstream
    // call midway. It still ends on the client timeout.
    let upstream = state.upstream.clone();
    let credentials = state.credentials.clone();
    let ack = tokio::spawn(async move { upstream.forward(&event, &credentials).await })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("forward task failed: {e}"),
            expose: state.development,
        })??;

    tracing::info!(
        trace_id = %trace_id,
        event_id = %event_id,
        events_received = ack.events_received,
        used_fallback = ack.used_fallback,
        "Event accepted upstream"
    );

    Ok(EventAcceptedResponse {
        success: true,
        event_id,
        event_name,
        events_received: ack.events_received,
        fbtrace_id: ack.fbtrace_id,
        test_mode: state.test_mode(),
        used_fallback: ack.used_fallback,
        meta_response: ack.body,
    })
}

/// Accept the event as a JSON object, or as a JSON string holding the
/// object's text (clients that stringify twice).
pub fn parse_inbound(bytes: &Bytes) -> Result<InboundEventRequest, AppError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| AppError::InvalidJson(e.to_string()))?;

    let value = match value {
        Value::String(text) => {
            serde_json::from_str(&text).map_err(|e| AppError::InvalidJson(e.to_string()))?
        }
        other => other,
    };

    if !value.is_object() {
        return Err(AppError::InvalidJson("expected a JSON object".to_string()));
    }

    serde_json::from_value(value).map_err(|e| AppError::InvalidJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object() {
        let bytes = Bytes::from_static(br#"{"event_name":"Lead","event_time":1700000000}"#);
        let inbound = parse_inbound(&bytes).unwrap();
        assert_eq!(inbound.event_name.as_deref(), Some("Lead"));
        assert_eq!(inbound.event_time, Some(1_700_000_000));
    }

    #[test]
    fn test_parse_double_encoded() {
        let bytes = Bytes::from_static(br#""{\"event_name\":\"PageView\"}""#);
        let inbound = parse_inbound(&bytes).unwrap();
        assert_eq!(inbound.event_name.as_deref(), Some("PageView"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let bodies: [&[u8]; 5] = [
            b"not json",
            b"",
            b"[1,2]",
            b"\"still not json\"",
            b"{\"event_time\":\"soon\"}",
        ];
        for body in bodies {
            assert!(matches!(
                parse_inbound(&Bytes::copy_from_slice(body)),
                Err(AppError::InvalidJson(_))
            ));
        }
    }
}
