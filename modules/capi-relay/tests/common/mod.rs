#![allow(dead_code)]

use axum::body::Body;
use axum::Router;
use capi_relay_rs::metrics::Metrics;
use capi_relay_rs::normalize::NormalizerPolicy;
use capi_relay_rs::{router, AppState, Credentials, UpstreamClient};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{Match, MockServer, Request};

pub const PIXEL_ID: &str = "1234567890";
pub const ACCESS_TOKEN: &str = "EAAB-test-access-token";
pub const TEST_EVENT_CODE: &str = "TEST42";
pub const API_VERSION: &str = "v19.0";

/// Path the upstream mock serves events on.
pub fn events_path() -> String {
    format!("/{API_VERSION}/{PIXEL_ID}/events")
}

pub fn credentials(test_event_code: Option<&str>) -> Credentials {
    Credentials {
        pixel_id: PIXEL_ID.to_string(),
        access_token: ACCESS_TOKEN.to_string(),
        test_event_code: test_event_code.map(str::to_string),
    }
}

pub fn upstream_client(server: &MockServer, timeout: Duration) -> UpstreamClient {
    UpstreamClient::new(&server.uri(), API_VERSION, timeout).expect("upstream client")
}

/// Options for building the app under test.
pub struct TestApp {
    pub test_event_code: Option<&'static str>,
    pub allowed_origins: Vec<String>,
    pub timeout: Duration,
    pub development: bool,
}

impl Default for TestApp {
    fn default() -> Self {
        Self {
            test_event_code: None,
            allowed_origins: Vec::new(),
            timeout: Duration::from_secs(2),
            development: false,
        }
    }
}

impl TestApp {
    pub fn state(self, server: &MockServer) -> Arc<AppState> {
        let metrics = Metrics::new().expect("metrics");
        Arc::new(AppState {
            upstream: upstream_client(server, self.timeout).with_metrics(metrics.clone()),
            credentials: Arc::new(credentials(self.test_event_code)),
            policy: NormalizerPolicy::default(),
            allowed_origins: self.allowed_origins,
            development: self.development,
            metrics,
        })
    }

    pub fn build(self, server: &MockServer) -> Router {
        router(self.state(server))
    }
}

/// Read response body as JSON.
pub async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read response body as text.
pub async fn body_text(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// JSON bodies of every request the mock upstream received.
pub async fn upstream_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.body_json::<Value>().expect("upstream body is JSON"))
        .collect()
}

/// Matches envelopes sent in production mode (no `test_event_code`).
pub struct WithoutTestEventCode;

impl Match for WithoutTestEventCode {
    fn matches(&self, request: &Request) -> bool {
        request
            .body_json::<Value>()
            .map(|body| body.get("test_event_code").is_none())
            .unwrap_or(false)
    }
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
