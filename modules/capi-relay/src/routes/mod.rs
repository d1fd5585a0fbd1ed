pub mod capi;
pub mod health;
pub mod metrics;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::middleware::tracing::TRACE_ID_HEADER;
use crate::normalize::NormalizerPolicy;
use crate::upstream::{error::ForwardError, Credentials, UpstreamClient};

/// Shared, read-only state handed to every handler.
pub struct AppState {
    pub upstream: UpstreamClient,
    pub credentials: Arc<Credentials>,
    pub policy: NormalizerPolicy,
    pub allowed_origins: Vec<String>,
    pub development: bool,
    pub metrics: Metrics,
}

impl AppState {
    pub fn from_config(config: &Config, metrics: Metrics) -> Result<Self, ForwardError> {
        let upstream = UpstreamClient::new(&config.api_base, &config.api_version, config.upstream_timeout)?
            .with_metrics(metrics.clone());

        Ok(Self {
            upstream,
            credentials: Arc::new(config.credentials()),
            policy: config.normalizer_policy(),
            allowed_origins: config.allowed_origins.clone(),
            development: config.development,
            metrics,
        })
    }

    pub fn test_mode(&self) -> bool {
        self.credentials.test_event_code.is_some()
    }

    /// Requests without an `Origin` header are not browser requests and pass.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if allows_any(&self.allowed_origins) => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.trim_end_matches('/') == origin.trim_end_matches('/')),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        .route(
            "/api/capi",
            get(capi::status)
                .post(capi::receive_event)
                .options(|| async { StatusCode::NO_CONTENT }),
        )
        .route("/api/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allows_any(allowed_origins) {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o.trim_end_matches('/')).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static(TRACE_ID_HEADER),
        ])
        .max_age(Duration::from_secs(86_400))
}

fn allows_any(allowed_origins: &[String]) -> bool {
    allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*")
}
