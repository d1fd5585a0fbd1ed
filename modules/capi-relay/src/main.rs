use axum::middleware::from_fn;
use capi_relay_rs::{config::Config, metrics::Metrics, middleware, router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,capi_relay_rs=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        pixel_id = %config.pixel_id,
        api_version = %config.api_version,
        test_mode = config.test_mode,
        allowed_origins = config.allowed_origins.len(),
        "config loaded"
    );

    let metrics = Metrics::new()?;
    let state = Arc::new(AppState::from_config(&config, metrics)?);

    let app = router(state)
        .layer(from_fn(middleware::tracing::trace_id_middleware))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
