use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mail_dispatch::api;
use mail_dispatch::config::Config;
use mail_dispatch::events::{spawn_event_logger, EventBus};
use mail_dispatch::mail::build_transport;
use mail_dispatch::mail::template::TeraRenderer;
use mail_dispatch::pipeline::SendPipeline;
use mail_dispatch::rate_limit::RateLimiter;
use mail_dispatch::state::AppState;

/// Headroom for upload parsing, rendering and counter updates on top of delivery
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting mail dispatch service...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        host = %config.server_host,
        port = %config.server_port,
        mailer = %config.mail_mailer,
        rate_limit_max = config.rate_limit_max,
        "Configuration loaded"
    );

    let rate_limiter = RateLimiter::from_config(&config)?;

    // Test rate limit store connection
    match rate_limiter.health_check().await {
        Ok(true) => tracing::info!("Rate limit store connection established"),
        Ok(false) => tracing::warn!("Rate limit store health check returned false"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to rate limit store");
            // Continue anyway, might recover later
        }
    }

    let transport = build_transport(&config)?;
    let renderer = TeraRenderer::from_dir(&config.template_dir)?;

    let events = EventBus::new();
    let _event_logger = spawn_event_logger(&events);

    let pipeline = SendPipeline::from_config(
        &config,
        rate_limiter,
        transport,
        Arc::new(renderer),
        events,
    );
    let request_timeout = pipeline
        .retry_policy()
        .worst_case(Duration::from_secs(config.mail_timeout_seconds))
        + REQUEST_TIMEOUT_MARGIN;
    tracing::debug!(seconds = request_timeout.as_secs(), "Request timeout derived");

    let state = AppState::new(config.clone(), pipeline);

    // Build router
    let app = Router::new()
        .merge(api::create_router(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.server_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Handle shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
