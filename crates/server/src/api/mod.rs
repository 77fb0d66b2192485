use crate::config::AppState;
use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use coinlens_core::config::AppConfig;
use coinlens_core::error::ErrorKind;
use coinlens_mcp::Envelope;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server
pub async fn serve(addr: &str, config: &AppConfig) -> Result<()> {
    let state = AppState::new(config)?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Create the API router
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/tools", get(handlers::list_tools))
        .route("/api/tools/{name}", post(handlers::invoke_tool))
        .route("/api/invoke", post(handlers::invoke))
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "coinlens",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// HTTP status for an invocation outcome
pub fn status_for(envelope: &Envelope) -> StatusCode {
    match envelope.error_kind() {
        None => StatusCode::OK,
        Some(ErrorKind::UnknownTool | ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::InvalidArgument) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(
            ErrorKind::UpstreamUnavailable
            | ErrorKind::InvalidResponse
            | ErrorKind::PartialBatchFailure,
        ) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The envelope as a response body, with a status derived from its outcome
pub struct EnvelopeResponse(pub Envelope);

impl IntoResponse for EnvelopeResponse {
    fn into_response(self) -> Response {
        (status_for(&self.0), Json(self.0)).into_response()
    }
}
