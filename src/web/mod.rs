// Web server: Axum-based analysis API.
//
// Exposes the trust pipeline over HTTP for browser extensions and other
// clients that want a verdict without mentioning the bot. Stateless apart
// from the shared pipeline; there is no auth, so bind it to a private
// interface unless it sits behind a proxy.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analysis::TrustPipeline;

pub mod handlers;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TrustPipeline>,
}

/// Start the Axum web server and block until it exits.
pub async fn run_server(pipeline: Arc<TrustPipeline>, port: u16, bind: &str) -> Result<()> {
    let app = build_router(AppState { pipeline });

    let addr = format!("{bind}:{port}");
    info!("Sentinel analysis API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Drive the mention poller next to the HTTP server.
///
/// A poller that stops (an authentication failure is fatal to it) is logged
/// and the server keeps serving. Returns when the server exits or `shutdown`
/// resolves.
pub async fn serve_with_poller<P, S, D>(poller: P, server: S, shutdown: D) -> Result<()>
where
    P: Future<Output = Result<()>>,
    S: Future<Output = Result<()>>,
    D: Future<Output = ()>,
{
    tokio::pin!(poller, server, shutdown);
    let mut poller_running = true;

    loop {
        tokio::select! {
            result = &mut poller, if poller_running => {
                poller_running = false;
                match result {
                    Ok(()) => info!("Mention poller exited, analysis API still serving"),
                    Err(e) => error!(error = %format!("{e:#}"), "Mention poller stopped, analysis API still serving"),
                }
            }
            result = &mut server => return result,
            _ = &mut shutdown => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(handlers::analyze::analyze))
        .route("/live-feed", post(handlers::analyze::analyze))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check, always 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
