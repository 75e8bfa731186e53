//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::interceptor::protect;
use crate::error::{Result, TollgateError};
use crate::ratelimit::{RateLimiter, WindowStore};

/// HTTP server fronted by the rate limit interceptor.
pub struct HttpServer<S: WindowStore> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter<S>>,
}

impl<S: WindowStore> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter<S>>) -> Self {
        Self { addr, rate_limiter }
    }

    /// The routes served, wrapped in the interceptor.
    ///
    /// Only `/health` is served here; every other path answers with a JSON
    /// 404 after passing through the limiter.
    pub fn router(&self) -> Router {
        let routes = Router::new()
            .route("/health", get(health))
            .fallback(not_found);
        protect(routes, Arc::clone(&self.rate_limiter))
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TollgateError::Io(e)
            })
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "code": "NOT_FOUND",
                "message": "No route matches this path."
            }
        })),
    )
}
