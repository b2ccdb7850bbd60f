//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::RefreshMode;
use crate::sampler::SharedSampler;
use crate::source::DeviceSource;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
struct AppState<S> {
    sampler: SharedSampler<S>,
    mode: RefreshMode,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            sampler: self.sampler.clone(),
            mode: self.mode,
        }
    }
}

/// Create the HTTP router.
///
/// The metrics are served on `metrics_path` and on `/`.
pub fn create_router<S: DeviceSource>(
    sampler: SharedSampler<S>,
    mode: RefreshMode,
    metrics_path: &str,
) -> Router {
    let state = AppState { sampler, mode };

    let mut router = Router::new().route(metrics_path, get(metrics_handler::<S>));
    if metrics_path != "/" {
        router = router.route("/", get(metrics_handler::<S>));
    }

    router
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<S>))
        .route("/status", get(status_handler::<S>))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Handler for the metrics endpoint.
///
/// In scrape mode the registry is refreshed first; a slow or failing
/// source only means the last known values are served.
async fn metrics_handler<S: DeviceSource>(State(state): State<AppState<S>>) -> Response {
    if state.mode == RefreshMode::Scrape {
        state.sampler.refresh().await;
    }

    let body = state.sampler.registry().snapshot();

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler<S: DeviceSource>(State(state): State<AppState<S>>) -> Response {
    let stats = state.sampler.registry().stats();

    if stats.sample_cycles > 0 {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no sample cycle completed yet\n",
        )
            .into_response()
    }
}

/// Handler for the /status endpoint.
async fn status_handler<S: DeviceSource>(State(state): State<AppState<S>>) -> Response {
    let registry = state.sampler.registry();
    let status = serde_json::json!({
        "exporter": "bacnet",
        "version": env!("CARGO_PKG_VERSION"),
        "refresh_mode": state.mode,
        "series": registry.series_count(),
        "samples": registry.label_count(),
        "stats": registry.stats(),
    });

    (StatusCode::OK, axum::Json(status)).into_response()
}

/// HTTP server bound to its listen address.
pub struct HttpServer {
    router: Router,
    listener: TcpListener,
    metrics_path: String,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// Binding happens here rather than in [`HttpServer::run`] so that a busy
    /// port is reported before anything else starts.
    pub async fn bind<S: DeviceSource>(
        sampler: SharedSampler<S>,
        mode: RefreshMode,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let router = create_router(sampler, mode, &metrics_path);

        info!(
            addr = %listener.local_addr()?,
            path = %metrics_path,
            "HTTP server listening"
        );

        Ok(Self {
            router,
            listener,
            metrics_path,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(path = %self.metrics_path, "Serving metrics");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
