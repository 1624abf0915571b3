//! # optx-server
//!
//! HTTP front door of the Cascades optimizer. A caller posts a logical plan tree
//! together with the statistics of the tables it reads and gets back the
//! cheapest physical plan and the counters of the search that found it.
//!
//! ## Endpoints
//!
//! - `GET  /health`   - Health check
//! - `GET  /rules`    - Rules active for the configured source type
//! - `POST /optimize` - Optimize a JSON plan tree
//!
//! ## Configuration
//!
//! Listens on `OPTX_ADDR` (default `0.0.0.0:3000`); see
//! [`state::OptimizerConfig::from_env`] for the search settings. Logging is
//! controlled by `RUST_LOG` (defaults to `optx=debug`).

mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("optx=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = state::OptimizerConfig::from_env();
    let addr = config.addr.clone();
    tracing::debug!(?config, "starting optimizer");
    let state = Arc::new(state::AppState::new(config));

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/rules", get(routes::list_rules))
        .route("/optimize", post(routes::optimize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("optx-server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
