//! # planopt-server: HTTP Service for the Iterative Plan Optimizer
//!
//! This binary crate exposes the optimizer as a JSON service. A query planner sends
//! a logical plan with its symbol types and receives the rewritten plan.
//!
//! ```text
//! Planner
//!   |
//!   | HTTP POST /optimize (JSON plan, types, session, table statistics)
//!   v
//! planopt-server (this binary)
//!   |
//!   +-> memoize the plan
//!   +-> apply rule families until a fixed point or the session timeout
//!   +-> extract the cheapest recorded alternative
//!   |
//!   | HTTP response (JSON plan, driver state, passes, cost)
//!   v
//! Planner
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`    - Health check
//! - `GET  /rules`     - List rule families and their rules, in dispatch order
//! - `POST /optimize`  - Optimize a plan
//!
//! ## Configuration
//!
//! The server listens on `PLANOPT_LISTEN_ADDR` (default `0.0.0.0:3000`) and costs
//! broadcast exchanges for `PLANOPT_ACTIVE_NODES` workers (default 1). Logging is
//! controlled by the `RUST_LOG` environment variable (defaults to `planopt=debug`).

mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let directive: Directive = "planopt=debug".parse()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();

    let config = state::OptimizerConfig::from_env();
    let addr = config.listen_addr.clone();
    let state = Arc::new(state::AppState::new(config));
    let active_nodes = state.config.active_nodes;

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/rules", get(routes::list_rules))
        .route("/optimize", post(routes::optimize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        active_nodes,
        "planopt-server listening on http://{}",
        addr
    );
    axum::serve(listener, app).await?;
    Ok(())
}
