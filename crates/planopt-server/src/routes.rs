//! # HTTP Route Handlers
//!
//! This module defines the Axum route handlers for the optimizer service.
//!
//! ## Optimization Pipeline
//!
//! 1. **Decode**: Parse the JSON request into a plan, its symbol types, session
//!    properties and optional table statistics.
//! 2. **Configure**: Build an optimizer over the shared rules and calculators, with a
//!    per-request catalog when statistics were sent.
//! 3. **Optimize**: Run the iterative optimizer on a blocking worker thread.
//! 4. **Encode**: Return the optimized plan, final driver state and cumulative cost.
//!
//! ## Error Handling
//!
//! Errors are returned as HTTP status codes with descriptive messages:
//! - 400 Bad Request: malformed JSON
//! - 422 Unprocessable Entity: the optimizer rejected the plan or failed on it
//! - 500 Internal Server Error: the optimization task could not complete

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use planopt_core::catalog::{Catalog, InMemoryCatalog};
use planopt_core::error::OptimizerError;
use planopt_core::optimizer::{CancellationFlag, OptimizerOutcome};
use planopt_core::plan::{PlanNode, TableRef};
use planopt_core::session::Session;
use planopt_core::stats::TableStatistics;
use planopt_core::symbol::TypeProvider;

use crate::state::AppState;

type ApiError = (StatusCode, String);

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /rules: rule families in the order they are tried.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let partitions = state
        .rule_registry
        .partitions()
        .iter()
        .map(|p| PartitionInfo {
            name: p.name().to_string(),
            rules: p.rules().map(|r| r.name().to_string()).collect(),
        })
        .collect();
    Json(RulesResponse { partitions })
}

#[derive(Serialize)]
pub struct RulesResponse {
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Serialize)]
pub struct PartitionInfo {
    pub name: String,
    pub rules: Vec<String>,
}

/// Request body for `POST /optimize`.
#[derive(Deserialize)]
pub struct OptimizeRequest {
    pub plan: PlanNode,
    pub types: TypeProvider,
    #[serde(default)]
    pub session: Session,
    /// Statistics for the tables the plan scans. Omitted tables have unknown statistics.
    #[serde(default)]
    pub tables: Vec<TableInfo>,
}

#[derive(Deserialize)]
pub struct TableInfo {
    pub table: TableRef,
    pub statistics: TableStatistics,
}

/// POST /optimize
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    request: Result<Json<OptimizeRequest>, JsonRejection>,
) -> Result<Json<OptimizerOutcome>, ApiError> {
    let Json(request) =
        request.map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request: {}", e)))?;
    let catalog = build_catalog(&request.tables);
    let optimizer = state.optimizer(catalog);

    let outcome = tokio::task::spawn_blocking(move || {
        optimizer.optimize(
            request.plan,
            &request.types,
            &request.session,
            &CancellationFlag::new(),
        )
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Optimization task failed: {}", e),
        )
    })?
    .map_err(optimizer_error)?;

    debug!(
        state = ?outcome.state,
        passes = outcome.passes,
        rule_applications = outcome.rule_applications,
        "optimized plan"
    );
    Ok(Json(outcome))
}

/// Build a per-request catalog from the statistics sent with the plan.
fn build_catalog(tables: &[TableInfo]) -> Option<Arc<dyn Catalog>> {
    if tables.is_empty() {
        return None;
    }
    let mut catalog = InMemoryCatalog::new();
    for info in tables {
        catalog.add_table(info.table.clone(), info.statistics.clone());
    }
    Some(Arc::new(catalog))
}

fn optimizer_error(err: OptimizerError) -> ApiError {
    let status = match err {
        OptimizerError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, format!("Optimization failed: {}", err))
}
