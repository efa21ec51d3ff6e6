use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::domain::RuleId;
use crate::simulator::Simulator;

use super::request::RuleIdRequest;
use super::response::{Ack, HealthResponse, RulesInfo};
use super::service::RuleManagementService;

/// Shared application state.
pub struct AppState {
    /// The running simulator
    pub simulator: Arc<Simulator>,

    /// Rule list/remove operations
    pub rules: RuleManagementService,

    /// Application start time
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

impl AppState {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        AppState {
            rules: RuleManagementService::new(simulator.clone()),
            simulator,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Create the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/rules", get(handle_list_rules))
        .route("/v1/rules/:id", delete(handle_delete_rule))
        .route("/v1/rules/remove", post(handle_remove_rule))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_list_rules(State(state): State<Arc<AppState>>) -> Json<RulesInfo> {
    Json(state.rules.list_rules())
}

async fn handle_delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Json<Ack> {
    Json(state.rules.remove_rule(RuleIdRequest::from(RuleId(id))))
}

async fn handle_remove_rule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RuleIdRequest>,
) -> Json<Ack> {
    Json(state.rules.remove_rule(req))
}

/// Health check endpoint.
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        rules: state.simulator.registry().len(),
        adapters: state.simulator.adapters().adapter_count(),
    })
}

/// Metrics endpoint (Prometheus format).
async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut body = state.simulator.metrics().to_prometheus();
    body.push_str(&format!(
        r#"
# HELP msgsim_uptime_seconds Application uptime in seconds
# TYPE msgsim_uptime_seconds counter
msgsim_uptime_seconds {}

# HELP msgsim_rules Number of registered rules
# TYPE msgsim_rules gauge
msgsim_rules {}

# HELP msgsim_adapters Number of live adapters
# TYPE msgsim_adapters gauge
msgsim_adapters {}
"#,
        state.start_time.elapsed().as_secs(),
        state.simulator.registry().len(),
        state.simulator.adapters().adapter_count(),
    ));

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        body,
    )
}
