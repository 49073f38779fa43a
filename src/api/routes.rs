//! Route table and handlers
//!
//! All cluster endpoints live under `/api/operationmanagement`; `/health`
//! stays at the root for liveness probes. Read handlers go straight to the
//! topology probes; mutating handlers go through the orchestrator and fail
//! fast with BUSY on contention.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::error::{error_response, ErrorBody};
use crate::config::{Config, NodeSeed};
use crate::driver::NodeDriver;
use crate::failover::{HostDoc, OpError, Orchestrator};
use crate::topology::{self, NodeKind, Registry};

/// Shared state for every handler.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<Registry>,
    pub driver: Arc<dyn NodeDriver>,
    pub config: Arc<Config>,
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn reject(err: OpError) -> ApiError {
    error_response(&err)
}

/// Build the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cluster = Router::new()
        .route("/status", get(get_status))
        .route("/status/{node}", get(get_node_status))
        .route("/nodes", get(get_nodes))
        .route("/overview", get(get_overview))
        .route("/promote/{node}", post(post_promote))
        .route("/primary", post(post_primary))
        .route("/demote/{node}", post(post_demote))
        .route("/demote-all", post(post_demote_all))
        .route("/hosts", post(post_hosts))
        .route("/hosts/{id}", delete(delete_hosts))
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/health", get(get_health))
        .nest("/api/operationmanagement", cluster)
}

// ==================
// Read handlers
// ==================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pgpilot",
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<topology::StatusDoc> {
    let doc = topology::build_status(
        state.driver.as_ref(),
        &state.registry,
        state.config.probe_deadline,
    )
    .await;
    Json(doc)
}

async fn get_node_status(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
) -> ApiResult<topology::SingleNodeDoc> {
    let target = state
        .registry
        .get(&node)
        .ok_or_else(|| reject(OpError::invalid_target(format!("unknown node {:?}", node))))?;
    let doc =
        topology::node_status_doc(state.driver.as_ref(), &target, state.config.probe_deadline)
            .await;
    Ok(Json(doc))
}

async fn get_nodes(State(state): State<Arc<AppState>>) -> Json<topology::NodesDoc> {
    let doc = topology::nodes_doc(
        state.driver.as_ref(),
        &state.registry,
        state.config.probe_deadline,
    )
    .await;
    Json(doc)
}

async fn get_overview(State(state): State<Arc<AppState>>) -> Json<topology::OverviewDoc> {
    let doc = topology::build_overview(
        state.driver.as_ref(),
        &state.registry,
        state.config.probe_deadline,
        state.config.healthy_lag_bytes,
    )
    .await;
    Json(doc)
}

// ==================
// Failover handlers
// ==================

#[derive(Debug, Serialize)]
struct PromoteResponse {
    message: String,
    new_primary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

async fn post_promote(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
) -> ApiResult<PromoteResponse> {
    run_promote(state, node).await
}

#[derive(Debug, Deserialize)]
struct PrimaryRequest {
    new_primary: String,
}

async fn post_primary(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PrimaryRequest>,
) -> ApiResult<PromoteResponse> {
    run_promote(state, request.new_primary).await
}

async fn run_promote(state: Arc<AppState>, node: String) -> ApiResult<PromoteResponse> {
    let outcome = state
        .orchestrator
        .promote(node)
        .await
        .map_err(|err| reject(err))?;
    let message = if outcome.already_primary {
        format!("{} is already primary", outcome.new_primary)
    } else {
        format!("{} has been promoted to primary", outcome.new_primary)
    };
    Ok(Json(PromoteResponse {
        message,
        new_primary: outcome.new_primary,
        warnings: outcome.warnings,
    }))
}

#[derive(Debug, Serialize)]
struct DemoteResponse {
    message: String,
    node: String,
}

async fn post_demote(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
) -> ApiResult<DemoteResponse> {
    let demoted = state
        .orchestrator
        .demote_one(node)
        .await
        .map_err(|err| reject(err))?;
    Ok(Json(DemoteResponse {
        message: format!("{} demoted to standby", demoted),
        node: demoted,
    }))
}

#[derive(Debug, Serialize)]
struct DemoteAllResponse {
    message: String,
    demoted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<crate::failover::NodeFailure>,
}

async fn post_demote_all(State(state): State<Arc<AppState>>) -> ApiResult<DemoteAllResponse> {
    let report = state
        .orchestrator
        .demote_all()
        .await
        .map_err(|err| reject(err))?;
    Ok(Json(DemoteAllResponse {
        message: "all backups demoted to standby".to_string(),
        demoted: report.demoted,
        skipped: report.skipped,
        failed: report.failed,
    }))
}

// ==================
// Registry handlers
// ==================

#[derive(Debug, Deserialize)]
struct AddHostRequest {
    name: String,
    host: String,
    port: u16,
    /// Validated by hand so an unknown kind is a 400, not a decode failure.
    kind: String,
    #[serde(default)]
    container: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddHostResponse {
    message: String,
    host: HostDoc,
}

async fn post_hosts(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddHostRequest>,
) -> Result<(StatusCode, Json<AddHostResponse>), ApiError> {
    let kind = match request.kind.as_str() {
        "backup" => NodeKind::Backup,
        "replica" => NodeKind::Replica,
        other => {
            return Err(reject(OpError::invalid_target(format!(
                "kind must be \"backup\" or \"replica\", got {:?}",
                other
            ))))
        }
    };
    let seed = NodeSeed {
        name: request.name,
        container: request.container,
        host: request.host,
        port: request.port,
        kind,
    };
    let host = state
        .orchestrator
        .add_host(seed)
        .await
        .map_err(|err| reject(err))?;
    Ok((
        StatusCode::CREATED,
        Json(AddHostResponse {
            message: format!("host {} added", host.name),
            host,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct DeleteHostResponse {
    message: String,
    deleted_host: HostDoc,
}

async fn delete_hosts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DeleteHostResponse> {
    let deleted = state
        .orchestrator
        .delete_host(&id)
        .await
        .map_err(|err| reject(err))?;
    Ok(Json(DeleteHostResponse {
        message: format!("host {} deleted", deleted.name),
        deleted_host: deleted,
    }))
}
