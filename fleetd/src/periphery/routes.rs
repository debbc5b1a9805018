//! Periphery agent routes, run against the local host

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use periphery_api::{
    BuildSpec, ContainerSpec, ContainerStatus, DeployQuery, DockerStat, ExecutionResult, Log,
    LogQuery, Network, NetworkCreate, RenameRepo, RepoSpec, StatusResponse, SystemStats,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::errors::CoreError;
use crate::exec::LocalHost;
use crate::utils::version_info;

/// State shared by the periphery handlers
pub struct PeripheryState {
    pub local: Arc<LocalHost>,
    /// Accepted passkeys, everything is accepted when empty
    pub passkeys: Vec<String>,
}

impl PeripheryState {
    pub fn new(local: Arc<LocalHost>, passkeys: Vec<String>) -> Self {
        Self { local, passkeys }
    }

    fn accepts(&self, passkey: Option<&str>) -> bool {
        if self.passkeys.is_empty() {
            return true;
        }
        match passkey {
            Some(passkey) => self.passkeys.iter().any(|k| k == passkey),
            None => false,
        }
    }
}

/// Failure of a query route
pub struct RouteError(CoreError);

impl From<CoreError> for RouteError {
    fn from(err: CoreError) -> Self {
        RouteError(err)
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!("Periphery request failed: {}", self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type RouteResult<T> = Result<Json<T>, RouteError>;

pub fn router(state: Arc<PeripheryState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        // Containers
        .route("/containers", get(list_containers_handler))
        .route("/container/{name}", get(container_status_handler))
        .route("/container/log/{name}", get(container_log_handler))
        .route("/container/start/{name}", get(start_container_handler))
        .route("/container/stop/{name}", get(stop_container_handler))
        .route("/container/delete/{name}", get(delete_container_handler))
        .route("/deploy", post(deploy_handler))
        // Repos
        .route("/repo/clone", post(clone_repo_handler))
        .route("/repo/pull", post(pull_repo_handler))
        .route("/repo/rename", post(rename_repo_handler))
        .route("/repo/delete/{name}", get(delete_repo_handler))
        // Builds
        .route("/build", post(build_handler))
        .route("/build/cancel/{name}", get(cancel_build_handler))
        // Networks
        .route("/networks", get(list_networks_handler))
        .route("/network/create", post(create_network_handler))
        .route("/network/delete/{name}", get(delete_network_handler))
        // Pruning
        .route("/images/prune", get(prune_images_handler))
        .route("/networks/prune", get(prune_networks_handler))
        .route("/containers/prune", get(prune_containers_handler))
        // Stats
        .route("/stats", get(docker_stats_handler))
        .route("/stats/system", get(system_stats_handler))
        // State and middleware
        .layer(middleware::from_fn_with_state(state.clone(), require_passkey))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn require_passkey(
    State(state): State<Arc<PeripheryState>>,
    request: Request,
    next: Next,
) -> Response {
    let passkey = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if state.accepts(passkey) {
        next.run(request).await
    } else {
        debug!("Rejecting {} with invalid passkey", request.uri().path());
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: version_info().version,
    })
}

// ================================ CONTAINERS ================================== //

async fn list_containers_handler(State(state): State<Arc<PeripheryState>>) -> RouteResult<Vec<ContainerStatus>> {
    Ok(Json(state.local.list_containers().await?))
}

async fn container_status_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
) -> RouteResult<Option<ContainerStatus>> {
    Ok(Json(state.local.container_status(&name).await?))
}

async fn container_log_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> RouteResult<Log> {
    Ok(Json(state.local.container_log(&name, query.tail).await?))
}

async fn start_container_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
) -> Json<ExecutionResult> {
    Json(state.local.start_container(&name).await)
}

async fn stop_container_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
) -> Json<ExecutionResult> {
    Json(state.local.stop_container(&name).await)
}

async fn delete_container_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
) -> Json<ExecutionResult> {
    Json(state.local.delete_container(&name).await)
}

async fn deploy_handler(
    State(state): State<Arc<PeripheryState>>,
    Query(query): Query<DeployQuery>,
    Json(mut spec): Json<ContainerSpec>,
) -> Json<ExecutionResult> {
    if let Some(image) = query.image.filter(|image| !image.is_empty()) {
        spec.image = image;
    }
    Json(state.local.run_container(&spec).await)
}

// ================================== REPOS ===================================== //

async fn clone_repo_handler(
    State(state): State<Arc<PeripheryState>>,
    Json(spec): Json<RepoSpec>,
) -> Json<ExecutionResult> {
    Json(state.local.clone_repo(&spec).await)
}

async fn pull_repo_handler(
    State(state): State<Arc<PeripheryState>>,
    Json(spec): Json<RepoSpec>,
) -> Json<ExecutionResult> {
    Json(state.local.pull_repo(&spec).await)
}

async fn rename_repo_handler(
    State(state): State<Arc<PeripheryState>>,
    Json(rename): Json<RenameRepo>,
) -> Json<ExecutionResult> {
    Json(state.local.rename_repo(&rename).await)
}

async fn delete_repo_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
) -> Json<ExecutionResult> {
    Json(state.local.delete_repo(&name).await)
}

// ================================== BUILDS ==================================== //

async fn build_handler(
    State(state): State<Arc<PeripheryState>>,
    Json(spec): Json<BuildSpec>,
) -> Json<ExecutionResult> {
    Json(state.local.build_image(&spec).await)
}

async fn cancel_build_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
) -> Json<ExecutionResult> {
    Json(state.local.cancel_build(&name).await)
}

// ================================= NETWORKS =================================== //

async fn list_networks_handler(State(state): State<Arc<PeripheryState>>) -> RouteResult<Vec<Network>> {
    Ok(Json(state.local.list_networks().await?))
}

async fn create_network_handler(
    State(state): State<Arc<PeripheryState>>,
    Json(network): Json<NetworkCreate>,
) -> Json<ExecutionResult> {
    Json(state.local.create_network(&network).await)
}

async fn delete_network_handler(
    State(state): State<Arc<PeripheryState>>,
    Path(name): Path<String>,
) -> Json<ExecutionResult> {
    Json(state.local.delete_network(&name).await)
}

// ================================== PRUNING =================================== //

async fn prune_images_handler(State(state): State<Arc<PeripheryState>>) -> Json<ExecutionResult> {
    Json(state.local.prune_images().await)
}

async fn prune_networks_handler(State(state): State<Arc<PeripheryState>>) -> Json<ExecutionResult> {
    Json(state.local.prune_networks().await)
}

async fn prune_containers_handler(State(state): State<Arc<PeripheryState>>) -> Json<ExecutionResult> {
    Json(state.local.prune_containers().await)
}

// =================================== STATS ==================================== //

async fn docker_stats_handler(State(state): State<Arc<PeripheryState>>) -> RouteResult<Vec<DockerStat>> {
    Ok(Json(state.local.docker_stats().await?))
}

async fn system_stats_handler(State(state): State<Arc<PeripheryState>>) -> RouteResult<SystemStats> {
    Ok(Json(state.local.system_stats().await?))
}
