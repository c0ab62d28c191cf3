//! REST façade over a queue and a cluster.
//!
//! A thin translation layer: every endpoint maps one-to-one onto a
//! [`Queue`]/[`Cluster`] operation. Scheduling itself stays in the CLI;
//! the API only adds, inspects, kills and deletes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::cluster::Cluster;
use crate::error::Result;
use crate::host::Host;
use crate::remote::ShellRunner;
use crate::scheduler::{Job, JobSpec, Queue};

#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<RwLock<Queue>>,
    pub cluster: Arc<RwLock<Cluster>>,
    pub runner: Arc<ShellRunner>,
}

#[derive(Deserialize)]
struct JobRequest {
    name: String,
    command: String,
    host: Option<String>,
    user: Option<String>,
    shell: Option<String>,
    gpu: Option<String>,
    pyenv: Option<String>,
    directory: Option<String>,
}

#[derive(Deserialize)]
struct HostRequest {
    name: String,
    user: String,
    ip: Option<String>,
    max_jobs_allowed: Option<u32>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/jobs", get(list_jobs).post(add_job))
        .route("/jobs/{name}", get(get_job).delete(delete_job))
        .route("/jobs/{name}/kill", post(kill_job))
        .route("/hosts", get(list_hosts).post(add_host))
        .route("/hosts/{name}", get(get_host).delete(delete_host))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the token is cancelled.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn list_jobs(State(state): State<ApiState>) -> Json<Vec<Job>> {
    Json(state.queue.read().await.all())
}

async fn get_job(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.queue.read().await.get(&name) {
        Ok(job) => Json(job).into_response(),
        Err(error) => error_response(StatusCode::NOT_FOUND, error).into_response(),
    }
}

async fn add_job(
    State(state): State<ApiState>,
    Json(request): Json<JobRequest>,
) -> impl IntoResponse {
    let mut queue = state.queue.write().await;
    let spec = JobSpec {
        name: request.name,
        command: Some(request.command),
        host: request.host,
        user: request.user,
        shell: request.shell,
        gpu: request.gpu,
        pyenv: request.pyenv,
        directory: request.directory,
        experiment: Some(queue.experiment.clone()),
        ..Default::default()
    };
    let job = match Job::from_spec(spec) {
        Ok(job) => job,
        Err(error) => return error_response(StatusCode::BAD_REQUEST, error).into_response(),
    };
    match queue.add(job.clone()) {
        Ok(()) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(error) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error).into_response()
        }
    }
}

async fn delete_job(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let mut queue = state.queue.write().await;
    match queue.delete(&name, &*state.runner).await {
        Ok(job) => Json(job).into_response(),
        Err(error) => error_response(StatusCode::NOT_FOUND, error).into_response(),
    }
}

async fn kill_job(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let mut queue = state.queue.write().await;
    match queue.kill(&name, &*state.runner).await {
        Ok(job) => Json(job).into_response(),
        Err(error) => error_response(StatusCode::NOT_FOUND, error).into_response(),
    }
}

async fn list_hosts(State(state): State<ApiState>) -> Json<Vec<Host>> {
    Json(state.cluster.read().await.all())
}

async fn get_host(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.cluster.read().await.get(&name) {
        Ok(host) => Json(host).into_response(),
        Err(error) => error_response(StatusCode::NOT_FOUND, error).into_response(),
    }
}

async fn add_host(
    State(state): State<ApiState>,
    Json(request): Json<HostRequest>,
) -> impl IntoResponse {
    let mut host = Host::new(&request.name, &request.user);
    host.ip = request.ip;
    if let Some(max_jobs) = request.max_jobs_allowed {
        host = host.with_max_jobs(max_jobs);
    }
    let mut cluster = state.cluster.write().await;
    match cluster.add(host.clone()) {
        Ok(()) => (StatusCode::CREATED, Json(host)).into_response(),
        Err(error) => error_response(StatusCode::BAD_REQUEST, error).into_response(),
    }
}

async fn delete_host(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let mut cluster = state.cluster.write().await;
    match cluster.delete(&name) {
        Ok(host) => Json(host).into_response(),
        Err(error) => error_response(StatusCode::CONFLICT, error).into_response(),
    }
}
