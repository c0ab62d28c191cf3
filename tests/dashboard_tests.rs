use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::RwLock;
use tower::ServiceExt;

use sshq::cluster::Cluster;
use sshq::dashboard::{build_router, ApiState};
use sshq::host::Host;
use sshq::remote::ShellRunner;
use sshq::scheduler::Queue;
use tempfile::TempDir;

fn api_state(dir: &TempDir) -> ApiState {
    let experiment = dir.path().to_str().unwrap();
    ApiState {
        queue: Arc::new(RwLock::new(Queue::open("api", Some(experiment)).unwrap())),
        cluster: Arc::new(RwLock::new(
            Cluster::open("api", Some(experiment)).unwrap(),
        )),
        runner: Arc::new(ShellRunner::new()),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn jobs_start_empty() {
    let dir = TempDir::new().unwrap();
    let app = build_router(api_state(&dir));

    let response = app
        .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn add_then_get_job() {
    let dir = TempDir::new().unwrap();
    let app = build_router(api_state(&dir));

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"name": "job0", "command": "uname -a"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/jobs/job0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["name"], "job0");
    assert_eq!(job["command"], "uname -a");
    assert_eq!(job["status"], "undefined");
}

#[tokio::test]
async fn invalid_job_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = build_router(api_state(&dir));

    // host without user cannot be ssh'd to
    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"name": "job0", "command": "uname", "host": "red01"})
                .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_job_is_404() {
    let dir = TempDir::new().unwrap();
    let app = build_router(api_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/jobs/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_job_removes_it() {
    let dir = TempDir::new().unwrap();
    let state = api_state(&dir);
    let app = build_router(state.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"name": "job0", "command": "uname"}).to_string(),
        ))
        .unwrap();
    app.clone().oneshot(request).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/jobs/job0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!state.queue.read().await.contains("job0"));
}

#[tokio::test]
async fn busy_host_delete_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let state = api_state(&dir);
    let mut host = Host::new("red01", "pi");
    host.job_counter = 1;
    state.cluster.write().await.add(host).unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/hosts/red01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn add_and_list_hosts() {
    let dir = TempDir::new().unwrap();
    let app = build_router(api_state(&dir));

    let request = Request::builder()
        .method("POST")
        .uri("/hosts")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"name": "red01", "user": "pi", "max_jobs_allowed": 4})
                .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/hosts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let hosts = body_json(response).await;
    assert_eq!(hosts[0]["name"], "red01");
    assert_eq!(hosts[0]["max_jobs_allowed"], 4);
}
