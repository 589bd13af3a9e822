use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use toolhub::config::ServerSettings;
use toolhub::gateway::{router, Server};
use toolhub::state_store::{kv_keys, worker_db_path, StateStore, StepRecord, StepStatus};
use toolhub::tools::HandlerTable;
use tower::ServiceExt;

fn seed_worker(workers_dir: &Path, name: &str, steps: usize) -> StateStore {
    let store = StateStore::open(&worker_db_path(workers_dir, name)).expect("open store");
    store.state_set(kv_keys::PHASE, "running").expect("phase");
    store.state_set(kv_keys::RUN_ID, "run-1").expect("run id");
    store
        .state_set(kv_keys::CURRENT_NODE, "SCORE::RUN")
        .expect("node");
    for index in 0..steps {
        store
            .insert_step(&StepRecord {
                worker: name.to_string(),
                run_id: None,
                node: format!("SCORE::N{index}"),
                status: StepStatus::Ok,
                duration_ms: 10,
                details: json!({"call": {"kind": "tool", "name": "echo"}}),
                started_at: format!("2026-01-01T00:00:{index:02}Z"),
            })
            .expect("step");
    }
    store
}

fn server(root: &Path) -> Arc<Server> {
    Arc::new(Server::new(
        ServerSettings::for_root(root),
        HandlerTable::new(),
    ))
}

async fn send(server: &Arc<Server>, request: Request<Body>) -> Response {
    router(Arc::clone(server))
        .oneshot(request)
        .await
        .expect("response")
}

async fn json_body(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn list_and_status_report_worker_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workers_dir = temp.path().join("workers");
    seed_worker(&workers_dir, "curator", 3);
    seed_worker(&workers_dir, "archivist", 0);
    let server = server(temp.path());

    let body = json_body(send(&server, get("/workers")).await).await;
    let names = body["workers"]
        .as_array()
        .expect("workers")
        .iter()
        .map(|worker| worker["name"].as_str().expect("name").to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["archivist", "curator"]);
    assert_eq!(body["workers"][1]["phase"], "running");

    let response = send(&server, get("/workers/Curator/realtime/status")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["current_node"], "SCORE::RUN");
    assert_eq!(body["run_id"], "run-1");
    let recent = body["recent_steps"].as_array().expect("recent");
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0]["node"], "SCORE::N2");
    assert_eq!(recent[0]["run_id"], "run-1");
    assert_eq!(recent[0]["call_kind"], "tool");
}

#[tokio::test]
async fn unknown_workers_are_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let server = server(temp.path());

    let response = send(&server, get("/workers/ghost/realtime/status")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "Worker 'ghost' not found");

    let response = send(
        &server,
        post("/workers/ghost/tool/query", json!({"sql": "SELECT 1"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_sets_the_store_flag() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = seed_worker(&temp.path().join("workers"), "curator", 0);
    let server = server(temp.path());

    let response = send(&server, post("/workers/curator/realtime/cancel", json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"name": "curator", "cancel_requested": true})
    );
    assert!(store.cancel_requested().expect("flag"));
}

#[tokio::test]
async fn query_runs_selects_with_clamped_limits() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_worker(&temp.path().join("workers"), "curator", 5);
    let server = server(temp.path());

    let response = send(
        &server,
        post(
            "/workers/curator/tool/query",
            json!({"sql": "SELECT node, status FROM job_steps ORDER BY id;", "limit": 2}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["limit"], 2);
    assert_eq!(body["worker"], "curator");
    assert_eq!(body["summary"]["row_count"], 2);
    assert_eq!(body["summary"]["truncated"], true);
    assert_eq!(body["summary"]["columns"], json!(["node", "status"]));
    assert_eq!(body["rows"][0], json!({"node": "SCORE::N0", "status": "ok"}));

    let body = json_body(
        send(
            &server,
            post(
                "/workers/curator/tool/query",
                json!({"sql": "SELECT id FROM job_steps", "limit": 5000}),
            ),
        )
        .await,
    )
    .await;
    assert_eq!(body["limit"], 100);
    assert_eq!(body["summary"]["truncated"], false);

    for sql in ["DELETE FROM job_steps", "SELECT 1; DROP TABLE job_steps"] {
        let response = send(
            &server,
            post("/workers/curator/tool/query", json!({"sql": sql})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{sql}");
        assert_eq!(json_body(response).await["path"], "body.sql");
    }
}
