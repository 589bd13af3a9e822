use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use toolhub::config::ServerSettings;
use toolhub::gateway::{router, Server};
use toolhub::safe_json::SafeJsonOptions;
use toolhub::tools::{HandlerTable, Payload, ReloadReason, ToolFailure, ToolOutput};
use tower::ServiceExt;

fn write_spec(tools_dir: &Path, name: &str, description: &str) {
    fs::create_dir_all(tools_dir).expect("tools dir");
    let spec = json!({
        "name": name,
        "category": "utilities",
        "description": description,
        "parameters": {"type": "object", "properties": {}, "required": []}
    });
    fs::write(tools_dir.join(format!("{name}.json")), spec.to_string()).expect("write spec");
}

fn handlers() -> HandlerTable {
    HandlerTable::with_builtins()
        .with_fn("alpha", |_| Ok(ToolOutput::Value(Payload::from("a"))))
        .with_fn("zeta", |_| Ok(ToolOutput::Value(Payload::from("z"))))
        .with_fn("floats", |_| {
            Ok(ToolOutput::Value(Payload::map([
                ("a", Payload::Float(f64::NAN)),
                ("b", Payload::Float(f64::INFINITY)),
                ("c", Payload::Float(f64::NEG_INFINITY)),
                ("d", Payload::Int(123)),
            ])))
        })
        .with_fn("bigint", |_| {
            Ok(ToolOutput::Value(Payload::big_int("100000000000000000000")))
        })
        .with_fn("chunks", |_| {
            Ok(ToolOutput::stream(vec![
                Ok(Payload::map([("a", Payload::Int(1))])),
                Ok(Payload::map([("a", Payload::Int(2))])),
                Err(ToolFailure::Execution("oops".to_string())),
            ]))
        })
        .with_fn("needs_x", |_| Ok(ToolOutput::Value(Payload::from("x"))))
        .with_fn("picky", |_| {
            Err(ToolFailure::InvalidParameters(
                "unexpected keyword argument 'colour'".to_string(),
            ))
        })
        .with_fn("slow", |_| {
            std::thread::sleep(Duration::from_secs(2));
            Ok(ToolOutput::Value(Payload::Null))
        })
        .with_fn("broken", |_| {
            Err(ToolFailure::Execution(
                "upstream rejected token sk-live-abcdef123456".to_string(),
            ))
        })
}

fn server(root: &Path, configure: impl FnOnce(&mut ServerSettings)) -> Arc<Server> {
    let mut settings = ServerSettings::for_root(root);
    configure(&mut settings);
    Arc::new(Server::new(settings, handlers()))
}

async fn send(server: &Arc<Server>, request: Request<Body>) -> Response {
    router(Arc::clone(server))
        .oneshot(request)
        .await
        .expect("response")
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn execute(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/execute")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn etag_of(response: &Response) -> String {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .expect("etag")
        .to_string()
}

#[tokio::test]
async fn empty_registry_serves_sha1_of_empty_array_and_404s_execute() {
    let temp = tempfile::tempdir().expect("tempdir");
    let server = server(temp.path(), |_| {});

    let response = send(&server, get("/tools")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(etag_of(&response), "\"97d170e1550eee4afc0af065b78cda302a97674c\"");
    assert_eq!(response.headers()["x-tool-count"], "0");
    assert_eq!(body_text(response).await, "[]");

    let response = send(&server, execute(json!({"tool": "anything", "params": {}}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["detail"], "Tool 'anything' not found");
}

#[tokio::test]
async fn catalog_is_sorted_cached_by_etag_and_rebuilt_on_change() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tools_dir = temp.path().join("tools");
    write_spec(&tools_dir, "zeta", "last");
    write_spec(&tools_dir, "alpha", "first");
    let server = server(temp.path(), |_| {});

    let response = send(&server, get("/tools")).await;
    let etag = etag_of(&response);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    let catalog: Value = serde_json::from_str(&body_text(response).await).expect("json");
    let names = catalog
        .as_array()
        .expect("array")
        .iter()
        .map(|entry| entry["name"].as_str().expect("name").to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["alpha", "zeta"]);
    assert_eq!(catalog[0]["id"], 10_000);
    assert!(catalog[0].get("invoker").is_none());

    let cached = Request::builder()
        .uri("/tools")
        .header(header::IF_NONE_MATCH, etag.as_str())
        .body(Body::empty())
        .expect("request");
    assert_eq!(send(&server, cached).await.status(), StatusCode::NOT_MODIFIED);

    write_spec(&tools_dir, "alpha", "first, revised");
    fs::File::options()
        .write(true)
        .open(tools_dir.join("alpha.json"))
        .expect("open")
        .set_modified(SystemTime::now() + Duration::from_secs(30))
        .expect("touch");
    let response = send(&server, get("/tools")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(etag_of(&response), etag);
}

#[tokio::test]
async fn head_reports_headers_without_body() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "alpha", "first");
    let server = server(temp.path(), |_| {});

    let request = Request::builder()
        .method(Method::HEAD)
        .uri("/tools")
        .body(Body::empty())
        .expect("request");
    let response = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-tool-count"], "1");
    assert!(response.headers().contains_key(header::ETAG));
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn explicit_reload_reports_counts_errors_and_optional_listing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tools_dir = temp.path().join("tools");
    write_spec(&tools_dir, "alpha", "first");
    fs::write(
        tools_dir.join("orphan.json"),
        json!({"name": "orphan", "category": "utilities"}).to_string(),
    )
    .expect("orphan");
    let server = server(temp.path(), |_| {});

    let body: Value =
        serde_json::from_str(&body_text(send(&server, get("/tools?reload=1")).await).await)
            .expect("json");
    assert_eq!(body["reloaded"], true);
    assert_eq!(body["count"], 1);
    assert_eq!(body["errors"][0]["candidate"], "orphan");
    assert!(body.get("tools").is_none());

    let body: Value =
        serde_json::from_str(&body_text(send(&server, get("/tools?reload=1&list=1")).await).await)
            .expect("json");
    assert_eq!(body["tools"][0]["name"], "alpha");
}

#[tokio::test]
async fn non_finite_floats_are_sanitised_in_results() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "floats", "floats");
    let server = server(temp.path(), |_| {});

    let response = send(&server, execute(json!({"tool": "floats", "params": {}}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"result":{"a":"NaN","b":"Infinity","c":"-Infinity","d":123}}"#
    );
}

#[tokio::test]
async fn big_integers_follow_the_configured_threshold() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "bigint", "big");

    let strict = server(temp.path(), |settings| {
        settings.safe_json = SafeJsonOptions {
            big_int_digits: 10,
            big_as_string: true,
        };
    });
    let body = body_text(send(&strict, execute(json!({"tool": "bigint"}))).await).await;
    assert_eq!(body, r#"{"result":"100000000000000000000"}"#);

    let relaxed = server(temp.path(), |settings| {
        settings.safe_json = SafeJsonOptions {
            big_int_digits: 30,
            big_as_string: true,
        };
    });
    let body = body_text(send(&relaxed, execute(json!({"tool": "bigint"}))).await).await;
    assert_eq!(body, r#"{"result":100000000000000000000}"#);
}

#[tokio::test]
async fn streamed_chunks_end_with_a_terminal_error_frame() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "chunks", "stream");
    let server = server(temp.path(), |_| {});

    let response = send(&server, execute(json!({"tool": "chunks", "params": {}}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE]
        .to_str()
        .expect("content type")
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(response.headers()["x-accel-buffering"], "no");
    let body = body_text(response).await;
    assert_eq!(
        body,
        concat!(
            "data: {\"a\":1}\n\n",
            "data: {\"a\":2}\n\n",
            "data: {\"chunk_type\":\"error\",\"error\":{\"message\":\"oops\"},\"terminal\":true}\n\n",
        )
    );
}

#[tokio::test]
async fn slow_tools_hit_the_execute_deadline() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "slow", "sleeps");
    let server = server(temp.path(), |settings| {
        settings.execute_timeout = Duration::from_secs(1);
    });

    let response = send(&server, execute(json!({"tool": "slow", "params": {}}))).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["detail"], "Tool execution timed out");
}

#[tokio::test]
async fn execution_errors_are_redacted_and_validation_reports_paths() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "broken", "fails");
    fs::write(temp.path().join(".env"), "SERVICE_TOKEN=sk-live-abcdef123456\n").expect("env");
    let server = server(temp.path(), |_| {});

    let response = send(&server, execute(json!({"tool": "broken", "params": {}}))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(!body.contains("sk-live-abcdef123456"));
    assert!(body.contains("[REDACTED]"));

    let response = send(&server, execute(json!({"tool": "broken", "params": [1]}))).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["path"], "body.params");
    assert_eq!(body["error"], "Validation");
}

#[tokio::test]
async fn debug_echoes_and_health_counts_tools() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "alpha", "first");
    let server = server(temp.path(), |_| {});

    let request = Request::builder()
        .method(Method::POST)
        .uri("/debug")
        .body(Body::from("{\"x\": [1, 2]}"))
        .expect("request");
    let body: Value = serde_json::from_str(&body_text(send(&server, request).await).await)
        .expect("json");
    assert_eq!(body["received"], json!({"x": [1, 2]}));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/debug")
        .body(Body::from("not json"))
        .expect("request");
    let response = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert!(body["error"].is_string());

    let body: Value =
        serde_json::from_str(&body_text(send(&server, get("/health")).await).await)
            .expect("json");
    assert_eq!(body, json!({"status": "ok", "tools": 1}));
}

#[tokio::test]
async fn argument_mismatches_are_bad_requests() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tools = temp.path().join("tools");
    fs::create_dir_all(&tools).expect("tools dir");
    let spec = json!({
        "name": "needs_x",
        "category": "utilities",
        "description": "requires x",
        "parameters": {
            "type": "object",
            "properties": {"x": {"type": "integer"}},
            "required": ["x"]
        }
    });
    fs::write(tools.join("needs_x.json"), spec.to_string()).expect("write spec");
    write_spec(&tools, "picky", "rejects its arguments");
    let server = server(temp.path(), |_| {});

    let response = send(&server, execute(json!({"tool": "needs_x", "params": {}}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["error"], "InvalidParameters");
    assert!(body["detail"].as_str().expect("detail").contains('x'));

    let response = send(&server, execute(json!({"tool": "needs_x", "params": {"x": 1}}))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&server, execute(json!({"tool": "picky", "params": {"colour": 1}}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["error"], "InvalidParameters");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registry_refreshes_run_on_the_blocking_pool() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_spec(&temp.path().join("tools"), "alpha", "first");
    let server = server(temp.path(), |_| {});

    assert_eq!(server.refresh_off_runtime(false).await, None);
    assert_eq!(
        server.refresh_off_runtime(true).await,
        Some(ReloadReason::Explicit)
    );

    let (reload, plain) = tokio::join!(
        send(&server, get("/tools?reload=1")),
        send(&server, get("/tools")),
    );
    assert_eq!(reload.status(), StatusCode::OK);
    assert_eq!(plain.status(), StatusCode::OK);
    assert_eq!(etag_of(&reload), etag_of(&plain));
    assert_eq!(plain.headers()["x-tool-count"], "1");
}
