use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use toolhub::config::ServerSettings;
use toolhub::gateway::{router, Server};
use toolhub::tools::HandlerTable;
use tower::ServiceExt;

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

fn post_config(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/config")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_config() -> Request<Body> {
    Request::builder()
        .uri("/config")
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn get_config_masks_secret_values() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join(".env"),
        "TOOLHUB_FIXTURE_SECRET=abcdefghijklmnopqrstuvwxyz\nTOOLHUB_FIXTURE_MODE=fast\n",
    )
    .expect("env");
    let server = Arc::new(Server::new(
        ServerSettings::for_root(temp.path()),
        HandlerTable::new(),
    ));

    let response = send(&server, get_config()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let secret = &body["vars"]["TOOLHUB_FIXTURE_SECRET"];
    assert_eq!(secret["is_secret"], true);
    assert_eq!(secret["present"], true);
    assert_eq!(secret["value"], "************");
    assert_eq!(secret["masked_value"], "************");
    assert!(!body.to_string().contains("abcdefghijklmnopqrstuvwxyz"));

    let mode = &body["vars"]["TOOLHUB_FIXTURE_MODE"];
    assert_eq!(mode["is_secret"], false);
    assert_eq!(mode["value"], "fast");
    assert!(body["vars"].get("API_TOKEN").is_some());
}

#[tokio::test]
async fn post_config_writes_env_file_and_gitignore() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(".env"), "# local settings\nTOOLHUB_FIXTURE_A=1\n").expect("env");
    let server = Arc::new(Server::new(
        ServerSettings::for_root(temp.path()),
        HandlerTable::new(),
    ));

    let response = send(
        &server,
        post_config(r#"{"TOOLHUB_FIXTURE_A": 2, "TOOLHUB_FIXTURE_PASSWORD": "hunter22"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["updated"], true);
    assert_eq!(
        body["keys"],
        json!(["TOOLHUB_FIXTURE_A", "TOOLHUB_FIXTURE_PASSWORD"])
    );
    assert!(body["env_file"].as_str().expect("env file").ends_with(".env"));
    assert_eq!(body["summary"]["vars"]["TOOLHUB_FIXTURE_A"]["value"], "2");
    assert_eq!(
        body["summary"]["vars"]["TOOLHUB_FIXTURE_PASSWORD"]["value"],
        "********"
    );

    let env = fs::read_to_string(temp.path().join(".env")).expect("read env");
    assert!(env.starts_with("# local settings\n"));
    assert!(env.contains("TOOLHUB_FIXTURE_A=2"));
    assert!(env.contains("TOOLHUB_FIXTURE_PASSWORD=hunter22"));
    let gitignore = fs::read_to_string(temp.path().join(".gitignore")).expect("gitignore");
    assert!(gitignore.lines().any(|line| line.trim() == ".env"));

    let body = json_body(send(&server, get_config()).await).await;
    assert_eq!(body["vars"]["TOOLHUB_FIXTURE_A"]["value"], "2");
}

#[tokio::test]
async fn post_config_rejects_bad_keys_and_nested_values() {
    let temp = tempfile::tempdir().expect("tempdir");
    let server = Arc::new(Server::new(
        ServerSettings::for_root(temp.path()),
        HandlerTable::new(),
    ));

    let response = send(&server, post_config(r#"{"BAD KEY": "x"}"#)).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["path"], "body.BAD KEY");

    let response = send(&server, post_config(r#"{"TOOLHUB_FIXTURE_B": [1]}"#)).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = send(
        &server,
        post_config(r#"{"TOOLHUB_FIXTURE_GREETING": "hello\nINJECTED=1"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["path"], "body.TOOLHUB_FIXTURE_GREETING");

    let response = send(&server, post_config("[]")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!temp.path().join(".env").exists());
}
