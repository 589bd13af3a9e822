use super::error::{json_response, ApiError};
use super::server::Server;
use crate::orchestration::metrics::{current_run_metrics, recent_steps, DEFAULT_RECENT_STEPS};
use crate::state_store::paths::{find_worker_db, list_worker_dbs};
use crate::state_store::query::query_select;
use crate::state_store::{kv_keys, StateStore, StateStoreError};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

fn store_error(server: &Server, err: StateStoreError) -> ApiError {
    match err {
        StateStoreError::RejectedQuery { reason } => ApiError::validation("body.sql", reason),
        other => {
            tracing::warn!(error = %other, "worker store access failed");
            ApiError::execution(server.redact(&other.to_string()))
        }
    }
}

fn open_worker(server: &Server, name: &str) -> Result<StateStore, ApiError> {
    let path = find_worker_db(&server.settings().workers_dir, name)
        .ok_or_else(|| ApiError::worker_not_found(name))?;
    StateStore::open_existing(&path).map_err(|err| store_error(server, err))
}

fn worker_summary(name: &str, store: &StateStore) -> Value {
    let mut summary = json!({
        "name": name,
        "db_path": store.db_path().display().to_string(),
    });
    match store.state_all() {
        Ok(kv) => {
            for key in [kv_keys::PHASE, kv_keys::RUN_ID, kv_keys::PID, kv_keys::UPDATED_AT] {
                summary[key] = kv.get(key).cloned().map(Value::String).unwrap_or(Value::Null);
            }
        }
        Err(err) => summary["error"] = Value::String(err.to_string()),
    }
    summary
}

fn status_body(name: &str, store: &StateStore) -> Result<Value, StateStoreError> {
    let kv = store.state_all()?;
    Ok(json!({
        "name": name,
        "phase": kv.get(kv_keys::PHASE),
        "run_id": kv.get(kv_keys::RUN_ID),
        "current_node": kv.get(kv_keys::CURRENT_NODE),
        "recent_steps": recent_steps(store, DEFAULT_RECENT_STEPS)?,
        "metrics": current_run_metrics(store)?,
    }))
}

/// Store access is synchronous rusqlite, so it runs on the blocking pool.
async fn with_store_access<F>(server: Arc<Server>, work: F) -> Response
where
    F: FnOnce(&Server) -> Result<Value, ApiError> + Send + 'static,
{
    let shared = Arc::clone(&server);
    match tokio::task::spawn_blocking(move || work(&shared)).await {
        Ok(Ok(body)) => json_response(StatusCode::OK, &body, server.settings().safe_json),
        Ok(Err(err)) => err.into_response(),
        Err(join) => ApiError::execution(server.redact(&join.to_string())).into_response(),
    }
}

pub async fn list_workers(State(server): State<Arc<Server>>) -> Response {
    with_store_access(server, |server| {
        let workers = list_worker_dbs(&server.settings().workers_dir)
            .into_iter()
            .map(|(name, path)| match StateStore::open_existing(&path) {
                Ok(store) => worker_summary(&name, &store),
                Err(err) => json!({
                    "name": name,
                    "db_path": path.display().to_string(),
                    "error": err.to_string(),
                }),
            })
            .collect::<Vec<_>>();
        Ok(json!({ "workers": workers }))
    })
    .await
}

pub async fn worker_status(
    State(server): State<Arc<Server>>,
    Path(name): Path<String>,
) -> Response {
    with_store_access(server, move |server| {
        let store = open_worker(server, &name)?;
        status_body(&name, &store).map_err(|err| store_error(server, err))
    })
    .await
}

pub async fn cancel_worker(
    State(server): State<Arc<Server>>,
    Path(name): Path<String>,
) -> Response {
    with_store_access(server, move |server| {
        let store = open_worker(server, &name)?;
        store
            .request_cancel()
            .map_err(|err| store_error(server, err))?;
        tracing::info!(worker = %name, "cancel requested");
        Ok(json!({ "name": name, "cancel_requested": true }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn query_worker(
    State(server): State<Arc<Server>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let request = match serde_json::from_slice::<QueryRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::validation("body.sql", format!("expected {{sql, limit?}}: {err}"))
                .into_response()
        }
    };
    with_store_access(server, move |server| {
        let store = open_worker(server, &name)?;
        let result = query_select(&store, &request.sql, request.limit)
            .map_err(|err| store_error(server, err))?;
        let mut body = serde_json::to_value(&result).unwrap_or(Value::Null);
        body["worker"] = Value::String(name);
        Ok(body)
    })
    .await
}
