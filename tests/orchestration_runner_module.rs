use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use toolhub::orchestration::{
    current_run_metrics, CancelFlag, CycleRunner, CycleState, Directive, EffectKind, Environment,
    ExecutionSafetyLimits, FnStep, Node, OrchestratorError, Process, ProcessGraph, SubGraph,
    SubGraphCatalog, SubGraphRef, Worker,
};
use toolhub::safe_json::SafeJsonOptions;
use toolhub::shared::ids::WorkerName;
use toolhub::state_store::{worker_db_path, RunPhase, StateStore};
use toolhub::tools::{HandlerTable, Payload, Registry, ToolEntry, ToolOutput, ToolSpec};

fn single_part(subgraph: SubGraph) -> ProcessGraph {
    let process = Process {
        name: "fixture".to_string(),
        entry: "MAIN".to_string(),
        parts: vec![SubGraphRef {
            name: "MAIN".to_string(),
            module: "main".to_string(),
            next_map: BTreeMap::new(),
        }],
        metadata: Map::new(),
    };
    let mut subgraphs = BTreeMap::new();
    subgraphs.insert("MAIN".to_string(), subgraph);
    ProcessGraph::new(process, subgraphs).expect("graph")
}

fn run(graph: &ProcessGraph, store: &StateStore, tools: &Registry) -> toolhub::orchestration::RunOutcome {
    CycleRunner {
        worker: "fixture",
        store,
        graph,
        tools,
        cancel: &CancelFlag::new(),
        limits: ExecutionSafetyLimits::default(),
        safe_json: SafeJsonOptions::default(),
    }
    .run(Map::new())
    .expect("run")
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn open_store(dir: &Path, name: &str) -> StateStore {
    StateStore::open(&worker_db_path(dir, name)).expect("store")
}

fn assert_single_invariant_row(store: &StateStore, run_id: &str) {
    let rows = store.steps_for_run(run_id).expect("steps");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "error");
    assert_eq!(rows[0].details["error"]["kind"], "invariant");
    let message = rows[0].details["error"]["message"]
        .as_str()
        .expect("message");
    assert!(message.contains("exactly one effect"), "{message}");
}

#[test]
fn step_with_two_effects_fails_with_one_audit_row() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path(), "twice");
    let step = FnStep::new(|env: &mut Environment<'_>, _state: &CycleState| {
        env.transform("set_value", params(json!({"value": 1})))?;
        env.transform("set_value", params(json!({"value": 2})))?;
        Ok(Directive::exit("done"))
    });
    let graph = single_part(
        SubGraph::new("main", "A")
            .with_node("A", Node::step(step))
            .with_exit("done"),
    );

    let outcome = run(&graph, &store, &Registry::empty());
    assert_eq!(outcome.status, RunPhase::Failed);
    assert_single_invariant_row(&store, &outcome.run_id);
    assert_eq!(store.crash_count().expect("crashes"), 1);
    let run = store.run(&outcome.run_id).expect("run").expect("audit row");
    assert_eq!(run.phase.as_deref(), Some("failed"));
}

#[test]
fn step_without_effects_fails_with_one_audit_row() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path(), "idle");
    let step = FnStep::new(|_env: &mut Environment<'_>, _state: &CycleState| {
        Ok(Directive::exit("done"))
    });
    let graph = single_part(
        SubGraph::new("main", "A")
            .with_node("A", Node::step(step))
            .with_exit("done"),
    );

    let outcome = run(&graph, &store, &Registry::empty());
    assert_eq!(outcome.status, RunPhase::Failed);
    assert_single_invariant_row(&store, &outcome.run_id);
}

const SCORE_YAML: &str = r#"
name: SCORE
entry: INIT
exits: { done: DONE, retry_exhausted: RETRY_EXHAUSTED }
nodes:
  INIT:
    kind: step
    call: { transform: set_value, params: { value: 0 } }
    save_as: attempts
    next: RUN
  RUN:
    kind: step
    call: { transform: arithmetic, params: { op: add, a: "$.attempts", b: 1 } }
    save_as: attempts
    next: CHECK
  CHECK:
    kind: cond
    rules:
      - when: { path: attempts, op: gt, value: "$.config.max_retries" }
        exit: retry_exhausted
    default: { next: RUN }
"#;

#[test]
fn retry_loop_from_yaml_exhausts_after_max_retries() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("score.yaml"), SCORE_YAML).expect("subgraph");
    fs::write(
        temp.path().join("process.yaml"),
        "name: scoring\nentry: SCORE\nmetadata: { required_config: [] }\nparts:\n  - name: SCORE\n    module: score\n    next: { retry_exhausted: END, done: END }\n",
    )
    .expect("process");
    let graph = ProcessGraph::load(&temp.path().join("process.yaml"), &SubGraphCatalog::new())
        .expect("load");

    let store = open_store(&temp.path().join("workers"), "scorer");
    let worker = Worker::new(
        WorkerName::parse("scorer").expect("name"),
        store.clone(),
        Arc::new(graph),
    )
    .with_env(Arc::new(|_key: &str| None));

    let outcome = worker.run_cycle().expect("cycle");
    assert_eq!(outcome.status, RunPhase::Completed);
    assert_eq!(outcome.exit_label.as_deref(), Some("retry_exhausted"));
    let rows = store.steps_for_run(&outcome.run_id).expect("steps");
    let nodes = rows.iter().map(|row| row.node.as_str()).collect::<Vec<_>>();
    assert_eq!(
        nodes,
        vec!["SCORE::INIT", "SCORE::RUN", "SCORE::RUN", "SCORE::RUN"]
    );
    assert_eq!(rows[3].details["last_result_preview"], "3");

    let metrics = current_run_metrics(&store).expect("metrics").expect("run");
    assert_eq!(metrics.steps_executed, 4);
    assert_eq!(metrics.retries, 2);
}

#[test]
fn worker_refuses_to_run_without_required_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = single_part(
        SubGraph::new("main", "A")
            .with_node(
                "A",
                Node::step(
                    FnStep::new(|env: &mut Environment<'_>, state: &CycleState| {
                        let model = state.get("config.model").cloned().unwrap_or(Value::Null);
                        env.transform("set_value", params(json!({ "value": model })))?;
                        Ok(Directive::exit("done"))
                    })
                    .with_kind(EffectKind::Transform)
                    .with_save_as("model"),
                ),
            )
            .with_exit("done"),
    );
    let store = open_store(temp.path(), "configured");
    let worker = Worker::new(
        WorkerName::parse("configured").expect("name"),
        store.clone(),
        Arc::new(graph),
    );

    let missing = worker
        .with_env(Arc::new(|_key: &str| None))
        .run_cycle()
        .expect_err("missing config");
    assert!(matches!(missing, OrchestratorError::MissingConfig { ref key } if key == "api_base"));
    assert!(store.latest_run().expect("latest").is_none());

    store.meta_set("model", "from-meta").expect("meta");
    let graph = Arc::new(single_part(
        SubGraph::new("main", "A")
            .with_node(
                "A",
                Node::step(
                    FnStep::new(|env: &mut Environment<'_>, state: &CycleState| {
                        let model = state.get("config.model").cloned().unwrap_or(Value::Null);
                        env.transform("set_value", params(json!({ "value": model })))?;
                        Ok(Directive::exit("done"))
                    })
                    .with_kind(EffectKind::Transform),
                ),
            )
            .with_exit("done"),
    ));
    let worker = Worker::new(WorkerName::parse("configured").expect("name"), store.clone(), graph)
        .with_env(Arc::new(|key: &str| match key {
            "API_BASE" => Some("http://localhost".to_string()),
            "API_TOKEN" => Some("tok".to_string()),
            "MODEL" => Some("from-env".to_string()),
            _ => None,
        }));
    let outcome = worker.run_cycle().expect("cycle");
    assert_eq!(outcome.status, RunPhase::Completed);
    let rows = store.steps_for_run(&outcome.run_id).expect("steps");
    assert_eq!(rows[0].details["last_result_preview"], "from-meta");
}

fn slow_registry() -> Registry {
    let handlers = HandlerTable::new().with_fn("slow", |_| {
        std::thread::sleep(Duration::from_millis(500));
        Ok(ToolOutput::Value(Payload::Null))
    });
    let spec: ToolSpec = serde_json::from_value(json!({
        "name": "slow",
        "category": "utilities",
        "description": "sleeps"
    }))
    .expect("spec");
    let entry = ToolEntry::new(10_000, spec, "{}".to_string(), handlers.get("slow").expect("slow"));
    Registry::from_entries(vec![entry], Vec::new(), SafeJsonOptions::default())
}

#[test]
fn timed_out_step_takes_the_mapped_retry_exit() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("fetch.yaml"),
        "name: FETCH\nentry: CALL\nexits: { done: DONE, retry: RETRY }\nnodes:\n  CALL:\n    kind: step\n    call: { tool: slow }\n    timeout_ms: 50\n    exit: done\n",
    )
    .expect("fetch");
    fs::write(
        temp.path().join("fallback.yaml"),
        "name: FALLBACK\nentry: NOTE\nexits: { done: DONE }\nnodes:\n  NOTE:\n    kind: step\n    call: { transform: set_value, params: { value: fallback } }\n    exit: done\n",
    )
    .expect("fallback");
    fs::write(
        temp.path().join("process.yaml"),
        "name: fetching\nentry: FETCH\nparts:\n  - name: FETCH\n    module: fetch.yaml\n    next: { done: END, retry: FALLBACK }\n  - name: FALLBACK\n    module: fallback\n    next: { done: END }\n",
    )
    .expect("process");
    let graph = ProcessGraph::load(&temp.path().join("process.yaml"), &SubGraphCatalog::new())
        .expect("load");
    let store = open_store(temp.path(), "fetcher");

    let outcome = run(&graph, &store, &slow_registry());
    assert_eq!(outcome.status, RunPhase::Completed);
    assert_eq!(outcome.exit_label.as_deref(), Some("done"));
    let rows = store.steps_for_run(&outcome.run_id).expect("steps");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].node, "FETCH::CALL");
    assert_eq!(rows[0].status, "timeout");
    assert_eq!(rows[0].details["error"]["kind"], "timeout");
    assert_eq!(rows[1].node, "FALLBACK::NOTE");
    assert_eq!(rows[1].status, "ok");
}

#[test]
fn qualified_next_crosses_into_another_part() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("a.yaml"),
        "name: A\nentry: START\nexits: { done: DONE }\nnodes:\n  START:\n    kind: step\n    call: { transform: set_value, params: { value: 1 } }\n    save_as: first\n    next: \"B::FINISH\"\n",
    )
    .expect("a");
    fs::write(
        temp.path().join("b.yaml"),
        "name: B\nentry: FINISH\nexits: { done: DONE }\nnodes:\n  FINISH:\n    kind: step\n    call: { transform: arithmetic, params: { op: add, a: \"$.first\", b: 41 } }\n    exit: done\n",
    )
    .expect("b");
    fs::write(
        temp.path().join("process.yaml"),
        "name: hop\nentry: A\nparts:\n  - name: A\n    module: a\n    next: { done: END }\n  - name: B\n    module: b\n    next: { done: END }\n",
    )
    .expect("process");
    let graph = ProcessGraph::load(&temp.path().join("process.yaml"), &SubGraphCatalog::new())
        .expect("load");
    let store = open_store(temp.path(), "hopper");

    let outcome = run(&graph, &store, &Registry::empty());
    assert_eq!(outcome.status, RunPhase::Completed);
    let rows = store.steps_for_run(&outcome.run_id).expect("steps");
    assert_eq!(rows[1].node, "B::FINISH");
    assert_eq!(rows[1].details["last_result_preview"], "42");
}

#[test]
fn store_cancel_request_stops_the_next_cycle() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = single_part(
        SubGraph::new("main", "A")
            .with_node(
                "A",
                Node::step(FnStep::new(|env: &mut Environment<'_>, _state: &CycleState| {
                    env.transform("set_value", params(json!({"value": 1})))?;
                    Ok(Directive::exit("done"))
                })),
            )
            .with_exit("done"),
    );
    let store = open_store(temp.path(), "stoppable");
    store.request_cancel().expect("cancel");
    let worker = Worker::new(
        WorkerName::parse("stoppable").expect("name"),
        store.clone(),
        Arc::new(graph),
    )
    .with_env(Arc::new(|_key: &str| Some("x".to_string())));

    let cycles = worker
        .run_forever(Duration::from_secs(60))
        .expect("run forever");
    assert_eq!(cycles, 1);
    assert!(!store.cancel_requested().expect("flag"));
    let run = store.latest_run().expect("latest").expect("run");
    assert_eq!(run.phase.as_deref(), Some("cancelled"));
}
