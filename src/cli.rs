use crate::config::{RuntimeEnv, ServerSettings};
use crate::gateway::{self, Server};
use crate::orchestration::metrics::{current_run_metrics, recent_steps, DEFAULT_RECENT_STEPS};
use crate::orchestration::{
    progress_for, structural_counts, ExecutionSafetyLimits, ProcessGraph, SubGraphCatalog, Worker,
};
use crate::shared::ids::WorkerName;
use crate::shared::logging::init_tracing;
use crate::state_store::{kv_keys, worker_db_path, StateStore};
use crate::tools::{discover, HandlerTable, Registry};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "toolhub", about = "Tool gateway and process worker")]
pub struct Cli {
    /// Project root holding `.env`, `tools/` and `workers/`.
    #[arg(long, global = true, env = "TOOLHUB_ROOT", default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP gateway
    Serve(ServeArgs),
    #[command(subcommand)]
    Worker(WorkerCommand),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Debug, Subcommand)]
enum WorkerCommand {
    /// Run cycles of a process against the worker's store
    Run(WorkerRunArgs),
    /// Print state, recent steps and metrics as JSON
    Status(WorkerStatusArgs),
    /// Apply schema migrations to the worker's store
    Migrate(WorkerNameArg),
}

#[derive(Debug, Args)]
struct WorkerNameArg {
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct WorkerRunArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    process: PathBuf,
    #[arg(long)]
    once: bool,
    #[arg(long, default_value_t = 60.0)]
    interval_sec: f64,
    #[arg(long)]
    step_timeout_sec: Option<u64>,
    #[arg(long)]
    run_timeout_sec: Option<u64>,
}

#[derive(Debug, Args)]
struct WorkerStatusArgs {
    #[arg(long)]
    name: String,
    /// Process file used for structural counts and progress.
    #[arg(long)]
    process: Option<PathBuf>,
}

fn load_settings(root: &Path) -> Result<ServerSettings, String> {
    let settings = ServerSettings::from_env(root).map_err(|err| err.to_string())?;
    init_tracing(&settings.log_level, settings.log_file.as_deref());
    Ok(settings)
}

fn to_pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn load_registry(settings: &ServerSettings) -> Registry {
    let discovery = discover(
        &settings.tools_dir,
        &settings.specs_dir,
        &HandlerTable::with_builtins(),
    );
    Registry::from_entries(discovery.entries, discovery.errors, settings.safe_json)
}

fn serve(settings: ServerSettings, args: ServeArgs) -> Result<String, String> {
    let mut settings = settings;
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    let server = Arc::new(Server::new(settings, HandlerTable::with_builtins()));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("failed to start runtime: {err}"))?;
    runtime
        .block_on(gateway::serve(server))
        .map_err(|err| err.to_string())?;
    Ok("gateway stopped".to_string())
}

fn worker_run(settings: ServerSettings, args: WorkerRunArgs) -> Result<String, String> {
    let name = WorkerName::parse(&args.name)?;
    let store = StateStore::open(&worker_db_path(&settings.workers_dir, name.as_str()))
        .map_err(|err| err.to_string())?;
    let graph = ProcessGraph::load(&args.process, &SubGraphCatalog::new())
        .map_err(|err| err.to_string())?;
    let env = Arc::new(RuntimeEnv::new(settings.project_root.clone()));
    let mut limits = ExecutionSafetyLimits::default();
    if let Some(seconds) = args.step_timeout_sec {
        limits.step_timeout_seconds = seconds;
    }
    if let Some(seconds) = args.run_timeout_sec {
        limits.run_timeout_seconds = seconds;
    }
    let worker = Worker::new(name, store, Arc::new(graph))
        .with_limits(limits)
        .with_tools(Arc::new(load_registry(&settings)))
        .with_safe_json(settings.safe_json)
        .with_env(Arc::new(move |key: &str| env.get(key)));

    if args.once {
        let outcome = worker.run_cycle().map_err(|err| err.to_string())?;
        let value = serde_json::to_value(&outcome).map_err(|err| err.to_string())?;
        return Ok(to_pretty(&value));
    }
    let interval = Duration::try_from_secs_f64(args.interval_sec.max(0.0))
        .map_err(|err| format!("invalid --interval-sec: {err}"))?;
    let cycles = worker
        .run_forever(interval)
        .map_err(|err| err.to_string())?;
    Ok(format!("worker {} stopped after {cycles} cycle(s)", worker.name()))
}

fn worker_status(settings: ServerSettings, args: WorkerStatusArgs) -> Result<String, String> {
    let name = WorkerName::parse(&args.name)?;
    let path = worker_db_path(&settings.workers_dir, name.as_str());
    if !path.is_file() {
        return Err(format!("worker `{name}` has no store at {}", path.display()));
    }
    let store = StateStore::open_existing(&path).map_err(|err| err.to_string())?;
    let kv = store.state_all().map_err(|err| err.to_string())?;
    let mut status = json!({
        "name": name,
        "db_path": path.display().to_string(),
        "state": kv,
        "recent_steps": recent_steps(&store, DEFAULT_RECENT_STEPS).map_err(|err| err.to_string())?,
        "metrics": current_run_metrics(&store).map_err(|err| err.to_string())?,
    });
    if let Some(process) = args.process {
        let graph =
            ProcessGraph::load(&process, &SubGraphCatalog::new()).map_err(|err| err.to_string())?;
        status["structure"] = json!(structural_counts(&graph));
        status["progress"] = json!(kv
            .get(kv_keys::CURRENT_NODE)
            .and_then(|node| progress_for(&graph, node)));
    }
    Ok(to_pretty(&status))
}

fn worker_migrate(settings: ServerSettings, args: WorkerNameArg) -> Result<String, String> {
    let name = WorkerName::parse(&args.name)?;
    let path = worker_db_path(&settings.workers_dir, name.as_str());
    let store = if path.is_file() {
        StateStore::open_existing(&path)
    } else {
        StateStore::open(&path)
    }
    .map_err(|err| err.to_string())?;
    let report = store.migrate().map_err(|err| err.to_string())?;
    let value = serde_json::to_value(&report).map_err(|err| err.to_string())?;
    Ok(to_pretty(&value))
}

impl Cli {
    pub fn run(self) -> Result<String, String> {
        let settings = load_settings(&self.root)?;
        match self.command {
            Command::Serve(args) => serve(settings, args),
            Command::Worker(WorkerCommand::Run(args)) => worker_run(settings, args),
            Command::Worker(WorkerCommand::Status(args)) => worker_status(settings, args),
            Command::Worker(WorkerCommand::Migrate(args)) => worker_migrate(settings, args),
        }
    }
}

/// Parses `args` (without the program name) and runs the command.
pub fn run(args: Vec<String>) -> Result<String, String> {
    match Cli::try_parse_from(std::iter::once("toolhub".to_string()).chain(args)) {
        Ok(cli) => cli.run(),
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            Ok(err.to_string())
        }
        Err(err) => Err(err.to_string()),
    }
}
