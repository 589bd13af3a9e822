pub mod cancel;
pub mod catalog;
pub mod definition;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod node;
pub mod nodes;
pub mod process;
pub mod runner;
pub mod state;
pub mod structure;
pub mod subgraph;
pub mod transforms;
pub mod worker;

pub use cancel::{sleep_with_stop, CancelFlag};
pub use catalog::SubGraphCatalog;
pub use environment::{EffectRecord, Environment};
pub use error::{OrchestratorError, ONE_EFFECT_MESSAGE};
pub use metrics::{current_run_metrics, recent_steps, RecentStep, RunMetrics};
pub use node::{Cond, Directive, EffectKind, FnCond, FnStep, Node, Step};
pub use process::{Process, ProcessGraph, SubGraphRef, END_MARKER};
pub use runner::{CycleRunner, ExecutionSafetyLimits, RunOutcome};
pub use state::CycleState;
pub use structure::{progress_for, structural_counts, subgraph_order, StepProgress, StructuralCounts};
pub use subgraph::SubGraph;
pub use transforms::{TransformContext, TransformError};
pub use worker::{EnvLookup, Worker};
