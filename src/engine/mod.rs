//! The task graph: construction (`Engine::spawn`), the node weight it
//! builds, and the submodules that make up execution.

pub mod builder;
pub mod events;
pub mod handle;
pub(crate) mod persist;
pub mod scheduler;
pub mod task;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use petgraph::graph::{Graph, NodeIndex};

use crate::context::{Context, ContextFrame};
use crate::engine::persist::ErasedPersist;
use crate::error::EngineError;
use crate::param::{self, ParamSpec};
use crate::signature::{self, Signature};
use crate::value::Value;

pub use builder::TaskDef;
pub use events::{EventBus, Observer};
pub use handle::{AnyHandle, Handle};
pub use scheduler::{CancellationToken, Diagnostics, RunOptions, RunReport, TaskExecution};
pub use task::{Args, Dynamic, TaskBody, TaskContext};

/// One node in the task graph: an immutable record of a resolved, signed
/// task. Never mutated after construction (`spec.md` §3 "Task instance").
pub(crate) struct TaskRecord {
    pub name: String,
    #[allow(dead_code)]
    pub version: u64,
    pub parameters: BTreeMap<String, Value>,
    #[allow(dead_code)]
    pub ignored: HashSet<String>,
    pub signature: Signature,
    pub frame: Arc<ContextFrame>,
    pub body: Arc<dyn TaskBody>,
    /// `Some` if this task opted into persistence via `TaskDef::build_cached`.
    pub persist: Option<Arc<dyn ErasedPersist>>,
}

/// The task graph owner. A fresh `Engine` has no tasks; `.task(name)`
/// begins declaring one, and `.run`/`.run1` (see
/// [`crate::engine::scheduler`]) execute a subgraph of previously-declared
/// tasks.
#[derive(Default)]
pub struct Engine {
    pub(crate) graph: Graph<TaskRecord, ()>,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            graph: Graph::new(),
        }
    }

    /// Begins declaring a new task named `name`.
    pub fn task(&mut self, name: impl Into<String>) -> TaskDef<'_> {
        TaskDef::new(self, name.into())
    }

    /// Resolve → sign → allocate (`spec.md` §4.4). Never invokes `body`.
    pub(crate) fn spawn(
        &mut self,
        name: String,
        version: u64,
        table: Vec<ParamSpec>,
        supplied: BTreeMap<String, Value>,
        body: Arc<dyn TaskBody>,
        persist: Option<Arc<dyn ErasedPersist>>,
    ) -> Result<(NodeIndex, Signature), EngineError> {
        let resolved = param::resolve(&table, supplied)?;
        let signature = signature::compute(&name, version, &resolved.parameters, &resolved.ignored)?;
        tracing::trace!(task = %name, version, %signature, "task spawned");
        let frame = Context::current();

        let record = TaskRecord {
            name,
            version,
            parameters: resolved.parameters,
            ignored: resolved.ignored,
            signature,
            frame,
            body,
            persist,
        };

        let index = self.graph.add_node(record);
        for dependency in resolved.dependencies {
            self.graph.add_edge(dependency, index, ());
        }

        Ok((index, signature))
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Runs every task `targets` transitively depends on, single-threaded,
    /// in topological order (`spec.md` §4.6, the reference semantics).
    pub fn run(&self, targets: &[AnyHandle], opts: RunOptions) -> Result<RunReport, EngineError> {
        scheduler::run(self, targets, &opts)
    }

    /// Same as `run`, but dispatches independent tasks across a `rayon`
    /// thread pool (`spec.md` §4.6, the optional parallel strategy).
    pub fn run_parallel(&self, targets: &[AnyHandle], opts: RunOptions) -> Result<RunReport, EngineError> {
        scheduler::run_parallel(self, targets, &opts)
    }

    /// Convenience wrapper around `run` for a single, statically-typed
    /// target.
    pub fn run1<T: Send + Sync + 'static>(&self, target: Handle<T>, opts: RunOptions) -> Result<Arc<T>, EngineError> {
        let report = self.run(&[target.erase()], opts)?;
        let output = report
            .outputs
            .into_iter()
            .next()
            .expect("run always produces one output per requested target");
        Ok(output
            .downcast::<T>()
            .expect("a Handle<T> always names a node whose stored output is T"))
    }
}
