//! Execution: discovery, memoized single-threaded evaluation
//! (`Scheduler::run`), and a `rayon`-parallel variant transliterated from
//! the teacher's dependency-counting executor in `executor.rs`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use petgraph::Direction;

use crate::context::Context;
use crate::engine::persist::ErasedPersist;
use crate::engine::task::{materialize, Args, Dynamic, TaskContext};
use crate::engine::{AnyHandle, Engine, TaskRecord};
use crate::error::EngineError;
use crate::signature::Signature;
use crate::store::{NullStore, PersistenceStore};

use super::events::EventBus;

/// A cooperative stop signal, checked between task boundaries by both
/// scheduling strategies (`spec.md` §5).
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One task's recorded execution window, for the `Diagnostics` report.
#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Per-task timing collected over the course of one run, grounded on the
/// teacher's `executor::Diagnostics` minus the SVG/Mermaid rendering that
/// has no counterpart here.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: HashMap<NodeIndex, TaskExecution>,
}

/// Knobs for one `Scheduler::run`/`run_parallel` call.
pub struct RunOptions {
    pub fail_fast: bool,
    pub cancellation: CancellationToken,
    pub store: Arc<dyn PersistenceStore>,
    pub events: EventBus,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            fail_fast: true,
            cancellation: CancellationToken::new(),
            store: Arc::new(NullStore),
            events: EventBus::new(),
        }
    }
}

/// The outcome of a run: every requested target's output, in the same
/// order the targets were given, plus timing diagnostics.
pub struct RunReport {
    pub outputs: Vec<Dynamic>,
    pub diagnostics: Diagnostics,
}

#[cfg(feature = "progress")]
fn progress_bar(len: usize) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(len as u64);
    bar.set_style(
        indicatif::ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

/// A tick-per-completed-task indicator, compiled away entirely when the
/// `progress` feature is off.
struct Progress {
    #[cfg(feature = "progress")]
    bar: indicatif::ProgressBar,
}

impl Progress {
    fn new(_len: usize) -> Self {
        Progress {
            #[cfg(feature = "progress")]
            bar: progress_bar(_len),
        }
    }

    fn tick(&self, _name: &str) {
        #[cfg(feature = "progress")]
        {
            self.bar.set_message(_name.to_string());
            self.bar.inc(1);
        }
    }

    fn finish(&self) {
        #[cfg(feature = "progress")]
        self.bar.finish_and_clear();
    }
}

/// Walks backward from `targets` over dependency edges to find every node a
/// run actually needs to consider.
fn discover(engine: &Engine, targets: &[AnyHandle]) -> HashSet<NodeIndex> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = targets.iter().map(|h| h.index()).collect();
    seen.extend(queue.iter().copied());

    while let Some(node) = queue.pop_front() {
        for dep in engine.graph.neighbors_directed(node, Direction::Incoming) {
            if seen.insert(dep) {
                queue.push_back(dep);
            }
        }
    }

    seen
}

/// A topological order over `nodes`, or the first node found to sit on a
/// cycle. The builder API can only reference already-constructed handles,
/// so in practice the graph is acyclic by construction; this check exists
/// because `spec.md` §7 still names `CycleDetected` as a first-class error.
fn topological_order(engine: &Engine, nodes: &HashSet<NodeIndex>) -> Result<Vec<NodeIndex>, EngineError> {
    let mut indegree: HashMap<NodeIndex, usize> = nodes
        .iter()
        .map(|&n| {
            let count = engine
                .graph
                .neighbors_directed(n, Direction::Incoming)
                .filter(|d| nodes.contains(d))
                .count();
            (n, count)
        })
        .collect();

    let mut ready: VecDeque<NodeIndex> = indegree
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&n, _)| n)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for dependent in engine.graph.neighbors_directed(node, Direction::Outgoing) {
            if !nodes.contains(&dependent) {
                continue;
            }
            let count = indegree.get_mut(&dependent).unwrap();
            *count -= 1;
            if *count == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = nodes
            .iter()
            .find(|n| !order.contains(n))
            .copied()
            .expect("order is short, so some node was never reached");
        return Err(EngineError::CycleDetected(stuck));
    }

    Ok(order)
}

/// Looks up a persisted output for `signature`, decoding it with `persist` if
/// the stored format tag matches. Returns `Ok(None)` for a plain miss (no
/// entry, or an entry written by a different format) and propagates
/// `EngineError::CacheCorruption`/`EngineError::Storage` for the caller to
/// downgrade into a recompute (`spec.md` §7: corruption invalidates and
/// falls back to recomputation, storage errors on load are treated as a
/// miss).
fn load_cached(
    store: &dyn PersistenceStore,
    persist: &dyn ErasedPersist,
    signature: Signature,
    task_name: &str,
    version: u64,
) -> Result<Option<Dynamic>, EngineError> {
    let Some((format, payload)) = store.load(signature, task_name, version)? else {
        return Ok(None);
    };

    if format != persist.format() {
        return Ok(None);
    }

    persist.decode(&payload).map(Some)
}

/// Loads a cached output if the task opted into persistence and the store
/// has a validated entry, otherwise runs the body and (if the task opted
/// in) saves the result.
fn execute_node(
    record: &TaskRecord,
    node: NodeIndex,
    signature: Signature,
    outputs: &HashMap<NodeIndex, Dynamic>,
    store: &dyn PersistenceStore,
    events: &EventBus,
) -> Result<Dynamic, EngineError> {
    events.task_started(&record.name, signature);

    if let Some(persist) = &record.persist {
        match load_cached(store, persist.as_ref(), signature, &record.name, record.version) {
            Ok(Some(value)) => {
                events.cache_hit(&record.name, signature);
                return Ok(value);
            }
            Ok(None) => {}
            Err(EngineError::CacheCorruption(reason)) => {
                tracing::warn!(task = %record.name, %signature, %reason, "cache entry corrupted, invalidating and recomputing");
                if let Err(invalidate_err) = store.invalidate(signature) {
                    tracing::warn!(task = %record.name, %signature, error = %invalidate_err, "failed to invalidate corrupted cache entry");
                }
            }
            Err(EngineError::Storage(err)) => {
                tracing::warn!(task = %record.name, %signature, error = %err, "persistence store load failed, treating as a cache miss");
            }
            Err(other) => return Err(other),
        }
    }
    events.cache_miss(&record.name, signature);

    let materialized: std::collections::BTreeMap<String, _> = record
        .parameters
        .iter()
        .map(|(name, value)| (name.clone(), materialize(value, outputs)))
        .collect();
    let args = Args::new(materialized);
    let ctx = TaskContext::new(&record.name, signature);

    let span = tracing::info_span!("task", name = %record.name, signature = %signature);
    let _frame_guard = Context::install(record.frame.clone());
    let start = Instant::now();
    let result = span.in_scope(|| {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| record.body.call(&ctx, &args)))
    });
    drop(_frame_guard);

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            events.task_failed(&record.name, signature, &err.to_string());
            return Err(EngineError::TaskFailed(err));
        }
        Err(panic) => {
            let message = panic_message(&panic);
            events.task_failed(&record.name, signature, &message);
            return Err(EngineError::TaskFailed(anyhow::anyhow!("task panicked: {message}")));
        }
    };

    if let Some(persist) = &record.persist {
        let save_result = persist
            .encode(&output)
            .and_then(|payload| store.save(signature, &record.name, record.version, persist.format(), &payload));
        if let Err(err) = save_result {
            tracing::warn!(task = %record.name, %signature, %err, "failed to persist task output, continuing with an in-memory-only result");
        }
    }

    events.task_completed(&record.name, signature, start.elapsed());
    let _ = node; // kept for symmetry with the diagnostics caller, which records it separately
    Ok(output)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Single-threaded reference scheduler: discover, topologically order,
/// execute in that order, memoizing by signature within the run
/// (`spec.md` §4.6).
pub fn run(engine: &Engine, targets: &[AnyHandle], opts: &RunOptions) -> Result<RunReport, EngineError> {
    let _span = tracing::info_span!("run", strategy = "sequential", targets = targets.len()).entered();
    let subgraph = discover(engine, targets);
    let order = topological_order(engine, &subgraph)?;

    let mut outputs: HashMap<NodeIndex, Dynamic> = HashMap::new();
    let mut by_signature: HashMap<Signature, Dynamic> = HashMap::new();
    let mut failed: HashMap<NodeIndex, Signature> = HashMap::new();
    let mut diagnostics = Diagnostics::default();
    let mut first_error: Option<EngineError> = None;
    let progress = Progress::new(order.len());

    for node in order {
        if opts.cancellation.is_cancelled() {
            first_error.get_or_insert(EngineError::Cancelled);
            continue;
        }
        if first_error.is_some() && opts.fail_fast {
            continue;
        }

        let record = &engine.graph[node];
        let signature = record.signature;
        progress.tick(&record.name);

        if let Some(failed_dep) = engine
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .find_map(|dep| failed.get(&dep).copied())
        {
            failed.insert(node, signature);
            first_error.get_or_insert(EngineError::DependencyFailed(failed_dep));
            continue;
        }

        if let Some(cached) = by_signature.get(&signature) {
            outputs.insert(node, cached.clone());
            continue;
        }

        let start = Instant::now();
        match execute_node(record, node, signature, &outputs, opts.store.as_ref(), &opts.events) {
            Ok(output) => {
                diagnostics.execution_times.insert(
                    node,
                    TaskExecution {
                        start,
                        duration: start.elapsed(),
                    },
                );
                by_signature.insert(signature, output.clone());
                outputs.insert(node, output);
            }
            Err(err) => {
                failed.insert(node, signature);
                first_error.get_or_insert(err);
            }
        }
    }

    progress.finish();

    if let Some(err) = first_error {
        return Err(err);
    }

    let results = targets
        .iter()
        .map(|h| outputs.get(&h.index()).expect("every target was executed").clone())
        .collect();

    Ok(RunReport {
        outputs: results,
        diagnostics,
    })
}

/// `rayon::scope` + `crossbeam-channel` dependency-counting executor,
/// transliterated from the teacher's `run_tasks_parallel`. Signature-level
/// mutual exclusion is provided by a `OnceLock` per signature: the first
/// worker to reach a signature computes it, any other worker that reaches
/// an equal signature blocks on the same `OnceLock` instead of duplicating
/// the work (`spec.md` §5 "no two workers attempt the same signature
/// concurrently").
pub fn run_parallel(engine: &Engine, targets: &[AnyHandle], opts: &RunOptions) -> Result<RunReport, EngineError> {
    let _span = tracing::info_span!("run", strategy = "parallel", targets = targets.len()).entered();
    let subgraph = discover(engine, targets);
    // Still validated up front so a cycle is reported before any task runs.
    topological_order(engine, &subgraph)?;

    let indegree: HashMap<NodeIndex, AtomicUsize> = subgraph
        .iter()
        .map(|&n| {
            let count = engine
                .graph
                .neighbors_directed(n, Direction::Incoming)
                .filter(|d| subgraph.contains(d))
                .count();
            (n, AtomicUsize::new(count))
        })
        .collect();

    // `None` is a shutdown sentinel, not a real node: once every node has
    // been processed, exactly `worker_count` of them are sent so each
    // worker (which only ever consumes one channel item per loop turn)
    // is guaranteed to receive its own and exit, without relying on
    // closing the channel (every worker keeps the sender alive for as
    // long as it's running, so drop-based closure would deadlock).
    let (ready_tx, ready_rx) = crossbeam_channel::unbounded::<Option<NodeIndex>>();
    for &node in &subgraph {
        if indegree[&node].load(Ordering::SeqCst) == 0 {
            ready_tx.send(Some(node)).expect("receiver lives as long as this function");
        }
    }

    let remaining = AtomicUsize::new(subgraph.len());
    let outputs: Mutex<HashMap<NodeIndex, Dynamic>> = Mutex::new(HashMap::new());
    let signature_slots: Mutex<HashMap<Signature, Arc<OnceLock<Result<Dynamic, String>>>>> =
        Mutex::new(HashMap::new());
    let failures: Mutex<HashMap<NodeIndex, Signature>> = Mutex::new(HashMap::new());
    let first_error: Mutex<Option<EngineError>> = Mutex::new(None);
    let diagnostics: Mutex<Diagnostics> = Mutex::new(Diagnostics::default());
    let progress = Progress::new(subgraph.len());

    let worker_count = rayon::current_num_threads().max(1);

    rayon::scope(|scope| {
        for _ in 0..worker_count {
            let ready_rx = &ready_rx;
            let ready_tx = &ready_tx;
            let indegree = &indegree;
            let outputs = &outputs;
            let signature_slots = &signature_slots;
            let failures = &failures;
            let first_error = &first_error;
            let diagnostics = &diagnostics;
            let remaining = &remaining;
            let subgraph = &subgraph;
            let progress = &progress;

            scope.spawn(move |_| {
                while let Ok(Some(node)) = ready_rx.recv() {
                    let record = &engine.graph[node];
                    progress.tick(&record.name);
                    let signature = record.signature;
                    let stop_early = opts.cancellation.is_cancelled() || (opts.fail_fast && first_error.lock().unwrap().is_some());

                    if stop_early {
                        first_error
                            .lock()
                            .unwrap()
                            .get_or_insert(EngineError::Cancelled);
                    } else {
                        let failed_dep = engine
                            .graph
                            .neighbors_directed(node, Direction::Incoming)
                            .find_map(|dep| failures.lock().unwrap().get(&dep).copied());

                        if let Some(failed_signature) = failed_dep {
                            failures.lock().unwrap().insert(node, signature);
                            first_error
                                .lock()
                                .unwrap()
                                .get_or_insert(EngineError::DependencyFailed(failed_signature));
                        } else {
                            let slot = signature_slots
                                .lock()
                                .unwrap()
                                .entry(signature)
                                .or_insert_with(|| Arc::new(OnceLock::new()))
                                .clone();

                            let start = Instant::now();
                            let result = slot.get_or_init(|| {
                                let snapshot = outputs.lock().unwrap().clone();
                                execute_node(record, node, signature, &snapshot, opts.store.as_ref(), &opts.events)
                                    .map_err(|e| e.to_string())
                            });

                            match result {
                                Ok(output) => {
                                    outputs.lock().unwrap().insert(node, output.clone());
                                    diagnostics.lock().unwrap().execution_times.insert(
                                        node,
                                        TaskExecution {
                                            start,
                                            duration: start.elapsed(),
                                        },
                                    );
                                }
                                Err(message) => {
                                    failures.lock().unwrap().insert(node, signature);
                                    first_error
                                        .lock()
                                        .unwrap()
                                        .get_or_insert(EngineError::TaskFailed(anyhow::anyhow!(message.clone())));
                                }
                            }
                        }
                    }

                    for dependent in engine.graph.neighbors_directed(node, Direction::Outgoing) {
                        if !subgraph.contains(&dependent) {
                            continue;
                        }
                        if indegree[&dependent].fetch_sub(1, Ordering::SeqCst) == 1 {
                            let _ = ready_tx.send(Some(dependent));
                        }
                    }

                    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        for _ in 0..worker_count {
                            let _ = ready_tx.send(None);
                        }
                        break;
                    }
                }
            });
        }
    });

    progress.finish();

    if let Some(err) = first_error.into_inner().unwrap() {
        return Err(err);
    }

    let outputs = outputs.into_inner().unwrap();
    let results = targets
        .iter()
        .map(|h| outputs.get(&h.index()).expect("every target was executed").clone())
        .collect();

    Ok(RunReport {
        outputs: results,
        diagnostics: diagnostics.into_inner().unwrap(),
    })
}
