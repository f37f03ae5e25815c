//! A task-graph pipeline engine for deterministic, memoized,
//! content-addressed data-processing workflows.
//!
//! Tasks are declared through [`Engine::task`], which returns a builder
//! chain ending in `.build(...)`/`.build_cached(...)`. Each call resolves
//! its arguments, computes a [`Signature`](signature::Signature) from the
//! task's name, version and contributing parameters, and inserts an
//! immutable node into the graph — the body never runs until a
//! [`Engine::run`]/[`Engine::run_parallel`] call actually needs its output.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod param;
pub mod signature;
pub mod store;
pub mod value;

pub use config::EngineConfig;
pub use context::{Context, ContextFrame, ContextScope};
pub use engine::{
    AnyHandle, Args, CancellationToken, Diagnostics, Dynamic, Engine, EventBus, Handle, Observer,
    RunOptions, RunReport, TaskContext, TaskExecution,
};
pub use error::{BindError, EngineError, UnhashableValue};
pub use param::{ParamKind, ParamSpec};
pub use signature::Signature;
pub use store::{FileStore, Format, NullStore, PersistenceStore};
pub use value::{HandleRef, IntoValue, Value, ValueHasher};

/// Declares a task whose parameters are all plain and bound positionally by
/// local variable name — sugar over the `.param(...)` chain for the common
/// case, mirroring the convenience the teacher's own `task!` macro provides
/// over its builder.
///
/// ```rust,ignore
/// let x = 1;
/// let y = 2;
/// let sum = task!(engine, "add", [x, y], move |_ctx, args| {
///     Ok(args.get_i64("x")? + args.get_i64("y")?)
/// })?;
/// ```
#[macro_export]
macro_rules! task {
    ($engine:expr, $name:expr, [$($param:ident),* $(,)?], $body:expr) => {{
        #[allow(unused_mut)]
        let mut def = $engine.task($name);
        $(
            def = def.param(stringify!($param), $param);
        )*
        def.build($body)
    }};
}

/// Initializes a `tracing-subscriber` formatting layer driven by `RUST_LOG`,
/// gated behind the `logging` feature. Optional — the engine emits spans and
/// events regardless, this just gives them somewhere to go by default.
///
/// When the `progress` feature is also enabled, prefer
/// [`init_logging_with_progress`] so the per-task spans `execute_node`
/// opens render as progress bars instead of scrolling log lines.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Same as [`init_logging`], but routes log lines through an
/// `IndicatifLayer` so they don't clobber the progress bars each `"task"`
/// span renders while active.
#[cfg(all(feature = "logging", feature = "progress"))]
pub fn init_logging_with_progress() {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let indicatif_layer = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init();
}
