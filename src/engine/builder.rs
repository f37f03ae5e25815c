//! The fluent task declaration API, grounded on the teacher's
//! `Blueprint`/`TaskDef`/`TaskBinder` chain in `blueprint.rs`. A decorator
//! surface (as the original used) isn't idiomatic Rust, so declaration here
//! is a builder that ends in `.build(...)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::handle::Handle;
use crate::engine::persist::TypedPersist;
use crate::engine::task::{Args, TaskBody, TaskContext};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::param::ParamSpec;
use crate::store::Format;
use crate::value::{IntoValue, Value};

/// A task under construction. Accumulates parameter declarations until
/// `.build(...)` resolves, signs and inserts it into the graph.
pub struct TaskDef<'e> {
    engine: &'e mut Engine,
    name: String,
    version: u64,
    table: Vec<ParamSpec>,
    supplied: BTreeMap<String, Value>,
}

impl<'e> TaskDef<'e> {
    pub(crate) fn new(engine: &'e mut Engine, name: String) -> Self {
        TaskDef {
            engine,
            name,
            version: 1,
            table: Vec::new(),
            supplied: BTreeMap::new(),
        }
    }

    /// Sets the task's version. A version bump changes the signature of
    /// every task built with it from here on, exactly like any other
    /// contributing parameter (`spec.md` §4.5).
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Declares a required, signature-contributing parameter and supplies
    /// its value immediately.
    pub fn param(mut self, name: impl Into<String>, value: impl IntoValue) -> Self {
        let name = name.into();
        self.supplied.insert(name.clone(), value.into_value());
        self.table.push(ParamSpec::plain(name));
        self
    }

    /// Declares a parameter sourced from the active context by name if
    /// `explicit` is absent, falling back to `default`, erroring at build
    /// time if `required` and nothing resolves it (`spec.md` §4.3).
    pub fn injectable<V: IntoValue>(
        mut self,
        name: impl Into<String>,
        explicit: Option<V>,
        default: Option<V>,
        required: bool,
    ) -> Self {
        let name = name.into();
        if let Some(value) = explicit {
            self.supplied.insert(name.clone(), value.into_value());
        }
        self.table
            .push(ParamSpec::injectable(name, default.map(IntoValue::into_value), required));
        self
    }

    /// Declares a parameter visible to the task body but excluded from the
    /// signature entirely (`spec.md` §4.3 "ignored").
    pub fn ignored(mut self, name: impl Into<String>, value: impl IntoValue) -> Self {
        let name = name.into();
        self.supplied.insert(name.clone(), value.into_value());
        self.table.push(ParamSpec::plain(name).ignored());
        self
    }

    /// Marks the most recently declared parameter as ignored in addition to
    /// however it was already classified — a parameter may be both
    /// injectable and ignored (`spec.md` §4.3), so this lets `.injectable()`
    /// opt out of signature contribution without losing its context-sourced
    /// resolution.
    pub fn also_ignored(mut self) -> Self {
        if let Some(last) = self.table.last_mut() {
            last.ignored = true;
        }
        self
    }

    /// Declares a dependency on another task's output. The dependency
    /// contributes to this task's signature via the producing task's own
    /// signature (`spec.md` §4.1 "lazy output handle"), and becomes a graph
    /// edge once resolved.
    pub fn dependency<T>(mut self, name: impl Into<String>, handle: Handle<T>) -> Self {
        let name = name.into();
        self.supplied.insert(name.clone(), handle.into_value());
        self.table.push(ParamSpec::plain(name));
        self
    }

    /// Resolves, signs and inserts the task, returning a handle to its
    /// not-yet-computed output. The output is never written to the
    /// persistence store — every run recomputes it unless a dependent
    /// happens to already hold it in memory.
    pub fn build<R, F>(self, body: F) -> Result<Handle<R>, EngineError>
    where
        F: Fn(&TaskContext, &Args) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let body: Arc<dyn TaskBody> = Arc::new(body);
        let (index, signature) = self
            .engine
            .spawn(self.name, self.version, self.table, self.supplied, body, None)?;
        Ok(Handle::new(index, signature))
    }

    /// Same as `build`, but additionally persists the output under this
    /// task's signature (`spec.md` §4.7) using `format` to serialize it, so
    /// a later run with an unchanged signature can skip recomputation
    /// entirely.
    pub fn build_cached<R, F>(self, format: Format, body: F) -> Result<Handle<R>, EngineError>
    where
        F: Fn(&TaskContext, &Args) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let body: Arc<dyn TaskBody> = Arc::new(body);
        let persist = Some(TypedPersist::<R>::new(format));
        let (index, signature) = self
            .engine
            .spawn(self.name, self.version, self.table, self.supplied, body, persist)?;
        Ok(Handle::new(index, signature))
    }
}
