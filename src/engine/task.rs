//! Type-erased task bodies and the resolved-argument view they execute
//! against.
//!
//! A task body is generic over its own output type at declaration time
//! (`.build::<R, F>`) but the graph stores every task homogeneously, so the
//! body is bridged into a uniform trait object the moment it's built —
//! exactly the blanket-impl erasure bridge the teacher uses to turn a
//! `TypedTask<G>` into a `Task<G>` in `task.rs`/`task_c.rs`.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context as _;
use petgraph::graph::NodeIndex;

use crate::signature::Signature;
use crate::value::Value;

/// A task's type-erased output, shared by every handle that points at it.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Per-call context handed to a task body: identity, nothing more. The body
/// gets its inputs from [`Args`]; anything it needs to report goes through
/// `tracing` (a span is already open for the call, see
/// [`crate::engine::scheduler`]).
pub struct TaskContext<'a> {
    name: &'a str,
    signature: Signature,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(name: &'a str, signature: Signature) -> Self {
        TaskContext { name, signature }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }
}

/// A resolved parameter value, mirroring [`Value`]'s shape but with every
/// dependency handle replaced by the concrete, already-computed output it
/// stood in for (`spec.md` §4.6 "substituting each dependency handle in
/// parameters with its resolved value").
#[derive(Clone)]
pub enum Materialized {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Materialized>),
    Tuple(Vec<Materialized>),
    Map(Vec<(Materialized, Materialized)>),
    Set(Vec<Materialized>),
    Dependency(Dynamic),
}

pub(crate) fn materialize(value: &Value, outputs: &HashMap<NodeIndex, Dynamic>) -> Materialized {
    match value {
        Value::Null => Materialized::Null,
        Value::Bool(b) => Materialized::Bool(*b),
        Value::Int(i) => Materialized::Int(*i),
        Value::Float(f) => Materialized::Float(*f),
        Value::Str(s) => Materialized::Str(s.clone()),
        Value::List(items) => {
            Materialized::List(items.iter().map(|v| materialize(v, outputs)).collect())
        }
        Value::Tuple(items) => {
            Materialized::Tuple(items.iter().map(|v| materialize(v, outputs)).collect())
        }
        Value::Map(entries) => Materialized::Map(
            entries
                .iter()
                .map(|(k, v)| (materialize(k, outputs), materialize(v, outputs)))
                .collect(),
        ),
        Value::Set(items) => {
            Materialized::Set(items.iter().map(|v| materialize(v, outputs)).collect())
        }
        Value::Handle(handle_ref) => {
            let dynamic = outputs
                .get(&handle_ref.index())
                .expect("dependency must be executed before its dependent")
                .clone();
            Materialized::Dependency(dynamic)
        }
    }
}

/// The argument set a task body sees: every declared parameter, by name,
/// already resolved and with dependency handles substituted for concrete
/// values.
pub struct Args {
    values: BTreeMap<String, Materialized>,
}

impl Args {
    pub(crate) fn new(values: BTreeMap<String, Materialized>) -> Self {
        Args { values }
    }

    fn get(&self, name: &str) -> anyhow::Result<&Materialized> {
        self.values
            .get(name)
            .with_context(|| format!("no parameter named `{name}` was declared for this task"))
    }

    /// Returns the resolved value for `name` in its raw, untyped form —
    /// the escape hatch for value kinds (`Map`, `Set`, `Null`) that don't
    /// have their own typed accessor, or for bodies that want to match on
    /// the shape themselves.
    pub fn get_raw(&self, name: &str) -> anyhow::Result<&Materialized> {
        self.get(name)
    }

    pub fn get_i64(&self, name: &str) -> anyhow::Result<i64> {
        match self.get(name)? {
            Materialized::Int(i) => Ok(*i),
            other => anyhow::bail!("parameter `{name}` is not an integer: {}", describe(other)),
        }
    }

    pub fn get_f64(&self, name: &str) -> anyhow::Result<f64> {
        match self.get(name)? {
            Materialized::Float(f) => Ok(*f),
            Materialized::Int(i) => Ok(*i as f64),
            other => anyhow::bail!("parameter `{name}` is not a float: {}", describe(other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> anyhow::Result<bool> {
        match self.get(name)? {
            Materialized::Bool(b) => Ok(*b),
            other => anyhow::bail!("parameter `{name}` is not a bool: {}", describe(other)),
        }
    }

    pub fn get_str(&self, name: &str) -> anyhow::Result<&str> {
        match self.get(name)? {
            Materialized::Str(s) => Ok(s.as_str()),
            other => anyhow::bail!("parameter `{name}` is not a string: {}", describe(other)),
        }
    }

    pub fn get_list(&self, name: &str) -> anyhow::Result<&[Materialized]> {
        match self.get(name)? {
            Materialized::List(items) | Materialized::Tuple(items) => Ok(items.as_slice()),
            other => anyhow::bail!("parameter `{name}` is not a sequence: {}", describe(other)),
        }
    }

    pub fn get_map(&self, name: &str) -> anyhow::Result<&[(Materialized, Materialized)]> {
        match self.get(name)? {
            Materialized::Map(entries) => Ok(entries.as_slice()),
            other => anyhow::bail!("parameter `{name}` is not a mapping: {}", describe(other)),
        }
    }

    pub fn get_set(&self, name: &str) -> anyhow::Result<&[Materialized]> {
        match self.get(name)? {
            Materialized::Set(items) => Ok(items.as_slice()),
            other => anyhow::bail!("parameter `{name}` is not a set: {}", describe(other)),
        }
    }

    /// Succeeds only if `name` resolved to the bound-`null` sentinel — a
    /// declared-but-absent `Injectable` without a default resolves here
    /// rather than erroring (`spec.md` §4.3).
    pub fn get_null(&self, name: &str) -> anyhow::Result<()> {
        match self.get(name)? {
            Materialized::Null => Ok(()),
            other => anyhow::bail!("parameter `{name}` is not null: {}", describe(other)),
        }
    }

    pub fn is_null(&self, name: &str) -> anyhow::Result<bool> {
        Ok(matches!(self.get(name)?, Materialized::Null))
    }

    /// Resolves a dependency-valued parameter to its concrete output,
    /// downcast to `T`. Fails if `name` wasn't declared as a dependency or
    /// if `T` doesn't match the type the producing task actually returned —
    /// the latter can only happen from a mismatched `.dependency::<T>()`
    /// call against a handle built for a different output type.
    pub fn dependency<T: Send + Sync + 'static>(&self, name: &str) -> anyhow::Result<Arc<T>> {
        match self.get(name)? {
            Materialized::Dependency(dynamic) => dynamic
                .clone()
                .downcast::<T>()
                .map_err(|_| anyhow::anyhow!("dependency `{name}` is not of the requested type")),
            other => anyhow::bail!("parameter `{name}` is not a dependency: {}", describe(other)),
        }
    }
}

fn describe(value: &Materialized) -> &'static str {
    match value {
        Materialized::Null => "null",
        Materialized::Bool(_) => "bool",
        Materialized::Int(_) => "int",
        Materialized::Float(_) => "float",
        Materialized::Str(_) => "string",
        Materialized::List(_) => "list",
        Materialized::Tuple(_) => "tuple",
        Materialized::Map(_) => "map",
        Materialized::Set(_) => "set",
        Materialized::Dependency(_) => "dependency",
    }
}

/// A type-erased task body, bridged from a concrete `Fn(&TaskContext, &Args)
/// -> anyhow::Result<R>` closure. Never implemented directly — see the
/// blanket impl below.
pub trait TaskBody: Send + Sync {
    fn call(&self, ctx: &TaskContext, args: &Args) -> anyhow::Result<Dynamic>;
}

impl<F, R> TaskBody for F
where
    F: Fn(&TaskContext, &Args) -> anyhow::Result<R> + Send + Sync,
    R: Send + Sync + 'static,
{
    fn call(&self, ctx: &TaskContext, args: &Args) -> anyhow::Result<Dynamic> {
        let output = self(ctx, args)?;
        Ok(Arc::new(output) as Dynamic)
    }
}
