//! The parameter resolver: binds a call's supplied arguments against a
//! task's declared parameter table, classifying, normalizing and freezing
//! them into the form the signature engine and task body both consume.
//!
//! Implements the bind → classify → normalize → freeze pipeline of
//! `spec.md` §4.3.

use std::collections::{BTreeMap, HashSet};

use petgraph::graph::NodeIndex;

use crate::context::Context;
use crate::error::{BindError, EngineError};
use crate::value::Value;

/// How a declared parameter is sourced and whether it contributes to the
/// task's signature.
#[derive(Debug, Clone)]
pub enum ParamKind {
    /// Must be supplied at the call site; always contributes to the signature
    /// unless also marked ignored.
    Plain,
    /// Sourced from the supplied argument if present, otherwise from the
    /// active context frame by name, otherwise from `default`. `required`
    /// controls whether a miss on all three sources is an error.
    Injectable {
        default: Option<Value>,
        required: bool,
    },
}

/// One entry in a task's parameter table, built by the declaration builder.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Visible to the task body but excluded from the signature
    /// computation — a parameter may be both injectable and ignored
    /// (`spec.md` §4.3).
    pub ignored: bool,
}

impl ParamSpec {
    pub fn plain(name: impl Into<String>) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Plain,
            ignored: false,
        }
    }

    pub fn injectable(name: impl Into<String>, default: Option<Value>, required: bool) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Injectable { default, required },
            ignored: false,
        }
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

/// The result of resolving a call: a frozen parameter map ready for both
/// signing and execution, the subset of names excluded from the signature,
/// and the dependency edges found nested anywhere inside the parameter
/// values.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub parameters: BTreeMap<String, Value>,
    pub ignored: HashSet<String>,
    pub dependencies: Vec<NodeIndex>,
}

/// Runs the bind → classify → normalize → freeze pipeline for one task
/// construction call.
pub fn resolve(table: &[ParamSpec], mut supplied: BTreeMap<String, Value>) -> Result<Resolved, EngineError> {
    let mut parameters = BTreeMap::new();
    let mut ignored = HashSet::new();

    // Bind + classify.
    for spec in table {
        let value = if let Some(value) = supplied.remove(&spec.name) {
            value
        } else {
            match &spec.kind {
                ParamKind::Plain => {
                    return Err(EngineError::Bind(BindError::MissingArgument(spec.name.clone())));
                }
                ParamKind::Injectable { default, required } => {
                    if let Some(from_context) = Context::current().get(&spec.name) {
                        from_context.clone()
                    } else if let Some(default) = default {
                        default.clone()
                    } else if *required {
                        return Err(EngineError::MissingInjectable(spec.name.clone()));
                    } else {
                        Value::Null
                    }
                }
            }
        };

        if spec.ignored {
            ignored.insert(spec.name.clone());
        }
        parameters.insert(spec.name.clone(), value);
    }

    // Anything left over was supplied but never declared.
    if let Some((unknown, _)) = supplied.into_iter().next() {
        return Err(EngineError::Bind(BindError::UnknownArgument(unknown)));
    }

    // Normalize: flatten nested dependency handles into the edge list,
    // preserving first-seen order and dropping duplicates so a task
    // depended on twice by the same parent gets one graph edge.
    let mut dependencies = Vec::new();
    let mut seen = HashSet::new();
    for value in parameters.values() {
        let mut found = Vec::new();
        value.collect_dependencies(&mut found);
        for index in found {
            if seen.insert(index) {
                dependencies.push(index);
            }
        }
    }

    Ok(Resolved {
        parameters,
        ignored,
        dependencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplied(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn missing_plain_argument_is_an_error() {
        let table = vec![ParamSpec::plain("x")];
        let err = resolve(&table, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::Bind(BindError::MissingArgument(_))));
    }

    #[test]
    fn unknown_argument_is_an_error() {
        let table = vec![ParamSpec::plain("x")];
        let err = resolve(&table, supplied(&[("x", Value::Int(1)), ("y", Value::Int(2))])).unwrap_err();
        assert!(matches!(err, EngineError::Bind(BindError::UnknownArgument(_))));
    }

    #[test]
    fn injectable_falls_back_to_default_when_absent() {
        let table = vec![ParamSpec::injectable("timeout", Some(Value::Int(30)), false)];
        let resolved = resolve(&table, BTreeMap::new()).unwrap();
        assert_eq!(resolved.parameters.get("timeout"), Some(&Value::Int(30)));
    }

    #[test]
    fn required_injectable_missing_everywhere_is_an_error() {
        let table = vec![ParamSpec::injectable("device", None, true)];
        let err = resolve(&table, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::MissingInjectable(name) if name == "device"));
    }

    #[test]
    fn ignored_parameter_is_tracked_separately() {
        let table = vec![ParamSpec::plain("device").ignored()];
        let resolved = resolve(&table, supplied(&[("device", Value::Str("cuda".into()))])).unwrap();
        assert!(resolved.ignored.contains("device"));
        assert_eq!(resolved.parameters.get("device"), Some(&Value::Str("cuda".into())));
    }

    #[test]
    fn injectable_parameter_can_also_be_ignored() {
        let table = vec![ParamSpec::injectable("device", Some(Value::Str("cpu".into())), false).ignored()];
        let resolved = resolve(&table, BTreeMap::new()).unwrap();
        assert!(resolved.ignored.contains("device"));
        assert_eq!(resolved.parameters.get("device"), Some(&Value::Str("cpu".into())));
    }

    #[test]
    fn injectable_reads_from_active_context_before_default() {
        use std::collections::HashMap;

        let mut bindings = HashMap::new();
        bindings.insert("device".to_string(), Value::Str("cuda".into()));
        let _guard = Context::scope(bindings);

        let table = vec![ParamSpec::injectable(
            "device",
            Some(Value::Str("cpu".into())),
            false,
        )];
        let resolved = resolve(&table, BTreeMap::new()).unwrap();
        assert_eq!(resolved.parameters.get("device"), Some(&Value::Str("cuda".into())));
    }
}
