//! The signature engine: folds a task's name, version and contributing
//! parameters into the single 64-bit [`Signature`] that drives memoization.

use std::collections::BTreeMap;
use std::collections::HashSet;

use crate::error::UnhashableValue;
use crate::value::{hash_value, Value, ValueHasher};

/// A task's content-address: identical name, version and contributing
/// parameter values always produce the same signature, regardless of the
/// order those parameters were supplied in at the call site (`spec.md` §8,
/// invariant 1 and scenario S1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(u64);

impl Signature {
    pub(crate) fn from_u64(value: u64) -> Self {
        Signature(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Hex rendering used for cache file names and diagnostics.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Computes a task's signature from its name, declared version and final
/// (post-resolution) parameter map, skipping parameters classified as
/// ignored. Parameter names are folded in lexicographic order — the
/// `BTreeMap` already guarantees this — which is what makes the signature
/// independent of keyword-argument order at the call site.
pub fn compute(
    name: &str,
    version: u64,
    parameters: &BTreeMap<String, Value>,
    ignored: &HashSet<String>,
) -> Result<Signature, UnhashableValue> {
    let mut hasher = ValueHasher::new();
    hasher.write_name(name);
    hasher.write_digest(version);

    for (param_name, value) in parameters {
        if ignored.contains(param_name) {
            continue;
        }

        let value_digest = hash_value(value).map_err(|_| UnhashableValue::Unsupported {
            parameter: param_name.clone(),
            reason: "value could not be hashed into a contributing parameter digest".to_string(),
        })?;

        hasher.write_name(param_name);
        hasher.write_digest(value_digest);
    }

    Ok(Signature::from_u64(hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn signature_is_independent_of_supplied_argument_order() {
        // BTreeMap already sorts by key, so a and b below are identical
        // regardless of the order pairs were pushed in before collection.
        let a = params(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = params(&[("y", Value::Int(2)), ("x", Value::Int(1))]);

        let ignored = HashSet::new();
        let sig_a = compute("add", 1, &a, &ignored).unwrap();
        let sig_b = compute("add", 1, &b, &ignored).unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn differing_version_changes_signature() {
        let params = params(&[("x", Value::Int(1))]);
        let ignored = HashSet::new();
        let v1 = compute("task", 1, &params, &ignored).unwrap();
        let v2 = compute("task", 2, &params, &ignored).unwrap();
        assert_ne!(v1, v2);
    }

    #[test]
    fn ignored_parameter_does_not_affect_signature() {
        let with_device = params(&[("x", Value::Int(1)), ("device", Value::Str("cuda".into()))]);
        let without_device = params(&[("x", Value::Int(1)), ("device", Value::Str("cpu".into()))]);

        let mut ignored = HashSet::new();
        ignored.insert("device".to_string());

        let sig_a = compute("task", 1, &with_device, &ignored).unwrap();
        let sig_b = compute("task", 1, &without_device, &ignored).unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn differing_name_changes_signature() {
        let params = params(&[("x", Value::Int(1))]);
        let ignored = HashSet::new();
        let a = compute("add", 1, &params, &ignored).unwrap();
        let b = compute("mul", 1, &params, &ignored).unwrap();
        assert_ne!(a, b);
    }
}
