//! The dynamic [`Value`] model used for signature-contributing parameters,
//! and the deterministic [`ValueHasher`] that folds a `Value` into a 64-bit
//! digest.
//!
//! Task *outputs* and dependency-typed results are never represented as
//! `Value` — they stay fully-typed `Dynamic` slots (see [`crate::engine`]).
//! `Value` exists only for the things that must be hashed into a task's
//! [`crate::signature::Signature`]: plain/injectable/ignored parameters and
//! the dependency placeholders that stand in for another task's output.

use std::collections::BTreeMap;

use petgraph::graph::NodeIndex;
use xxhash_rust::xxh3::Xxh3;

use crate::error::UnhashableValue;
use crate::signature::Signature;

/// A reference to another task's not-yet-computed output, as it appears
/// inside a parameter value. Carries the dependency edge (`index`) and the
/// owning task's signature, which is what actually gets hashed (`spec.md`
/// §4.1 "Lazy output handle").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleRef {
    pub(crate) index: NodeIndex,
    pub(crate) signature: Signature,
}

impl HandleRef {
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }
}

/// A parameter value, in the shape the signature engine and the parameter
/// resolver both understand.
///
/// This is a tagged union over every kind of value `spec.md` §4.1 names:
/// primitives, ordered sequences, mappings, sets, and lazy output handles.
/// There is deliberately no "unsupported" arm — a `Value` can only be
/// constructed for a kind this crate knows how to hash, so `UnhashableValue`
/// is raised earlier, by [`crate::param`] when converting a caller's argument
/// into a `Value` fails (see the `IntoValue` boundary, not this enum).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Handle(HandleRef),
}

impl Value {
    /// Walks this value (and any nested container) collecting every
    /// dependency edge it references. Mirrors the teacher's
    /// `Dependencies::resolve` container-walking in `engine/mod.rs`, just
    /// generalized from static tuples to an arbitrary dynamic tree.
    pub(crate) fn collect_dependencies(&self, out: &mut Vec<NodeIndex>) {
        match self {
            Value::Handle(h) => out.push(h.index),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                for item in items {
                    item.collect_dependencies(out);
                }
            }
            Value::Map(entries) => {
                for (k, v) in entries {
                    k.collect_dependencies(out);
                    v.collect_dependencies(out);
                }
            }
            _ => {}
        }
    }
}

/// One-byte type tags, fixed for the lifetime of the on-disk/signature format.
mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const STR: u8 = 4;
    pub const SEQUENCE: u8 = 5;
    pub const MAP: u8 = 6;
    pub const SET: u8 = 7;
    pub const HANDLE: u8 = 8;
}

const SEQUENCE_LIST: u8 = 0;
const SEQUENCE_TUPLE: u8 = 1;

/// Deterministic, order-invariant hasher over [`Value`] trees.
///
/// Built on `xxhash-rust`'s XXH3-64 — the "fast non-cryptographic hash"
/// `spec.md` §4.1 calls for (the teacher reaches for `blake3` for content
/// addressing; XXH3 is the right tool here since this hash is on the hot
/// path of every task construction, not just persistence I/O — see
/// `DESIGN.md`). Integers are big-endian; floats are big-endian IEEE-754
/// bits; strings are length-prefixed UTF-8 — the endianness choice the spec
/// leaves open, resolved once here.
pub struct ValueHasher {
    inner: Xxh3,
}

impl Default for ValueHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueHasher {
    pub fn new() -> Self {
        Self { inner: Xxh3::new() }
    }

    /// Feeds a parameter name into the stream, length-prefixed so that no
    /// two distinct (name, value) sequences can collide by concatenation.
    pub fn write_name(&mut self, name: &str) {
        self.inner.update(&(name.len() as u64).to_be_bytes());
        self.inner.update(name.as_bytes());
    }

    /// Feeds a raw, already-finalized 64-bit digest into the stream (used to
    /// compose [`hash_value`] sub-hashes, e.g. for set elements and
    /// parameter contributions).
    pub fn write_digest(&mut self, digest: u64) {
        self.inner.update(&digest.to_be_bytes());
    }

    pub fn write_value(&mut self, value: &Value) -> Result<(), UnhashableValue> {
        match value {
            Value::Null => {
                self.inner.update(&[tag::NULL]);
            }
            Value::Bool(b) => {
                self.inner.update(&[tag::BOOL, *b as u8]);
            }
            Value::Int(i) => {
                self.inner.update(&[tag::INT]);
                self.inner.update(&i.to_be_bytes());
            }
            Value::Float(f) => {
                self.inner.update(&[tag::FLOAT]);
                self.inner.update(&f.to_be_bytes());
            }
            Value::Str(s) => {
                self.inner.update(&[tag::STR]);
                self.inner.update(&(s.len() as u64).to_be_bytes());
                self.inner.update(s.as_bytes());
            }
            Value::List(items) => self.write_sequence(SEQUENCE_LIST, items)?,
            Value::Tuple(items) => self.write_sequence(SEQUENCE_TUPLE, items)?,
            Value::Map(entries) => {
                self.inner.update(&[tag::MAP]);

                // Total order derived from each key's canonical byte form.
                let mut sorted: Vec<(Vec<u8>, &Value, &Value)> = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    sorted.push((canonical_bytes(k)?, k, v));
                }
                sorted.sort_by(|a, b| a.0.cmp(&b.0));

                self.inner.update(&(sorted.len() as u64).to_be_bytes());
                for (_, k, v) in sorted {
                    self.write_value(k)?;
                    self.write_value(v)?;
                }
            }
            Value::Set(items) => {
                self.inner.update(&[tag::SET]);
                self.inner.update(&(items.len() as u64).to_be_bytes());

                let mut digests = items
                    .iter()
                    .map(hash_value)
                    .collect::<Result<Vec<_>, _>>()?;
                digests.sort_unstable();

                for digest in digests {
                    self.write_digest(digest);
                }
            }
            Value::Handle(handle_ref) => {
                self.inner.update(&[tag::HANDLE]);
                self.write_digest(handle_ref.signature.as_u64());
            }
        }

        Ok(())
    }

    fn write_sequence(&mut self, discriminator: u8, items: &[Value]) -> Result<(), UnhashableValue> {
        self.inner.update(&[tag::SEQUENCE, discriminator]);
        self.inner.update(&(items.len() as u64).to_be_bytes());
        for item in items {
            self.write_value(item)?;
        }
        Ok(())
    }

    pub fn finish(self) -> u64 {
        self.inner.digest()
    }
}

/// Hashes a single value in isolation, starting from a fresh stream. Used to
/// produce sortable set-element digests and per-parameter contributions.
pub fn hash_value(value: &Value) -> Result<u64, UnhashableValue> {
    let mut hasher = ValueHasher::new();
    hasher.write_value(value)?;
    Ok(hasher.finish())
}

/// Canonical byte encoding of a value, used only to derive the sort order of
/// map keys (`spec.md` §4.1 "a total order derived from the key's canonical
/// string form"). Reuses the same chunk encoding as hashing so two distinct
/// keys never collide in sort order any more than they would in the hash
/// itself.
fn canonical_bytes(value: &Value) -> Result<Vec<u8>, UnhashableValue> {
    let mut hasher = ValueHasher::new();
    hasher.write_value(value)?;
    Ok(hasher.inner.digest128().to_be_bytes().to_vec())
}

/// Converts a Rust value into the dynamic [`Value`] representation.
///
/// Implemented for every primitive and container kind the signature engine
/// understands. A type with no impl simply cannot be passed as a
/// parameter — the `UnhashableValue` arm of `spec.md` is therefore enforced
/// at compile time for anything but the deliberately-dynamic entry points
/// (see [`crate::param`]).
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Null
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

macro_rules! impl_into_value_int {
    ($($t:ty),*) => {
        $(impl IntoValue for $t {
            fn into_value(self) -> Value {
                Value::Int(self as i64)
            }
        })*
    };
}

impl_into_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for BTreeMap<K, V> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }
}

macro_rules! impl_into_value_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoValue),+> IntoValue for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_value(self) -> Value {
                let ($($name,)+) = self;
                Value::Tuple(vec![$($name.into_value()),+])
            }
        }
    };
}

impl_into_value_tuple!(A);
impl_into_value_tuple!(A, B);
impl_into_value_tuple!(A, B, C);
impl_into_value_tuple!(A, B, C, D);
impl_into_value_tuple!(A, B, C, D, E);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_hash_is_order_independent_for_params() {
        // The parameter ordering invariance itself is tested in signature.rs;
        // here we only check value-level determinism.
        let a = Value::Int(1);
        let b = Value::Int(1);
        assert_eq!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn list_vs_tuple_hash_differently() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let tuple = Value::Tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_ne!(hash_value(&list).unwrap(), hash_value(&tuple).unwrap());
    }

    #[test]
    fn map_insertion_order_does_not_affect_hash() {
        let a = Value::Map(vec![
            (Value::Str("a".into()), Value::Int(1)),
            (Value::Str("b".into()), Value::Int(2)),
        ]);
        let b = Value::Map(vec![
            (Value::Str("b".into()), Value::Int(2)),
            (Value::Str("a".into()), Value::Int(1)),
        ]);
        assert_eq!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn set_element_order_does_not_affect_hash() {
        let a = Value::Set(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let b = Value::Set(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn distinct_values_hash_differently() {
        assert_ne!(
            hash_value(&Value::Int(1)).unwrap(),
            hash_value(&Value::Int(2)).unwrap()
        );
        assert_ne!(
            hash_value(&Value::Str("cuda".into())).unwrap(),
            hash_value(&Value::Str("cpu".into())).unwrap()
        );
    }
}
