//! The lazy output handle — a typed, `Copy` token pointing at a node in the
//! task graph, mirroring the teacher's `Handle<T>` in `task.rs`.

use std::marker::PhantomData;

use petgraph::graph::NodeIndex;

use crate::signature::Signature;
use crate::value::{HandleRef, IntoValue, Value};

/// A reference to a task's not-yet-computed output. Cheap to copy, carries
/// no data of its own beyond the graph position and the task's signature —
/// the actual output lives in the graph until a run materializes it.
pub struct Handle<T> {
    pub(crate) index: NodeIndex,
    pub(crate) signature: Signature,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: NodeIndex, signature: Signature) -> Self {
        Handle {
            index,
            signature,
            _phantom: PhantomData,
        }
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Erases the output type, for passing to [`crate::Engine::run`] or
    /// storing alongside handles of different output types.
    pub fn erase(self) -> AnyHandle {
        AnyHandle { index: self.index }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("signature", &self.signature)
            .finish()
    }
}

impl<T> IntoValue for Handle<T> {
    fn into_value(self) -> Value {
        Value::Handle(HandleRef {
            index: self.index,
            signature: self.signature,
        })
    }
}

/// A type-erased [`Handle`], used where a run target's output type isn't
/// statically known (e.g. a heterogeneous batch passed to
/// [`crate::Engine::run`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyHandle {
    pub(crate) index: NodeIndex,
}

impl AnyHandle {
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl<T> From<Handle<T>> for AnyHandle {
    fn from(handle: Handle<T>) -> Self {
        AnyHandle { index: handle.index }
    }
}
