//! The ambient context stack: a thread-local chain of immutable binding
//! frames that injectable parameters are resolved against.
//!
//! Grounded on the save/restore-around-a-closure idiom found in the
//! reference corpus's `format_with_flags` (a `thread_local!` cell saved,
//! mutated, restored after the call) combined with the RAII "pop on drop"
//! guard the teacher already leans on for `tracing::Span::enter()` in
//! `executor.rs`. Here the stack is a `Vec` rather than a single cell because
//! frames nest arbitrarily deep and need parent lookup, not just a flat
//! save/restore pair.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// One immutable layer of context bindings. Lookups walk from the innermost
/// frame outward to the root, so a child frame's binding shadows its
/// ancestors' (`spec.md` §3 "child frame shadows parent on name collision").
#[derive(Debug)]
pub struct ContextFrame {
    bindings: HashMap<String, Value>,
    parent: Option<Arc<ContextFrame>>,
}

impl ContextFrame {
    fn root() -> Arc<Self> {
        Arc::new(ContextFrame {
            bindings: HashMap::new(),
            parent: None,
        })
    }

    /// Looks up `name`, starting at this frame and walking to the root.
    /// Returns `None` if no frame binds it; a bound `Value::Null` is
    /// distinguishable from "unbound" because it comes back as `Some(&Value::Null)`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.bindings.get(name) {
            return Some(value);
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// The full set of bindings visible from this frame, with child bindings
    /// taking precedence over ancestors. Used for equality (`spec.md` §3:
    /// "frames are equal iff their deep mapping of visible bindings match")
    /// and introspection; not on any hot path.
    pub fn visible_bindings(&self) -> HashMap<String, Value> {
        let mut merged = self
            .parent
            .as_ref()
            .map(|p| p.visible_bindings())
            .unwrap_or_default();
        for (k, v) in &self.bindings {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

impl PartialEq for ContextFrame {
    fn eq(&self, other: &Self) -> bool {
        self.visible_bindings() == other.visible_bindings()
    }
}

thread_local! {
    static STACK: RefCell<Vec<Arc<ContextFrame>>> = RefCell::new(vec![ContextFrame::root()]);
}

/// Entry point for reading and extending the ambient context on the current
/// thread. Each OS thread gets its own independent stack — the scheduler is
/// responsible for installing a captured frame on worker threads before
/// running a task body (`spec.md` §5 point (i)).
pub struct Context;

impl Context {
    /// The innermost frame currently active on this thread.
    pub fn current() -> Arc<ContextFrame> {
        STACK.with(|stack| stack.borrow().last().expect("root frame is never popped").clone())
    }

    /// Pushes a new frame layering `bindings` on top of the current one and
    /// returns a guard that pops it again on drop — including on unwind, so
    /// a panicking task body never corrupts another thread's... another
    /// scope's view of the stack.
    pub fn scope(bindings: HashMap<String, Value>) -> ContextScope {
        let frame = Arc::new(ContextFrame {
            bindings,
            parent: Some(Self::current()),
        });
        STACK.with(|stack| stack.borrow_mut().push(frame));
        ContextScope { _private: () }
    }

    /// Installs `frame` as the active frame on the current thread for the
    /// duration of the returned guard. Used by the parallel scheduler to
    /// restore a task's construction-time frame on whichever worker thread
    /// ends up executing it.
    pub fn install(frame: Arc<ContextFrame>) -> ContextScope {
        STACK.with(|stack| stack.borrow_mut().push(frame));
        ContextScope { _private: () }
    }
}

/// RAII guard returned by [`Context::scope`]/[`Context::install`]. Pops
/// exactly the frame it pushed when dropped.
#[must_use = "the pushed frame is popped as soon as this guard is dropped"]
pub struct ContextScope {
    _private: (),
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert!(stack.len() > 1, "root frame must never be popped");
            stack.pop();
        });
    }
}
