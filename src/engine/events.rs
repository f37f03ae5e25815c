//! The optional event bus (`spec.md` §2 component H, §4.8): synchronous
//! observer notifications dispatched from whichever thread ran the task.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::signature::Signature;

/// Receives scheduler/executor notifications. All methods have a no-op
/// default so an observer only needs to implement what it cares about.
pub trait Observer: Send + Sync {
    fn task_started(&self, _name: &str, _signature: Signature) {}
    fn task_completed(&self, _name: &str, _signature: Signature, _duration: Duration) {}
    fn task_failed(&self, _name: &str, _signature: Signature, _error: &str) {}
    fn cache_hit(&self, _name: &str, _signature: Signature) {}
    fn cache_miss(&self, _name: &str, _signature: Signature) {}
}

/// Holds every observer registered for a run and fans notifications out to
/// all of them. An observer that panics is caught and logged rather than
/// aborting the run — mirrors the teacher's own `catch_unwind` boundary
/// around task bodies in `executor.rs`, applied here to observers instead.
#[derive(Default, Clone)]
pub struct EventBus {
    observers: Vec<Arc<dyn Observer>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            observers: Vec::new(),
        }
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub(crate) fn task_started(&self, name: &str, signature: Signature) {
        self.dispatch(|o| o.task_started(name, signature));
    }

    pub(crate) fn task_completed(&self, name: &str, signature: Signature, duration: Duration) {
        self.dispatch(|o| o.task_completed(name, signature, duration));
    }

    pub(crate) fn task_failed(&self, name: &str, signature: Signature, error: &str) {
        self.dispatch(|o| o.task_failed(name, signature, error));
    }

    pub(crate) fn cache_hit(&self, name: &str, signature: Signature) {
        self.dispatch(|o| o.cache_hit(name, signature));
    }

    pub(crate) fn cache_miss(&self, name: &str, signature: Signature) {
        self.dispatch(|o| o.cache_miss(name, signature));
    }

    fn dispatch(&self, f: impl Fn(&Arc<dyn Observer>)) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| f(observer))).is_err() {
                tracing::error!("observer panicked while handling a scheduler event");
            }
        }
    }
}
