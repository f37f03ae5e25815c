//! Bridges a task's statically-typed output to the byte-oriented
//! persistence store (`spec.md` §4.7). A task only gets a cache entry if it
//! opts in via `TaskDef::build_cached`, since persistence requires
//! `Serialize + DeserializeOwned` on the output type — a bound the engine
//! cannot retroactively apply to the type-erased [`Dynamic`] every other
//! task stores.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::task::Dynamic;
use crate::error::EngineError;
use crate::store::Format;

/// Per-task-type encode/decode pair, erased behind a trait object so the
/// graph can hold tasks of many different persisted output types
/// uniformly.
pub(crate) trait ErasedPersist: Send + Sync {
    fn format(&self) -> Format;
    fn encode(&self, value: &Dynamic) -> Result<Vec<u8>, EngineError>;
    fn decode(&self, bytes: &[u8]) -> Result<Dynamic, EngineError>;
}

pub(crate) struct TypedPersist<R> {
    format: Format,
    _phantom: PhantomData<fn() -> R>,
}

impl<R> TypedPersist<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(format: Format) -> Arc<dyn ErasedPersist> {
        Arc::new(TypedPersist {
            format,
            _phantom: PhantomData,
        })
    }
}

impl<R> ErasedPersist for TypedPersist<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn format(&self) -> Format {
        self.format
    }

    fn encode(&self, value: &Dynamic) -> Result<Vec<u8>, EngineError> {
        let concrete = value
            .downcast_ref::<R>()
            .expect("ErasedPersist::encode called with the wrong concrete output type");

        match self.format {
            Format::Json => Ok(serde_json::to_vec(concrete)?),
            Format::Binary => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(concrete, &mut buf)?;
                Ok(buf)
            }
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Dynamic, EngineError> {
        match self.format {
            Format::Json => {
                let value: R = serde_json::from_slice(bytes)?;
                Ok(Arc::new(value))
            }
            Format::Binary => {
                let value: R = ciborium::de::from_reader(bytes)?;
                Ok(Arc::new(value))
            }
        }
    }
}
