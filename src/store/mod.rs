//! The persistence store (`spec.md` §2 component G, §4.7): an opt-in,
//! content-addressed cache keyed by task signature.

mod file;

use crate::error::EngineError;
use crate::signature::Signature;

pub use file::FileStore;

/// Which serializer produced a cache entry's payload, recorded in the
/// on-disk header (`spec.md` §6) so `load` can pick the matching decoder
/// without the caller having to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Binary,
}

impl Format {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Format::Json => 0,
            Format::Binary => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self, EngineError> {
        match tag {
            0 => Ok(Format::Json),
            1 => Ok(Format::Binary),
            other => Err(EngineError::CacheCorruption(format!(
                "unrecognized format tag {other} in cache header"
            ))),
        }
    }
}

/// A content-addressed cache backend. `load`/`save` operate on raw,
/// already-(de)serialized payload bytes — the engine's
/// [`crate::engine::persist`] layer is what turns a task's typed output into
/// bytes and back.
pub trait PersistenceStore: Send + Sync {
    /// `true` if a cache entry exists for `signature`, without validating
    /// its header.
    fn exists(&self, signature: Signature) -> bool;

    /// Loads and header-validates the cache entry for `signature`. Returns
    /// `Ok(None)` on a plain cache miss (no entry at all); returns
    /// `Err(EngineError::CacheCorruption)` if an entry exists but its header
    /// doesn't match `expected_name`/`expected_version`, or is otherwise
    /// malformed — the caller falls back to recomputation either way.
    fn load(
        &self,
        signature: Signature,
        expected_name: &str,
        expected_version: u64,
    ) -> Result<Option<(Format, Vec<u8>)>, EngineError>;

    fn save(
        &self,
        signature: Signature,
        task_name: &str,
        version: u64,
        format: Format,
        payload: &[u8],
    ) -> Result<(), EngineError>;

    fn invalidate(&self, signature: Signature) -> Result<(), EngineError>;
}

/// A store that never remembers anything: every `load` misses, `save` is a
/// no-op. The default when persistence is disabled (`spec.md` §6
/// `PURPLE_TITANIUM_PERSISTENCE=0`), and useful in tests that want
/// signature-level memoization without touching disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl PersistenceStore for NullStore {
    fn exists(&self, _signature: Signature) -> bool {
        false
    }

    fn load(
        &self,
        _signature: Signature,
        _expected_name: &str,
        _expected_version: u64,
    ) -> Result<Option<(Format, Vec<u8>)>, EngineError> {
        Ok(None)
    }

    fn save(
        &self,
        _signature: Signature,
        _task_name: &str,
        _version: u64,
        _format: Format,
        _payload: &[u8],
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn invalidate(&self, _signature: Signature) -> Result<(), EngineError> {
        Ok(())
    }
}
