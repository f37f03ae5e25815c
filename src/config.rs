//! Environment-driven configuration (`spec.md` §6 "Environment"), resolved
//! once rather than read ad hoc from call sites — the teacher's own
//! environment coupling is similarly narrow (just `RUST_LOG`, read once by
//! the `logging` feature's subscriber init).

use std::env;
use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::error::EngineError;
use crate::store::{FileStore, NullStore, PersistenceStore};

const CACHE_DIR_VAR: &str = "PURPLE_TITANIUM_CACHE_DIR";
const PERSISTENCE_VAR: &str = "PURPLE_TITANIUM_PERSISTENCE";
const DEFAULT_CACHE_DIR: &str = ".purple-titanium-cache";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_dir: Utf8PathBuf,
    pub persistence_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_dir: Utf8PathBuf::from(DEFAULT_CACHE_DIR),
            persistence_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Reads `PURPLE_TITANIUM_CACHE_DIR` and `PURPLE_TITANIUM_PERSISTENCE`
    /// (`"1"`/`"0"`, defaulting to persistence on) from the process
    /// environment.
    pub fn from_env() -> Self {
        let cache_dir = env::var(CACHE_DIR_VAR)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|_| Utf8PathBuf::from(DEFAULT_CACHE_DIR));

        let persistence_enabled = env::var(PERSISTENCE_VAR)
            .map(|v| v != "0")
            .unwrap_or(true);

        EngineConfig {
            cache_dir,
            persistence_enabled,
        }
    }

    /// Builds the persistence store this configuration describes: a
    /// [`FileStore`] rooted at `cache_dir` if persistence is enabled,
    /// otherwise a [`NullStore`].
    pub fn store(&self) -> Result<Arc<dyn PersistenceStore>, EngineError> {
        if self.persistence_enabled {
            Ok(Arc::new(FileStore::open(&self.cache_dir)?))
        } else {
            Ok(Arc::new(NullStore))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_persistence_enabled() {
        let config = EngineConfig::default();
        assert!(config.persistence_enabled);
        assert_eq!(config.cache_dir, Utf8PathBuf::from(DEFAULT_CACHE_DIR));
    }
}
