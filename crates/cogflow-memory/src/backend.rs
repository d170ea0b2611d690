use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use cogflow_core::error::{CogError, Result};
use cogflow_core::traits::VectorStore;

use crate::store::EphemeralStore;

/// How a storage partition persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Backed by a durable path derived from the configured root and the
    /// storage id; stable across process restarts.
    Persistent(PathBuf),
    /// Memory-only; lost at process end.
    Ephemeral,
}

/// One cached storage partition: a vector-store client plus its identity.
pub struct StorageHandle {
    id: String,
    mode: StorageMode,
    store: Arc<dyn VectorStore>,
}

impl StorageHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> &StorageMode {
        &self.mode
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }
}

/// Registry-wide configuration, applied at first handle creation per id.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Root path for persistent partitions. None = all handles ephemeral.
    pub root: Option<PathBuf>,
}

/// Builds the vector-store client for a new handle.
pub type StoreFactory = Arc<dyn Fn(&str, &StorageMode) -> Result<Arc<dyn VectorStore>> + Send + Sync>;

struct Registry {
    handles: HashMap<String, Arc<StorageHandle>>,
    config: StorageConfig,
    factory: StoreFactory,
}

impl Registry {
    fn new() -> Self {
        Self {
            handles: HashMap::new(),
            config: StorageConfig::default(),
            factory: Arc::new(|_, _| Ok(Arc::new(EphemeralStore::new()))),
        }
    }
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::new()))
}

fn lock() -> Result<std::sync::MutexGuard<'static, Registry>> {
    registry()
        .lock()
        .map_err(|e| CogError::Storage(e.to_string()))
}

/// Set the registry configuration. Affects handles created afterwards;
/// already-cached handles keep their mode.
pub fn configure(config: StorageConfig) -> Result<()> {
    lock()?.config = config;
    Ok(())
}

/// Install the store factory used for new handles. The default factory
/// builds the in-process `EphemeralStore` regardless of mode.
pub fn set_factory(factory: StoreFactory) -> Result<()> {
    lock()?.factory = factory;
    Ok(())
}

/// Get the handle for a storage id, creating it on first use.
///
/// The registry is process-wide: concurrent callers for the same id receive
/// the same handle. Persistent handles map the id deterministically to
/// `<root>/<storage_id>`.
pub fn get_or_create(storage_id: &str) -> Result<Arc<StorageHandle>> {
    if storage_id.trim().is_empty() {
        return Err(CogError::InvalidArgument(
            "storage id must not be empty".into(),
        ));
    }

    let mut reg = lock()?;
    if let Some(handle) = reg.handles.get(storage_id) {
        return Ok(handle.clone());
    }

    let mode = match &reg.config.root {
        Some(root) => {
            let path = root.join(storage_id);
            std::fs::create_dir_all(&path)?;
            StorageMode::Persistent(path)
        }
        None => StorageMode::Ephemeral,
    };

    let store = (reg.factory)(storage_id, &mode)?;
    let handle = Arc::new(StorageHandle {
        id: storage_id.to_string(),
        mode,
        store,
    });

    debug!(storage_id = %storage_id, mode = ?handle.mode, "Storage handle created");
    reg.handles.insert(storage_id.to_string(), handle.clone());
    Ok(handle)
}

/// Drop all cached handles and reset configuration. Test/debug use only.
pub fn clear_registry() -> Result<()> {
    let mut reg = lock()?;
    *reg = Registry::new();
    Ok(())
}
