//! Key material stores
//!
//! Reads are shared; a write installs a fresh `Arc<KeyEntry>` in place of the
//! old one, so a reader holding an entry never observes a partial update.

use crate::cipher::keys::{KeyEntry, SchemeKey};
use crate::error::UnsealError;
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Narrow store interface the cipher engine depends on
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, key: &SchemeKey) -> Option<Arc<KeyEntry>>;

    async fn put(&self, key: SchemeKey, entry: Arc<KeyEntry>);

    async fn evict(&self, key: &SchemeKey);
}

/// In-memory store backed by moka
#[derive(Clone)]
pub struct MemoryKeyStore {
    cache: Cache<SchemeKey, Arc<KeyEntry>>,
}

impl MemoryKeyStore {
    /// Create a store whose entries live until evicted
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().max_capacity(1024).build(),
        }
    }

    /// Create a store whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(1024)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, key: &SchemeKey) -> Option<Arc<KeyEntry>> {
        self.cache.get(key).await
    }

    async fn put(&self, key: SchemeKey, entry: Arc<KeyEntry>) {
        self.cache.insert(key, entry).await;
    }

    async fn evict(&self, key: &SchemeKey) {
        self.cache.invalidate(key).await;
    }
}

/// One row of the persisted flat table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    provider: String,
    scheme_version: u32,
    #[serde(flatten)]
    entry: KeyEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyTable {
    keys: Vec<KeyRecord>,
}

/// JSON-file store: `(provider, scheme_version) -> key material`
pub struct FileKeyStore {
    path: PathBuf,
    memory: MemoryKeyStore,
    table: Mutex<BTreeMap<SchemeKey, Arc<KeyEntry>>>,
}

impl FileKeyStore {
    /// Open the store, loading any existing table at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UnsealError> {
        let path = path.as_ref().to_path_buf();
        let memory = MemoryKeyStore::new();
        let mut table = BTreeMap::new();

        if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let loaded: KeyTable = serde_json::from_str(&content)?;
            for record in loaded.keys {
                let key = SchemeKey::new(&record.provider, record.scheme_version);
                if let Err(e) = record.entry.material.check() {
                    warn!(key = %key, error = %e, "Dropping malformed key entry");
                    continue;
                }
                let entry = Arc::new(record.entry);
                memory.put(key.clone(), entry.clone()).await;
                table.insert(key, entry);
            }
            info!("Loaded {} key entries from {}", table.len(), path.display());
        }

        Ok(Self {
            path,
            memory,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }

    /// Drop entries superseded by a newer scheme version of the same provider
    pub async fn prune_stale(&self, current: &HashMap<String, Vec<u32>>) -> usize {
        let mut table = self.table.lock().await;
        let stale: Vec<SchemeKey> = table
            .keys()
            .filter(|key| match current.get(&key.provider) {
                Some(versions) => {
                    !versions.contains(&key.version)
                        && versions.iter().any(|&v| key.version < v)
                }
                None => false,
            })
            .cloned()
            .collect();

        for key in &stale {
            table.remove(key);
            self.memory.evict(key).await;
            debug!(key = %key, "Pruned stale key entry");
        }
        if !stale.is_empty() {
            self.persist(&table).await;
        }
        stale.len()
    }

    async fn persist(&self, table: &BTreeMap<SchemeKey, Arc<KeyEntry>>) {
        if let Err(e) = self.write_table(table).await {
            warn!("Failed to persist key store {}: {}", self.path.display(), e);
        }
    }

    async fn write_table(
        &self,
        table: &BTreeMap<SchemeKey, Arc<KeyEntry>>,
    ) -> Result<(), UnsealError> {
        let snapshot = KeyTable {
            keys: table
                .iter()
                .map(|(key, entry)| KeyRecord {
                    provider: key.provider.clone(),
                    scheme_version: key.version,
                    entry: entry.as_ref().clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn get(&self, key: &SchemeKey) -> Option<Arc<KeyEntry>> {
        self.memory.get(key).await
    }

    async fn put(&self, key: SchemeKey, entry: Arc<KeyEntry>) {
        let mut table = self.table.lock().await;
        self.memory.put(key.clone(), entry.clone()).await;
        table.insert(key, entry);
        self.persist(&table).await;
    }

    async fn evict(&self, key: &SchemeKey) {
        let mut table = self.table.lock().await;
        self.memory.evict(key).await;
        if table.remove(key).is_some() {
            self.persist(&table).await;
        }
    }
}
