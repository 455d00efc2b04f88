//! Deterministic in-memory doubles for the external contracts.
//!
//! Used by unit and e2e tests where the real store and host are
//! unavailable. [`MemoryStore`] records the order of document writes so
//! FIFO assertions stay cheap, supports per-id failure injection, and lets
//! tests backdate an object's `ts` to simulate staleness.

use crate::store::{InventorySource, ObjectStore, RepositoryService};
use acp_common::{
    CatalogFetchError, InstalledInventory, ManagedObject, ObjectId, ObjectKind, RepositoryCatalog,
    StateValue, StoreError, now_ms,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// HashMap-backed implementation of [`ObjectStore`].
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, ManagedObject>>,
    states: RwLock<HashMap<String, StateValue>>,
    write_log: Mutex<Vec<ObjectId>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document without recording it in the write log. A zero `ts`
    /// is replaced with the current time, as the real store would on its
    /// first write.
    pub async fn seed_object(&self, mut object: ManagedObject) {
        if object.ts == 0 {
            object.ts = now_ms();
        }
        self.objects
            .write()
            .await
            .insert(object.id.as_str().to_string(), object);
    }

    /// Overwrite a seeded object's store timestamp, e.g. to move its last
    /// fetch into the past.
    pub async fn backdate_ts(&self, id: &str, ts: i64) {
        if let Some(object) = self.objects.write().await.get_mut(id) {
            object.ts = ts;
        }
    }

    /// Make every subsequent read of `id` fail.
    pub fn fail_reads_for(&self, id: &str) {
        self.failing_reads
            .lock()
            .expect("failing_reads mutex poisoned")
            .insert(id.to_string());
    }

    /// Make every subsequent write of `id` fail.
    pub fn fail_writes_for(&self, id: &str) {
        self.failing_writes
            .lock()
            .expect("failing_writes mutex poisoned")
            .insert(id.to_string());
    }

    /// Ids of all `set_object` calls that reached the store, in order.
    pub fn write_log(&self) -> Vec<ObjectId> {
        self.write_log
            .lock()
            .expect("write_log mutex poisoned")
            .clone()
    }

    /// Snapshot of one document.
    pub async fn object(&self, id: &str) -> Option<ManagedObject> {
        self.objects.read().await.get(id).cloned()
    }

    /// Snapshot of one state.
    pub async fn state(&self, id: &str) -> Option<StateValue> {
        self.states.read().await.get(id).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, id: &ObjectId) -> Result<Option<ManagedObject>, StoreError> {
        let failing = self
            .failing_reads
            .lock()
            .expect("failing_reads mutex poisoned")
            .contains(id.as_str());
        if failing {
            return Err(StoreError::read(id.as_str(), "injected read failure"));
        }
        Ok(self.objects.read().await.get(id.as_str()).cloned())
    }

    async fn set_object(&self, id: &ObjectId, mut object: ManagedObject) -> Result<(), StoreError> {
        let failing = self
            .failing_writes
            .lock()
            .expect("failing_writes mutex poisoned")
            .contains(id.as_str());
        if failing {
            return Err(StoreError::write(id.as_str(), "injected write failure"));
        }
        object.ts = now_ms();
        self.objects
            .write()
            .await
            .insert(id.as_str().to_string(), object);
        self.write_log
            .lock()
            .expect("write_log mutex poisoned")
            .push(id.clone());
        Ok(())
    }

    async fn query_by_pattern(
        &self,
        start_key: &str,
        end_key: &str,
        kind: ObjectKind,
    ) -> Result<Vec<ManagedObject>, StoreError> {
        let objects = self.objects.read().await;
        let mut hits: Vec<ManagedObject> = objects
            .values()
            .filter(|object| {
                object.kind == kind
                    && object.id.as_str() >= start_key
                    && object.id.as_str() <= end_key
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    async fn get_state(&self, id: &ObjectId) -> Result<Option<StateValue>, StoreError> {
        Ok(self.states.read().await.get(id.as_str()).cloned())
    }

    async fn set_state(&self, id: &ObjectId, state: StateValue) -> Result<(), StoreError> {
        self.states
            .write()
            .await
            .insert(id.as_str().to_string(), state);
        Ok(())
    }
}

/// One recorded catalog request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    pub host: String,
    pub repo: String,
    pub update: bool,
}

/// Scriptable implementation of [`RepositoryService`]. Results are
/// consumed FIFO; every request is recorded.
#[derive(Default)]
pub struct ScriptedRepositoryService {
    results: Mutex<Vec<Result<RepositoryCatalog, CatalogFetchError>>>,
    calls: Mutex<Vec<CatalogRequest>>,
}

impl ScriptedRepositoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scripted result.
    pub fn push_result(&self, result: Result<RepositoryCatalog, CatalogFetchError>) {
        self.results
            .lock()
            .expect("results mutex poisoned")
            .push(result);
    }

    /// Snapshot of all requests received so far.
    pub fn calls(&self) -> Vec<CatalogRequest> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

#[async_trait]
impl RepositoryService for ScriptedRepositoryService {
    async fn request_catalog(
        &self,
        host: &str,
        repo: &str,
        update: bool,
    ) -> Result<RepositoryCatalog, CatalogFetchError> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(CatalogRequest {
                host: host.to_string(),
                repo: repo.to_string(),
                update,
            });

        let mut results = self.results.lock().expect("results mutex poisoned");
        if results.is_empty() {
            return Err(CatalogFetchError::Transport(
                "no scripted result".to_string(),
            ));
        }
        results.remove(0)
    }
}

/// Fixed implementation of [`InventorySource`].
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    installed: InstalledInventory,
}

impl StaticInventory {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            installed: entries
                .iter()
                .map(|(name, version)| (name.to_string(), version.to_string()))
                .collect(),
        }
    }
}

impl InventorySource for StaticInventory {
    fn list_installed(&self) -> InstalledInventory {
        self.installed.clone()
    }
}
