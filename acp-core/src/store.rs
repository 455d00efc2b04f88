//! Contracts for the external collaborators of the control plane.
//!
//! The engines never talk to a concrete store, host, or package inventory;
//! they go through these traits so every external surface can be mocked in
//! deterministic tests (see [`crate::memory`]).

use acp_common::{
    CatalogFetchError, InstalledInventory, ManagedObject, ObjectId, ObjectKind, RepositoryCatalog,
    StateValue, StoreError,
};
use async_trait::async_trait;

/// The shared external object/state store.
///
/// Documents are individually atomic; the store refreshes an object's `ts`
/// on every write. Reads may interleave freely, writes carry no ordering
/// guarantee of their own — ordering is imposed by the ownership queue.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one document; `Ok(None)` when the id does not exist.
    async fn get_object(&self, id: &ObjectId) -> Result<Option<ManagedObject>, StoreError>;

    /// Create or replace one document.
    async fn set_object(&self, id: &ObjectId, object: ManagedObject) -> Result<(), StoreError>;

    /// Lexical key-range scan over documents of one kind.
    ///
    /// Returns every document whose id satisfies
    /// `start_key <= id <= end_key`, ordered by id.
    async fn query_by_pattern(
        &self,
        start_key: &str,
        end_key: &str,
        kind: ObjectKind,
    ) -> Result<Vec<ManagedObject>, StoreError>;

    /// Fetch one scalar state; `Ok(None)` when never written.
    async fn get_state(&self, id: &ObjectId) -> Result<Option<StateValue>, StoreError>;

    /// Write one scalar state.
    async fn set_state(&self, id: &ObjectId, state: StateValue) -> Result<(), StoreError>;
}

/// The remote repository authority, addressed through a host entity.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    /// Ask `host` for the catalog of repository `repo`. The `update` flag
    /// requests a fresh upstream fetch rather than the host's cache.
    async fn request_catalog(
        &self,
        host: &str,
        repo: &str,
        update: bool,
    ) -> Result<RepositoryCatalog, CatalogFetchError>;
}

/// Local, synchronous source of currently installed package versions.
pub trait InventorySource: Send + Sync {
    /// Package name → installed version. Recomputed on every call; the
    /// engines never cache the result.
    fn list_installed(&self) -> InstalledInventory;
}
