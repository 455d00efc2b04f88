//! Shared foundation for the Adapter Control Plane.
//!
//! Vocabulary types for the external object store, administrative
//! configuration, the error taxonomy, and semantic-version comparison.

pub mod config;
pub mod errors;
pub mod types;
pub mod version;

pub use config::AdminConfig;
pub use errors::{CatalogFetchError, ConfigError, StoreError};
pub use types::{
    AccessControl, InstalledInventory, ManagedObject, ObjectId, ObjectKind, PackageMeta,
    RepositoriesDoc, RepositoryCatalog, RepositoryEntry, StateValue, SystemCommon,
    UpdateCandidate, UserId, now_ms, SYSTEM_CONFIG_ID, SYSTEM_REPOSITORIES_ID,
};
pub use version::is_newer;
