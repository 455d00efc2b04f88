//! Error taxonomy for the control plane.
//!
//! Every failure here degrades in place: store failures abandon the
//! affected branch or task, fetch failures end the current refresh cycle,
//! and nothing terminates the hosting process. Missing configuration and
//! malformed version strings are handled values, not errors.

use crate::types::ObjectId;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the external object store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A lookup or range scan could not be served.
    #[error("store read failed for {id}: {reason}")]
    Read { id: ObjectId, reason: String },

    /// A document or state write was rejected.
    #[error("store write failed for {id}: {reason}")]
    Write { id: ObjectId, reason: String },
}

impl StoreError {
    pub fn read(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Read {
            id: ObjectId::new(id),
            reason: reason.into(),
        }
    }

    pub fn write(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Write {
            id: ObjectId::new(id),
            reason: reason.into(),
        }
    }
}

/// Failures of a remote catalog fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogFetchError {
    /// The host refused the request with its permission-denied sentinel.
    #[error("host denied permission for the repository request")]
    PermissionDenied,

    /// The request could not be delivered or the response was unusable.
    #[error("repository transport failure: {0}")]
    Transport(String),
}

/// Failures while loading the administrative configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
