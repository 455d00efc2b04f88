//! Administrative configuration.
//!
//! Loaded from a TOML file with serde defaults for every field, so a
//! missing or partial file always yields a usable configuration.

use crate::errors::ConfigError;
use crate::types::{UserId, USER_NAMESPACE};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default repository re-check interval in hours.
const DEFAULT_AUTO_UPDATE_HOURS: u32 = 24;

/// Configuration of one control-plane instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// User that managed objects should be re-assigned to. Accepts a raw
    /// name (`admin`) or a fully qualified id (`system.user.admin`).
    #[serde(default = "default_owner")]
    pub default_owner: String,

    /// Host entity addressed for remote catalog fetches.
    #[serde(default = "default_host")]
    pub host: String,

    /// Repository re-check interval in hours; 0 disables recurring checks.
    #[serde(default = "default_auto_update_hours")]
    pub auto_update_hours: u32,

    /// Whether ownership propagation is requested at all.
    #[serde(default)]
    pub apply_rights: bool,

    /// Whether restricted access mode is active.
    #[serde(default)]
    pub access_limit: bool,

    /// Whether authentication is handled by the gateway.
    #[serde(default)]
    pub auth: bool,

    /// Adapter-instance ids whose own object should be re-owned.
    #[serde(default)]
    pub access_allowed_configs: Vec<String>,

    /// UI-tab ids whose associated object namespace should be re-owned.
    #[serde(default)]
    pub access_allowed_tabs: Vec<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            default_owner: default_owner(),
            host: default_host(),
            auto_update_hours: default_auto_update_hours(),
            apply_rights: false,
            access_limit: false,
            auth: false,
            access_allowed_configs: Vec::new(),
            access_allowed_tabs: Vec::new(),
        }
    }
}

impl AdminConfig {
    /// Load the configuration from `path`, or from the platform config
    /// directory when no path is given. A missing implicit file yields the
    /// defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        if !explicit && !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    /// The default owner as a fully qualified user id.
    pub fn normalized_default_owner(&self) -> UserId {
        UserId::normalized(&self.default_owner)
    }

    /// Whether ownership propagation should run: rights application must be
    /// requested, restricted access active, authentication delegated, and
    /// the target owner must not be the built-in administrator.
    pub fn should_apply_rights(&self) -> bool {
        self.apply_rights
            && self.access_limit
            && !self.auth
            && self.normalized_default_owner().as_str() != format!("{USER_NAMESPACE}admin")
    }
}

fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "acp")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

fn default_owner() -> String {
    "admin".to_string()
}

fn default_host() -> String {
    "system.host.main".to_string()
}

fn default_auto_update_hours() -> u32 {
    DEFAULT_AUTO_UPDATE_HOURS
}
