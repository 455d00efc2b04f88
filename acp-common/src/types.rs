//! Common types used across ACP components.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Document id of the system-wide configuration object.
pub const SYSTEM_CONFIG_ID: &str = "system.config";

/// Document id of the repository-catalog cache object.
pub const SYSTEM_REPOSITORIES_ID: &str = "system.repositories";

/// Key prefix under which adapter-instance objects live.
pub const ADAPTER_INSTANCE_PREFIX: &str = "system.adapter.";

/// Namespace prefix for fully qualified user identifiers.
pub const USER_NAMESPACE: &str = "system.user.";

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Hierarchical key identifying an entry in the external object store
/// (e.g. `system.adapter.foo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified user identifier (`system.user.<name>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wrap an already-qualified identifier without touching it.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Qualify a raw user name with the `system.user.` namespace unless it
    /// already carries it.
    pub fn normalized(raw: &str) -> Self {
        if raw.starts_with(USER_NAMESPACE) {
            Self(raw.to_string())
        } else {
            Self(format!("{USER_NAMESPACE}{raw}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of a managed object in the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A scalar state entry.
    State,
    /// A grouping channel.
    Channel,
    /// A user script.
    Script,
    /// A calendar/schedule entry.
    Schedule,
    /// An adapter-instance object.
    Instance,
    /// A system configuration document.
    Config,
    /// A host entity.
    Host,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Channel => write!(f, "channel"),
            Self::Script => write!(f, "script"),
            Self::Schedule => write!(f, "schedule"),
            Self::Instance => write!(f, "instance"),
            Self::Config => write!(f, "config"),
            Self::Host => write!(f, "host"),
        }
    }
}

/// Access-control record of a managed object.
///
/// Only `owner` is interpreted here; any further ACL fields are preserved
/// verbatim across ownership rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessControl {
    pub owner: UserId,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AccessControl {
    pub fn owned_by(owner: UserId) -> Self {
        Self {
            owner,
            extra: serde_json::Map::new(),
        }
    }
}

/// An entry in the external object store.
///
/// `ts` is owned by the store: it is refreshed on every write and is the
/// input to catalog-staleness decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    #[serde(default)]
    pub common: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<AccessControl>,
    #[serde(default)]
    pub native: serde_json::Value,
    #[serde(default)]
    pub ts: i64,
}

impl ManagedObject {
    pub fn new(id: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id: ObjectId::new(id),
            kind,
            common: serde_json::Value::Null,
            acl: None,
            native: serde_json::Value::Null,
            ts: 0,
        }
    }

    /// Current owner, if the object carries an ACL record.
    pub fn owner(&self) -> Option<&UserId> {
        self.acl.as_ref().map(|acl| &acl.owner)
    }
}

/// A scalar state value with acknowledgment flag and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateValue {
    pub val: serde_json::Value,
    pub ack: bool,
    pub ts: i64,
}

impl StateValue {
    /// An acknowledged value stamped with the current time.
    pub fn acked(val: impl Into<serde_json::Value>) -> Self {
        Self {
            val: val.into(),
            ack: true,
            ts: now_ms(),
        }
    }
}

/// Published metadata for one package in a repository catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMeta {
    pub version: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PackageMeta {
    pub fn at_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Catalog of published package versions, keyed by package name.
pub type RepositoryCatalog = BTreeMap<String, PackageMeta>;

/// Cached payload for one configured repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// The last fetched catalog; `None` if never fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<RepositoryCatalog>,
}

/// The `native` payload of the `system.repositories` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoriesDoc {
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryEntry>,
}

/// The `common` projection of the `system.config` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCommon {
    #[serde(default, rename = "activeRepo", skip_serializing_if = "Option::is_none")]
    pub active_repo: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Package name → installed version, sourced from the host environment.
pub type InstalledInventory = BTreeMap<String, String>;

/// One update-candidate entry of the persisted report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCandidate {
    pub available_version: String,
    pub installed_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_id_normalization_prefixes_raw_names() {
        assert_eq!(UserId::normalized("admin").as_str(), "system.user.admin");
        assert_eq!(
            UserId::normalized("system.user.ops").as_str(),
            "system.user.ops"
        );
    }

    #[test]
    fn access_control_preserves_unknown_fields() {
        let raw = json!({
            "owner": "system.user.admin",
            "ownerGroup": "system.group.administrator",
            "object": 1636
        });
        let acl: AccessControl = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(acl.owner.as_str(), "system.user.admin");

        let back = serde_json::to_value(&acl).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn managed_object_round_trips_with_wire_field_names() {
        let obj = ManagedObject {
            id: ObjectId::new("system.adapter.web.0"),
            kind: ObjectKind::Instance,
            common: json!({"enabled": true}),
            acl: Some(AccessControl::owned_by(UserId::normalized("admin"))),
            native: json!({}),
            ts: 1_770_000_000_000,
        };
        let value = serde_json::to_value(&obj).unwrap();
        assert_eq!(value["_id"], "system.adapter.web.0");
        assert_eq!(value["type"], "instance");

        let parsed: ManagedObject = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, obj);
    }

    #[test]
    fn system_common_reads_active_repo() {
        let common: SystemCommon =
            serde_json::from_value(json!({"activeRepo": "stable", "language": "en"})).unwrap();
        assert_eq!(common.active_repo.as_deref(), Some("stable"));
        assert_eq!(common.extra["language"], "en");
    }

    #[test]
    fn repositories_doc_defaults_to_empty() {
        let doc: RepositoriesDoc = serde_json::from_value(json!({})).unwrap();
        assert!(doc.repositories.is_empty());
    }

    #[test]
    fn update_candidate_uses_camel_case_keys() {
        let candidate = UpdateCandidate {
            available_version: "2.0.0".to_string(),
            installed_version: "1.0.0".to_string(),
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["availableVersion"], "2.0.0");
        assert_eq!(value["installedVersion"], "1.0.0");
    }
}
