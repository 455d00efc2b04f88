//! Update-availability reporting.
//!
//! Compares the active repository catalog against the installed inventory,
//! de-duplicates already-acknowledged update notifications, and persists
//! the result as five independent read-only states under the instance
//! namespace (`info.updatesNumber`, `info.updatesList`, `info.newUpdates`,
//! `info.updatesJson`, `info.lastUpdateCheck`).

use crate::store::{InventorySource, ObjectStore};
use acp_common::{
    InstalledInventory, ManagedObject, ObjectId, ObjectKind, RepositoriesDoc, RepositoryCatalog,
    StateValue, StoreError, SystemCommon, UpdateCandidate, is_newer, SYSTEM_CONFIG_ID,
    SYSTEM_REPOSITORIES_ID,
};
use chrono::Local;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub const STATE_UPDATES_NUMBER: &str = "info.updatesNumber";
pub const STATE_UPDATES_LIST: &str = "info.updatesList";
pub const STATE_NEW_UPDATES: &str = "info.newUpdates";
pub const STATE_UPDATES_JSON: &str = "info.updatesJson";
pub const STATE_LAST_UPDATE_CHECK: &str = "info.lastUpdateCheck";

/// Result of one comparison pass. The baseline (`Default`) is what gets
/// persisted when no catalog is resolvable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// Number of update candidates.
    pub updates_number: u32,
    /// Comma-joined display names, in catalog iteration order.
    pub updates_list: String,
    /// Whether this pass discovered a candidate the previous report did
    /// not already show at the same available version. Never sticky.
    pub new_updates: bool,
    /// Full candidate map, keyed by package name.
    pub updates_json: BTreeMap<String, UpdateCandidate>,
}

/// Compare `catalog` against `installed`.
///
/// A package is an update candidate iff it appears in both maps with
/// non-empty versions that differ and the catalog version is strictly
/// newer. `previous` is the candidate map of the last persisted report;
/// a candidate that is absent from it, or present with a different
/// available version, flips `new_updates`.
pub fn compute_report(
    catalog: &RepositoryCatalog,
    installed: &InstalledInventory,
    previous: &BTreeMap<String, UpdateCandidate>,
) -> UpdateReport {
    let mut display_names = Vec::new();
    let mut updates_json = BTreeMap::new();
    let mut new_updates = false;

    for (name, meta) in catalog {
        let Some(installed_version) = installed.get(name) else {
            continue;
        };
        if meta.version.is_empty() || installed_version.is_empty() {
            continue;
        }
        if meta.version != *installed_version && is_newer(&meta.version, installed_version) {
            let known = previous
                .get(name)
                .is_some_and(|candidate| candidate.available_version == meta.version);
            if !known {
                new_updates = true;
            }
            updates_json.insert(
                name.clone(),
                UpdateCandidate {
                    available_version: meta.version.clone(),
                    installed_version: installed_version.clone(),
                },
            );
            display_names.push(display_name(name));
        }
    }

    UpdateReport {
        updates_number: display_names.len() as u32,
        updates_list: display_names.join(", "),
        new_updates,
        updates_json,
    }
}

/// Short name shown to users: everything after the first `.` separator,
/// or the full name if there is none.
fn display_name(name: &str) -> String {
    match name.find('.') {
        Some(split) => name[split + 1..].to_string(),
        None => name.to_string(),
    }
}

/// Current local wall-clock time as an ISO-8601 string with millisecond
/// precision.
pub(crate) fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

struct StateDeclaration {
    suffix: &'static str,
    role: &'static str,
    name: &'static str,
    value_type: &'static str,
    default: serde_json::Value,
}

fn declarations() -> [StateDeclaration; 5] {
    [
        StateDeclaration {
            suffix: STATE_UPDATES_NUMBER,
            role: "indicator.updates",
            name: "Number of adapters to update",
            value_type: "number",
            default: json!(0),
        },
        StateDeclaration {
            suffix: STATE_UPDATES_LIST,
            role: "indicator.updates",
            name: "List of adapters to update",
            value_type: "string",
            default: json!(""),
        },
        StateDeclaration {
            suffix: STATE_NEW_UPDATES,
            role: "indicator.updates",
            name: "Indicator if new adapter updates are available",
            value_type: "boolean",
            default: json!(false),
        },
        StateDeclaration {
            suffix: STATE_UPDATES_JSON,
            role: "indicator.updates",
            name: "JSON string with adapter update information",
            value_type: "string",
            default: json!("{}"),
        },
        StateDeclaration {
            suffix: STATE_LAST_UPDATE_CHECK,
            role: "value.datetime",
            name: "Timestamp of last update check",
            value_type: "string",
            default: json!(""),
        },
    ]
}

/// Maintains the persisted update report of one adapter instance.
pub struct UpdateInfoService {
    store: Arc<dyn ObjectStore>,
    inventory: Arc<dyn InventorySource>,
    namespace: String,
}

impl UpdateInfoService {
    /// `namespace` is the instance prefix under which the report states
    /// live, e.g. `admin.0`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        inventory: Arc<dyn InventorySource>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            inventory,
            namespace: namespace.into(),
        }
    }

    fn state_id(&self, suffix: &str) -> ObjectId {
        ObjectId::new(format!("{}.{}", self.namespace, suffix))
    }

    /// Create the report-state declarations, or re-create any whose
    /// declared value type no longer matches. Correct declarations are
    /// left untouched.
    pub async fn ensure_declared(&self) -> Result<(), StoreError> {
        for decl in declarations() {
            let id = self.state_id(decl.suffix);
            let intact = self
                .store
                .get_object(&id)
                .await?
                .is_some_and(|object| object.common["type"] == json!(decl.value_type));
            if intact {
                continue;
            }

            let mut object = ManagedObject::new(id.as_str(), ObjectKind::State);
            object.common = json!({
                "role": decl.role,
                "name": decl.name,
                "type": decl.value_type,
                "read": true,
                "write": false,
                "def": decl.default,
            });
            object.native = json!({});
            self.store.set_object(&id, object).await?;
        }
        Ok(())
    }

    /// Recompute and persist the update report.
    ///
    /// With no resolvable catalog the report is reset to its baseline
    /// rather than left stale; `info.lastUpdateCheck` is stamped either
    /// way so callers can observe that a check was attempted.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let report = match self.resolve_active_catalog().await? {
            Some(catalog) => {
                let previous = self.previous_candidates().await;
                let installed = self.inventory.list_installed();
                compute_report(&catalog, &installed, &previous)
            }
            None => UpdateReport::default(),
        };
        self.write_report(&report).await
    }

    /// The cached catalog of the active repository selection, or `None`
    /// (with a logged warning) when configuration or payload is missing.
    async fn resolve_active_catalog(&self) -> Result<Option<RepositoryCatalog>, StoreError> {
        let config_id = ObjectId::new(SYSTEM_CONFIG_ID);
        let Some(config) = self.store.get_object(&config_id).await? else {
            warn!("Repository cannot be read. Invalid \"system.config\" object.");
            return Ok(None);
        };
        let common: SystemCommon = serde_json::from_value(config.common).unwrap_or_default();
        let Some(active) = common.active_repo else {
            warn!("No repository source configured");
            return Ok(None);
        };

        let repos_id = ObjectId::new(SYSTEM_REPOSITORIES_ID);
        let doc: RepositoriesDoc = match self.store.get_object(&repos_id).await? {
            Some(object) => serde_json::from_value(object.native).unwrap_or_default(),
            None => RepositoriesDoc::default(),
        };
        match doc.repositories.get(&active) {
            Some(entry) => match &entry.json {
                Some(catalog) => Ok(Some(catalog.clone())),
                None => {
                    warn!("Repository cannot be read");
                    Ok(None)
                }
            },
            None => {
                warn!("No repository source configured");
                Ok(None)
            }
        }
    }

    /// Candidate map of the last persisted report. Unreadable or
    /// unparseable previous state counts as empty rather than aborting
    /// the pass.
    async fn previous_candidates(&self) -> BTreeMap<String, UpdateCandidate> {
        let id = self.state_id(STATE_UPDATES_JSON);
        let Ok(Some(state)) = self.store.get_state(&id).await else {
            return BTreeMap::new();
        };
        state
            .val
            .as_str()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    async fn write_report(&self, report: &UpdateReport) -> Result<(), StoreError> {
        let updates_json = serde_json::to_string(&report.updates_json)
            .unwrap_or_else(|_| "{}".to_string());

        self.store
            .set_state(
                &self.state_id(STATE_UPDATES_NUMBER),
                StateValue::acked(report.updates_number),
            )
            .await?;
        self.store
            .set_state(
                &self.state_id(STATE_UPDATES_LIST),
                StateValue::acked(report.updates_list.clone()),
            )
            .await?;
        self.store
            .set_state(
                &self.state_id(STATE_NEW_UPDATES),
                StateValue::acked(report.new_updates),
            )
            .await?;
        self.store
            .set_state(&self.state_id(STATE_UPDATES_JSON), StateValue::acked(updates_json))
            .await?;
        self.store
            .set_state(
                &self.state_id(STATE_LAST_UPDATE_CHECK),
                StateValue::acked(local_timestamp()),
            )
            .await
    }
}
