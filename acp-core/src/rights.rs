//! Access-rights propagation.
//!
//! Rewrites ownership metadata on managed objects so they match the
//! configured default owner: the instance objects named in the config
//! allow-list directly, and whole object namespaces selected by the tab
//! allow-list through range scans feeding the ownership queue. Store
//! reads run concurrently; all resulting writes are serialized by the
//! queue.

use crate::ownership::{OwnershipQueue, OwnershipTask};
use crate::store::ObjectStore;
use acp_common::types::ADAPTER_INSTANCE_PREFIX;
use acp_common::{AdminConfig, ObjectId, ObjectKind, UserId};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Exclusive upper fence for namespace range scans: one code point above
/// every key the store hands out in practice.
const SCAN_END_SENTINEL: char = '\u{9999}';

/// Object namespaces re-owned for each known tab family.
fn tab_namespace(tab_id: &str) -> Option<(&'static str, &'static [ObjectKind])> {
    if tab_id.starts_with("devices.") {
        Some(("alias", &[ObjectKind::State, ObjectKind::Channel]))
    } else if tab_id.starts_with("scripting.") {
        Some(("scripts", &[ObjectKind::Script, ObjectKind::Channel]))
    } else if tab_id.starts_with("calendar.") {
        Some(("calendar", &[ObjectKind::Schedule]))
    } else if tab_id.starts_with("scenes.") {
        Some(("scenes", &[ObjectKind::State, ObjectKind::Channel]))
    } else {
        None
    }
}

/// Drives one propagation pass over the store.
pub struct RightsPropagator {
    store: Arc<dyn ObjectStore>,
    queue: OwnershipQueue,
    config: AdminConfig,
}

impl RightsPropagator {
    pub fn new(store: Arc<dyn ObjectStore>, queue: OwnershipQueue, config: AdminConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Enumerate everything that needs ownership correction and hand it
    /// to the store (instance objects) or the ownership queue (namespace
    /// scans). Individual failures are logged and never abort the batch.
    pub async fn propagate(&self) {
        let owner = self.config.normalized_default_owner();

        // Instance objects named in the allow-list; reads and rewrites run
        // concurrently, each tracked for the summary count.
        let mut instance_rewrites = JoinSet::new();
        for id in &self.config.access_allowed_configs {
            let store = self.store.clone();
            let owner = owner.clone();
            let object_id = ObjectId::new(format!("{ADAPTER_INSTANCE_PREFIX}{id}"));
            instance_rewrites.spawn(async move { rewrite_instance(store, object_id, owner).await });
        }

        // Namespace scans for allow-listed tabs.
        for tab_id in &self.config.access_allowed_tabs {
            if let Some((namespace, kinds)) = tab_namespace(tab_id) {
                self.scan_namespace(namespace, kinds, &owner).await;
            }
        }

        let mut updated = 0usize;
        while let Some(result) = instance_rewrites.join_next().await {
            if matches!(result, Ok(true)) {
                updated += 1;
            }
        }
        if updated > 0 {
            info!("Updated {updated} objects");
        }
    }

    /// Scan one namespace for every associated kind. The per-kind scans
    /// run concurrently and the namespace only counts as handled once
    /// all of them have joined; a failed scan abandons just its branch.
    async fn scan_namespace(&self, namespace: &str, kinds: &[ObjectKind], owner: &UserId) {
        let start_key = format!("{namespace}.");
        let end_key = format!("{namespace}.{SCAN_END_SENTINEL}");

        let mut scans = JoinSet::new();
        for &kind in kinds {
            let store = self.store.clone();
            let start_key = start_key.clone();
            let end_key = end_key.clone();
            scans.spawn(async move {
                let result = store.query_by_pattern(&start_key, &end_key, kind).await;
                (kind, result)
            });
        }

        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok((_, Ok(objects))) => {
                    for object in objects {
                        if object.owner().is_some_and(|current| current == owner) {
                            continue;
                        }
                        self.queue.enqueue(OwnershipTask {
                            object,
                            owner: owner.clone(),
                        });
                    }
                }
                Ok((kind, Err(err))) => {
                    warn!("Namespace scan failed for {namespace} ({kind}): {err}");
                }
                Err(err) => {
                    warn!("Namespace scan task for {namespace} panicked: {err}");
                }
            }
        }
    }
}

/// Re-own one adapter-instance object. Returns whether the store was
/// actually changed. Objects without an ACL record are left alone.
async fn rewrite_instance(store: Arc<dyn ObjectStore>, id: ObjectId, owner: UserId) -> bool {
    let mut object = match store.get_object(&id).await {
        Ok(Some(object)) => object,
        Ok(None) => return false,
        Err(err) => {
            warn!("Cannot read {id}: {err}");
            return false;
        }
    };

    let Some(acl) = object.acl.as_mut() else {
        return false;
    };
    if acl.owner == owner {
        return false;
    }
    acl.owner = owner;

    match store.set_object(&id, object).await {
        Ok(()) => true,
        Err(err) => {
            warn!("Cannot re-own {id}: {err}");
            false
        }
    }
}
