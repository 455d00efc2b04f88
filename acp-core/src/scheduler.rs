//! Repository refresh scheduling.
//!
//! One self-rescheduling timer per instance decides whether the cached
//! catalog of the active repository is stale, triggers a remote refresh
//! when it is (or when forced), and recomputes the persisted update
//! report on success. The staleness input is the store-owned `ts` of the
//! repositories object, so the decision survives process restarts.

use crate::events::EventBus;
use crate::store::{ObjectStore, RepositoryService};
use crate::updates::UpdateInfoService;
use acp_common::{
    AdminConfig, CatalogFetchError, ManagedObject, ObjectId, ObjectKind, RepositoriesDoc,
    RepositoryCatalog, StoreError, SystemCommon, now_ms, SYSTEM_CONFIG_ID, SYSTEM_REPOSITORIES_ID,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const HOUR_MS: i64 = 3_600_000;

/// Whether a catalog fetched at `ts_ms` is still current at `now_ms`
/// under an `interval_hours` staleness window.
pub fn catalog_is_current(ts_ms: i64, now_ms: i64, interval_hours: u32) -> bool {
    now_ms < ts_ms + i64::from(interval_hours) * HOUR_MS
}

/// Per-instance refresh scheduler.
///
/// Holds at most one pending timer at any time; arming a new one always
/// cancels the previous handle first.
#[derive(Clone)]
pub struct RepositoryScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ObjectStore>,
    service: Arc<dyn RepositoryService>,
    updates: UpdateInfoService,
    events: EventBus,
    host: String,
    auto_update_hours: u32,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RepositoryScheduler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        service: Arc<dyn RepositoryService>,
        updates: UpdateInfoService,
        events: EventBus,
        config: &AdminConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                service,
                updates,
                events,
                host: config.host.clone(),
                auto_update_hours: config.auto_update_hours,
                timer: Mutex::new(None),
            }),
        }
    }

    /// Run the initial check when recurring checks are enabled.
    pub async fn start(&self) {
        if self.inner.auto_update_hours > 0 {
            Inner::check(self.inner.clone(), false).await;
        }
    }

    /// Run one scheduling cycle without forcing a fetch.
    pub async fn check(&self) {
        Inner::check(self.inner.clone(), false).await;
    }

    /// Externally forced check (adapter start, explicit admin command).
    pub async fn force_check(&self) {
        Inner::check(self.inner.clone(), true).await;
    }

    /// Cancel the pending timer, if any.
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.timer.lock().await.take() {
            handle.abort();
        }
    }

    /// Whether a timer is currently armed.
    pub async fn has_pending_timer(&self) -> bool {
        self.inner.timer.lock().await.is_some()
    }
}

impl Inner {
    async fn check(self: Arc<Self>, force: bool) {
        let config_id = ObjectId::new(SYSTEM_CONFIG_ID);
        let config = match self.store.get_object(&config_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                error!("May not read \"system.config\"");
                return;
            }
            Err(err) => {
                error!("May not read \"system.config\": {err}");
                return;
            }
        };

        let common: SystemCommon = serde_json::from_value(config.common).unwrap_or_default();
        let Some(active) = common.active_repo else {
            warn!("No active repository selected");
            if let Err(err) = self.updates.refresh().await {
                warn!("Cannot reset update report: {err}");
            }
            self.rearm_full_window().await;
            return;
        };

        let repos_id = ObjectId::new(SYSTEM_REPOSITORIES_ID);
        let repos = match self.store.get_object(&repos_id).await {
            Ok(repos) => repos,
            Err(err) => {
                error!("May not read \"system.repositories\": {err}");
                return;
            }
        };

        let current = repos.as_ref().is_some_and(|object| {
            let doc: RepositoriesDoc =
                serde_json::from_value(object.native.clone()).unwrap_or_default();
            doc.repositories.contains_key(&active)
                && catalog_is_current(object.ts, now_ms(), self.auto_update_hours)
        });

        if current && !force {
            // Re-check exactly when the window expires.
            if self.auto_update_hours > 0 {
                let ts = repos.as_ref().map(|object| object.ts).unwrap_or_default();
                let window = i64::from(self.auto_update_hours) * HOUR_MS;
                let delay = (ts + window - now_ms() + 1).max(1);
                debug!("Catalog still current, next repository check in {delay} ms");
                self.arm(Duration::from_millis(delay as u64)).await;
            }
            return;
        }

        info!("Requesting current repository catalog...");
        match self.service.request_catalog(&self.host, &active, true).await {
            Ok(catalog) => {
                info!("Repository received successfully");
                if let Err(err) = self.persist_catalog(repos, &active, catalog).await {
                    warn!("Cannot persist repository catalog: {err}");
                }
                if let Err(err) = self.updates.refresh().await {
                    warn!("Cannot rewrite update report: {err}");
                }
                self.events.repo_updated(&active);
            }
            Err(CatalogFetchError::PermissionDenied) => {
                error!("May not read repository catalog: permission denied");
            }
            Err(err) => {
                error!("Repository request failed: {err}");
            }
        }

        self.rearm_full_window().await;
    }

    /// Boxed entry point for the timer task; breaks the otherwise
    /// recursive opaque future type of `check` → `arm` → `check`.
    fn check_boxed(self: Arc<Self>, force: bool) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self.check(force))
    }

    /// Arm the next check one full interval from now. The extra
    /// millisecond lands the check strictly after the staleness boundary
    /// so a freshly bumped `ts` can never cause a tight re-fetch loop.
    async fn rearm_full_window(self: Arc<Self>) {
        if self.auto_update_hours == 0 {
            return;
        }
        let delay = i64::from(self.auto_update_hours) * HOUR_MS + 1;
        debug!("Next repository check in {delay} ms");
        self.arm(Duration::from_millis(delay as u64)).await;
    }

    async fn arm(self: Arc<Self>, delay: Duration) {
        let mut slot = self.timer.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let inner = self.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Hand the singleton slot back before running; the cycle will
            // arm its own successor.
            inner.timer.lock().await.take();
            Inner::check_boxed(inner, false).await;
        }));
    }

    async fn persist_catalog(
        &self,
        existing: Option<ManagedObject>,
        repo: &str,
        catalog: RepositoryCatalog,
    ) -> Result<(), StoreError> {
        let mut object = existing
            .unwrap_or_else(|| ManagedObject::new(SYSTEM_REPOSITORIES_ID, ObjectKind::Config));
        let mut doc: RepositoriesDoc =
            serde_json::from_value(object.native.clone()).unwrap_or_default();
        doc.repositories.entry(repo.to_string()).or_default().json = Some(catalog);
        object.native = serde_json::to_value(&doc)
            .map_err(|err| StoreError::write(SYSTEM_REPOSITORIES_ID, err.to_string()))?;

        let id = object.id.clone();
        self.store.set_object(&id, object).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, ScriptedRepositoryService, StaticInventory};
    use acp_common::PackageMeta;
    use serde_json::json;

    #[test]
    fn staleness_boundary_is_exact() {
        let ts = 1_770_000_000_000;
        let window = 24 * HOUR_MS;
        assert!(catalog_is_current(ts, ts + window - 1, 24));
        assert!(!catalog_is_current(ts, ts + window, 24));
        assert!(!catalog_is_current(ts, ts + window + 1, 24));
    }

    #[test]
    fn zero_interval_is_always_stale() {
        let ts = 1_770_000_000_000;
        assert!(!catalog_is_current(ts, ts, 0));
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        service: Arc<ScriptedRepositoryService>,
        scheduler: RepositoryScheduler,
        events: EventBus,
    }

    fn fixture(auto_update_hours: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(ScriptedRepositoryService::new());
        let events = EventBus::new();
        let updates = UpdateInfoService::new(
            store.clone(),
            Arc::new(StaticInventory::new(&[("system.adapter.web", "1.0.0")])),
            "admin.0",
        );
        let config = AdminConfig {
            auto_update_hours,
            ..Default::default()
        };
        let scheduler = RepositoryScheduler::new(
            store.clone(),
            service.clone(),
            updates,
            events.clone(),
            &config,
        );
        Fixture {
            store,
            service,
            scheduler,
            events,
        }
    }

    fn sample_catalog() -> RepositoryCatalog {
        [(
            "system.adapter.web".to_string(),
            PackageMeta::at_version("2.0.0"),
        )]
        .into()
    }

    async fn seed_active_repo(store: &MemoryStore, with_payload: bool) {
        let mut config = ManagedObject::new(SYSTEM_CONFIG_ID, ObjectKind::Config);
        config.common = json!({ "activeRepo": "stable" });
        store.seed_object(config).await;

        let mut repos = ManagedObject::new(SYSTEM_REPOSITORIES_ID, ObjectKind::Config);
        repos.native = json!({
            "repositories": {
                "stable": if with_payload {
                    json!({ "json": { "system.adapter.web": { "version": "1.5.0" } } })
                } else {
                    json!({})
                }
            }
        });
        store.seed_object(repos).await;
    }

    #[tokio::test]
    async fn fresh_catalog_skips_the_fetch_and_rearms() {
        let fx = fixture(24);
        seed_active_repo(&fx.store, true).await;

        fx.scheduler.check().await;

        assert!(fx.service.calls().is_empty());
        assert!(fx.scheduler.has_pending_timer().await);
        fx.scheduler.stop().await;
        assert!(!fx.scheduler.has_pending_timer().await);
    }

    #[tokio::test]
    async fn forced_check_fetches_even_when_fresh() {
        let fx = fixture(24);
        seed_active_repo(&fx.store, true).await;
        fx.service.push_result(Ok(sample_catalog()));
        let mut rx = fx.events.subscribe();

        fx.scheduler.force_check().await;

        let calls = fx.service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].repo, "stable");
        assert!(calls[0].update);

        // The fetched catalog replaced the cached payload.
        let repos = fx.store.object(SYSTEM_REPOSITORIES_ID).await.unwrap();
        let doc: RepositoriesDoc = serde_json::from_value(repos.native).unwrap();
        assert_eq!(
            doc.repositories["stable"].json.as_ref().unwrap()["system.adapter.web"].version,
            "2.0.0"
        );

        // The report was recomputed against the new catalog.
        let number = fx.store.state("admin.0.info.updatesNumber").await.unwrap();
        assert_eq!(number.val, json!(1));

        // Downstream consumers saw the refresh.
        let line = rx.try_recv().expect("expected a repository.updated event");
        assert!(line.contains("repository.updated"));

        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn stale_catalog_triggers_a_fetch() {
        let fx = fixture(1);
        seed_active_repo(&fx.store, true).await;
        fx.store
            .backdate_ts(SYSTEM_REPOSITORIES_ID, now_ms() - 2 * HOUR_MS)
            .await;
        fx.service.push_result(Ok(sample_catalog()));

        fx.scheduler.check().await;

        assert_eq!(fx.service.calls().len(), 1);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn permission_denied_still_reschedules() {
        let fx = fixture(1);
        seed_active_repo(&fx.store, true).await;
        fx.store
            .backdate_ts(SYSTEM_REPOSITORIES_ID, now_ms() - 2 * HOUR_MS)
            .await;
        fx.service
            .push_result(Err(CatalogFetchError::PermissionDenied));

        fx.scheduler.check().await;

        assert_eq!(fx.service.calls().len(), 1);
        // The failed cycle never touched the report.
        assert!(fx.store.state("admin.0.info.updatesNumber").await.is_none());
        assert!(fx.scheduler.has_pending_timer().await);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn disabled_auto_update_never_arms_a_timer() {
        let fx = fixture(0);
        seed_active_repo(&fx.store, true).await;
        fx.store
            .backdate_ts(SYSTEM_REPOSITORIES_ID, now_ms() - 2 * HOUR_MS)
            .await;
        fx.service.push_result(Ok(sample_catalog()));

        fx.scheduler.force_check().await;

        assert_eq!(fx.service.calls().len(), 1);
        assert!(!fx.scheduler.has_pending_timer().await);
    }

    #[tokio::test]
    async fn config_read_failure_does_nothing_this_cycle() {
        let fx = fixture(24);
        seed_active_repo(&fx.store, true).await;
        fx.store.fail_reads_for(SYSTEM_CONFIG_ID);

        fx.scheduler.check().await;

        assert!(fx.service.calls().is_empty());
        assert!(!fx.scheduler.has_pending_timer().await);
    }

    #[tokio::test]
    async fn repositories_read_failure_does_nothing_this_cycle() {
        let fx = fixture(24);
        seed_active_repo(&fx.store, true).await;
        fx.store.fail_reads_for(SYSTEM_REPOSITORIES_ID);

        fx.scheduler.check().await;

        assert!(fx.service.calls().is_empty());
        assert!(!fx.scheduler.has_pending_timer().await);
    }

    #[tokio::test]
    async fn missing_active_repo_resets_the_report_and_rearms() {
        let fx = fixture(24);
        let mut config = ManagedObject::new(SYSTEM_CONFIG_ID, ObjectKind::Config);
        config.common = json!({});
        fx.store.seed_object(config).await;

        fx.scheduler.check().await;

        assert!(fx.service.calls().is_empty());
        assert_eq!(
            fx.store
                .state("admin.0.info.updatesNumber")
                .await
                .unwrap()
                .val,
            json!(0)
        );
        assert!(fx.scheduler.has_pending_timer().await);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn inactive_repository_key_counts_as_stale() {
        let fx = fixture(24);
        let mut config = ManagedObject::new(SYSTEM_CONFIG_ID, ObjectKind::Config);
        config.common = json!({ "activeRepo": "beta" });
        fx.store.seed_object(config).await;
        // Only "stable" is cached; the active "beta" selection is not.
        let mut repos = ManagedObject::new(SYSTEM_REPOSITORIES_ID, ObjectKind::Config);
        repos.native = json!({ "repositories": { "stable": {} } });
        fx.store.seed_object(repos).await;
        fx.service.push_result(Ok(sample_catalog()));

        fx.scheduler.check().await;

        assert_eq!(fx.service.calls().len(), 1);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn rearming_cancels_the_previous_timer() {
        let fx = fixture(1);
        seed_active_repo(&fx.store, true).await;
        // ~80 ms of freshness left, so each check arms a short timer.
        fx.store
            .backdate_ts(SYSTEM_REPOSITORIES_ID, now_ms() - HOUR_MS + 80)
            .await;
        // Transport failures keep `ts` untouched; a surviving duplicate
        // timer would therefore fetch a second time.
        fx.service
            .push_result(Err(CatalogFetchError::Transport("down".to_string())));
        fx.service
            .push_result(Err(CatalogFetchError::Transport("down".to_string())));

        fx.scheduler.check().await;
        fx.scheduler.check().await;
        assert!(fx.scheduler.has_pending_timer().await);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(fx.service.calls().len(), 1);
        fx.scheduler.stop().await;
    }
}
