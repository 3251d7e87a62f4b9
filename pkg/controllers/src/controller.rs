use parking_lot::Mutex;
use pkg_constants::state::{
    CLUSTERS_PREFIX, CRTBS_PREFIX, DEFAULT_RESYNC_INTERVAL_SECS, GLOBAL_ROLE_BINDINGS_PREFIX,
    GLOBAL_ROLES_PREFIX, REQUEUE_BASE_DELAY_MS, REQUEUE_MAX_DELAY_SECS,
};
use pkg_state::authz::AuthzStore;
use pkg_state::lister::ClusterDirectory;
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::rbac::ClusterRoleTemplateBinding;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::globalrolebinding::{GlobalRoleBindingReconciler, ReconcileSummary, ReconcilerConfig};
use crate::queue::WorkQueue;

/// Requeue delay after `attempt` consecutive failures.
fn backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis(REQUEUE_BASE_DELAY_MS.saturating_mul(1 << exp))
        .min(Duration::from_secs(REQUEUE_MAX_DELAY_SECS))
}

/// Drives the [`GlobalRoleBindingReconciler`] from state store events.
///
/// GlobalRoleBinding names are queued on every change that can affect them
/// and on a periodic resync. A single worker drains the queue, so passes for
/// the same binding never overlap. Failed passes are requeued with
/// exponential backoff. Bindings left in a cluster that no longer exists are
/// removed when the cluster is deleted and again on every resync.
pub struct GlobalRoleBindingController {
    store: AuthzStore,
    reconciler: GlobalRoleBindingReconciler,
    queue: WorkQueue,
    resync_interval: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl GlobalRoleBindingController {
    pub fn new(store: AuthzStore, config: ReconcilerConfig) -> Self {
        let shared = Arc::new(store.clone());
        let reconciler =
            GlobalRoleBindingReconciler::new(shared.clone(), shared.clone(), shared, config);
        Self {
            store,
            reconciler,
            queue: WorkQueue::new(),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Handle for queueing keys or shutting the controller down.
    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    /// Start the controller as a background task. The task ends once the
    /// queue is shut down.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let events = self.store.events().subscribe();
        let this = Arc::new(self);
        tokio::spawn(async move {
            info!(
                "GlobalRoleBindingController started (resync={}s, excluded clusters={:?})",
                this.resync_interval.as_secs(),
                this.reconciler.config().excluded_clusters
            );

            let watcher = {
                let this = this.clone();
                tokio::spawn(async move { this.watch(events).await })
            };
            let resync = {
                let this = this.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(this.resync_interval);
                    loop {
                        interval.tick().await;
                        this.prune_orphaned_bindings().await;
                        this.enqueue_all().await;
                    }
                })
            };

            while let Some(key) = this.queue.next().await {
                this.process(&key).await;
            }

            watcher.abort();
            resync.abort();
            info!("GlobalRoleBindingController stopped");
        })
    }

    /// One pass for the GlobalRoleBinding `name`: reconcile it if it exists,
    /// otherwise remove whatever it still owns.
    pub async fn sync(&self, name: &str) -> anyhow::Result<ReconcileSummary> {
        match self.store.get_global_role_binding(name).await? {
            Some(grb) => Ok(self.reconciler.reconcile(&grb).await?),
            None => {
                debug!("GRB {} no longer exists, cleaning up its bindings", name);
                Ok(self.reconciler.cleanup(name).await?)
            }
        }
    }

    async fn process(&self, key: &str) {
        match self.sync(key).await {
            Ok(summary) => {
                self.failures.lock().remove(key);
                if summary.created > 0 || summary.deleted > 0 {
                    info!(
                        "GRB {}: synced across {} clusters ({} created, {} deleted)",
                        key, summary.clusters, summary.created, summary.deleted
                    );
                }
            }
            Err(e) => {
                let attempt = {
                    let mut failures = self.failures.lock();
                    let n = failures.entry(key.to_string()).or_insert(0);
                    *n += 1;
                    *n
                };
                let delay = backoff(attempt);
                warn!(
                    "GRB {}: sync failed (attempt {}), retrying in {}ms: {:#}",
                    key,
                    attempt,
                    delay.as_millis(),
                    e
                );
                self.queue.add_after(key, delay);
            }
        }
    }

    async fn watch(&self, mut events: broadcast::Receiver<WatchEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("GlobalRoleBindingController missed {} events, resyncing", missed);
                    self.enqueue_all().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_event(&self, event: WatchEvent) {
        if let Some(name) = event.key.strip_prefix(GLOBAL_ROLE_BINDINGS_PREFIX) {
            self.queue.add(name);
        } else if let Some(name) = event.key.strip_prefix(GLOBAL_ROLES_PREFIX) {
            match self.store.list_global_role_bindings().await {
                Ok(grbs) => grbs
                    .into_iter()
                    .filter(|grb| grb.global_role_name == name)
                    .for_each(|grb| self.queue.add(grb.name)),
                Err(e) => warn!("Unable to list globalrolebindings for globalrole {}: {}", name, e),
            }
        } else if let Some(name) = event.key.strip_prefix(CLUSTERS_PREFIX) {
            if event.event_type == EventType::Delete {
                self.remove_cluster_bindings(name).await;
            }
            self.enqueue_all().await;
        } else if event.key.starts_with(CRTBS_PREFIX)
            && let Some(crtb) = event.decode::<ClusterRoleTemplateBinding>()
            && let Some(owner) = crtb.grb_owner()
        {
            self.queue.add(owner);
        }
    }

    /// Delete every binding in a cluster that is gone.
    async fn remove_cluster_bindings(&self, cluster: &str) {
        match self.store.delete_namespace_bindings(cluster).await {
            Ok(0) => {}
            Ok(n) => info!("Cluster {} removed: deleted {} bindings", cluster, n),
            Err(e) => warn!("Cluster {} removed: unable to delete its bindings: {}", cluster, e),
        }
    }

    async fn prune_orphaned_bindings(&self) {
        let clusters: HashSet<String> = match ClusterDirectory::list(&self.store).await {
            Ok(clusters) => clusters.into_iter().map(|c| c.name).collect(),
            Err(e) => {
                warn!("Resync: unable to list clusters: {}", e);
                return;
            }
        };
        let orphaned: BTreeSet<String> = self
            .store
            .list_bindings()
            .into_iter()
            .map(|b| b.namespace)
            .filter(|ns| !clusters.contains(ns))
            .collect();
        for cluster in orphaned {
            self.remove_cluster_bindings(&cluster).await;
        }
    }

    async fn enqueue_all(&self) {
        match self.store.list_global_role_bindings().await {
            Ok(grbs) => {
                debug!("Resync: queueing {} globalrolebindings", grbs.len());
                for grb in grbs {
                    self.queue.add(grb.name);
                }
            }
            Err(e) => warn!("Resync: unable to list globalrolebindings: {}", e),
        }
    }
}
