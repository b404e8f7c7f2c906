//! Process-wide monitor registry and the background watcher.
//!
//! Monitors are shared: the first lookup for a set name creates one, every
//! later lookup returns the same instance, and nothing is ever evicted.
//! Creating the first monitor also starts the watcher, a single background
//! task that rechecks every registered set on a fixed interval so failovers
//! are noticed even while no client is issuing operations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use drover_proto::defaults::WATCHER_INTERVAL_SECS;
use drover_proto::{HostPort, RsError, RsResult};

use crate::conn::Connector;
use crate::monitor::{ConfigChangeHook, ReplicaSetMonitor};

/// Set-name → monitor map for one process.
///
/// Applications create one registry over their connector and share it;
/// every [`ReplicaSetClient`](crate::rs_client::ReplicaSetClient) joins
/// its monitor through here.
pub struct MonitorRegistry {
    connector: Arc<dyn Connector>,
    sets: Mutex<HashMap<String, Arc<ReplicaSetMonitor>>>,
    /// Single process-wide config-change hook; installable once.
    hook: Arc<OnceLock<ConfigChangeHook>>,
    watcher_started: AtomicBool,
    shutting_down: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl MonitorRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            connector,
            sets: Mutex::new(HashMap::new()),
            hook: Arc::new(OnceLock::new()),
            watcher_started: AtomicBool::new(false),
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// Get the monitor for `name`, creating it from `seeds` on first use.
    ///
    /// The registry lock is never held across the seed probing: the
    /// monitor is built outside it and a second membership test decides
    /// whether our instance or a concurrent creator's wins.
    pub async fn get_or_create(
        self: &Arc<Self>,
        name: &str,
        seeds: &[HostPort],
    ) -> RsResult<Arc<ReplicaSetMonitor>> {
        if let Some(existing) = self.get(name) {
            self.start_watcher();
            return Ok(existing);
        }

        let monitor = Arc::new(
            ReplicaSetMonitor::new(name, seeds, self.connector.clone(), self.hook.clone())
                .await?,
        );
        let monitor = {
            let mut sets = self.sets.lock().unwrap();
            sets.entry(name.to_string()).or_insert(monitor).clone()
        };

        self.start_watcher();
        Ok(monitor)
    }

    /// Lookup only; `None` when the set was never registered.
    pub fn get(&self, name: &str) -> Option<Arc<ReplicaSetMonitor>> {
        self.sets.lock().unwrap().get(name).cloned()
    }

    /// Recheck every registered set, each exactly once.
    ///
    /// Sets added while the sweep runs are picked up too; the seen-list
    /// guarantees no set is visited twice in one sweep.
    pub async fn check_all(&self, check_all_secondaries: bool) {
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let next = {
                let sets = self.sets.lock().unwrap();
                sets.iter()
                    .find(|(name, _)| !seen.contains(*name))
                    .map(|(name, monitor)| (name.clone(), monitor.clone()))
            };
            let Some((name, monitor)) = next else {
                break;
            };
            debug!("checking replica set: {}", name);
            seen.insert(name);
            monitor.check(check_all_secondaries).await;
        }
    }

    /// Install the process-wide config-change hook. Installing a second
    /// hook is a caller error.
    pub fn set_config_change_hook(&self, hook: ConfigChangeHook) -> RsResult<()> {
        self.hook
            .set(hook)
            .map_err(|_| RsError::HookAlreadyInstalled)
    }

    /// Ask the watcher to exit; takes effect at its next wakeup.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    /// Idempotently spawn the watcher task.
    fn start_watcher(self: &Arc<Self>) {
        if self.watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = self.clone();
        tokio::spawn(async move {
            info!("replica set monitor watcher starting");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(WATCHER_INTERVAL_SECS)) => {}
                    _ = registry.shutdown_notify.notified() => {}
                }
                if registry.is_shutting_down() {
                    break;
                }
                registry.check_all(true).await;
            }
            info!("replica set monitor watcher exiting");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCluster, MockNode};
    use std::sync::atomic::AtomicUsize;

    fn addr(s: &str) -> HostPort {
        s.parse().unwrap()
    }

    fn single_primary(cluster: &MockCluster, addr: &str, set: &str) {
        cluster.put(
            addr,
            MockNode {
                set_name: Some(set.into()),
                ismaster: true,
                ..MockNode::default()
            },
        );
    }

    #[tokio::test]
    async fn test_get_or_create_returns_shared_instance() {
        let cluster = MockCluster::new();
        single_primary(&cluster, "a:5710", "rs0");
        let registry = MonitorRegistry::new(cluster.connector());

        let first = registry.get_or_create("rs0", &[addr("a:5710")]).await.unwrap();
        // seeds are ignored once the monitor exists
        let second = registry
            .get_or_create("rs0", &[addr("z:5710")])
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_lookup_only_misses() {
        let cluster = MockCluster::new();
        let registry = MonitorRegistry::new(cluster.connector());
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test]
    async fn test_empty_seeds_rejected() {
        let cluster = MockCluster::new();
        let registry = MonitorRegistry::new(cluster.connector());
        let result = registry.get_or_create("rs0", &[]).await;
        assert_eq!(result.err(), Some(RsError::EmptySeedList));
        // a failed creation leaves no entry behind
        assert!(registry.get("rs0").is_none());
    }

    #[tokio::test]
    async fn test_watcher_starts_once() {
        let cluster = MockCluster::new();
        single_primary(&cluster, "a:5710", "rs0");
        let registry = MonitorRegistry::new(cluster.connector());
        assert!(!registry.watcher_started.load(Ordering::SeqCst));

        registry.get_or_create("rs0", &[addr("a:5710")]).await.unwrap();
        assert!(registry.watcher_started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hook_installs_once() {
        let cluster = MockCluster::new();
        let registry = MonitorRegistry::new(cluster.connector());

        let hook: ConfigChangeHook = Arc::new(|_| {});
        assert!(registry.set_config_change_hook(hook).is_ok());

        let second: ConfigChangeHook = Arc::new(|_| {});
        assert_eq!(
            registry.set_config_change_hook(second).err(),
            Some(RsError::HookAlreadyInstalled)
        );
        assert_eq!(RsError::HookAlreadyInstalled.code(), Some(13610));
    }

    #[tokio::test]
    async fn test_hook_fires_on_discovery() {
        let cluster = MockCluster::new();
        cluster.put(
            "a:5710",
            MockNode {
                set_name: Some("rs0".into()),
                ismaster: true,
                hosts: vec!["a:5710".into(), "b:5710".into()],
                ..MockNode::default()
            },
        );
        cluster.add_secondary("b:5710", "rs0");

        let registry = MonitorRegistry::new(cluster.connector());
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = fired.clone();
        registry
            .set_config_change_hook(Arc::new(move |monitor| {
                assert_eq!(monitor.name(), "rs0");
                observed.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        registry.get_or_create("rs0", &[addr("a:5710")]).await.unwrap();
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_check_all_visits_every_set_once() {
        let cluster = MockCluster::new();
        single_primary(&cluster, "a:5710", "rs0");
        single_primary(&cluster, "x:5710", "rs1");
        let registry = MonitorRegistry::new(cluster.connector());

        registry.get_or_create("rs0", &[addr("a:5710")]).await.unwrap();
        registry.get_or_create("rs1", &[addr("x:5710")]).await.unwrap();

        let a_before = cluster.node("a:5710").probe_count;
        let x_before = cluster.node("x:5710").probe_count;

        registry.check_all(false).await;

        assert_eq!(cluster.node("a:5710").probe_count, a_before + 1);
        assert_eq!(cluster.node("x:5710").probe_count, x_before + 1);
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let cluster = MockCluster::new();
        let registry = MonitorRegistry::new(cluster.connector());
        assert!(!registry.is_shutting_down());
        registry.shutdown();
        assert!(registry.is_shutting_down());
    }
}
