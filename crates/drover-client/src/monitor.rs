//! Replica-set monitor — one shared live view of a set's membership.
//!
//! The monitor discovers members by probing: each probe runs `isMaster`
//! on one node, folds the reply into that node's record, appends any
//! members the reply names that we have not seen yet, and reconciles
//! liveness from `replSetGetStatus`. Selection then reads the records:
//! the primary is whichever node last self-identified as primary, and
//! secondary reads round-robin over the members usable for them.
//!
//! ## Locking
//!
//! Two locks with a fixed order (probe lock first):
//!
//! - the **probe lock** (`tokio::sync::Mutex`) serializes the whole
//!   probe-and-mutate sequence for a set, and is the only lock held
//!   across I/O;
//! - the **state lock** (`std::sync::Mutex`) protects the member list
//!   and role flags, and is only ever held for short critical sections.
//!   Connections are cloned out under it and used after it is released.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use drover_proto::defaults::{
    PROBE_CONNECT_TIMEOUT_SECS, RECHECK_PASSES, RECHECK_RETRY_DELAY_SECS, SECONDARY_SELECT_PASSES,
};
use drover_proto::ismaster::{IsMasterReply, ReplSetStatus};
use drover_proto::{Document, HostPort, RsError, RsResult};

use crate::conn::{Connector, DocClient};
use crate::node::Node;

/// Callback invoked after any probe cycle that discovered new members.
pub type ConfigChangeHook = Arc<dyn Fn(&ReplicaSetMonitor) + Send + Sync>;

const PROBE_TIMEOUT: Duration = Duration::from_secs(PROBE_CONNECT_TIMEOUT_SECS);

/// Membership and selection state, all behind the state lock.
struct MonitorState {
    /// Members in discovery order. Append-only.
    nodes: Vec<Node>,
    /// Index of the current primary, if one has been confirmed.
    master: Option<usize>,
    /// Round-robin cursor for secondary selection.
    next_secondary: usize,
}

/// Shared, concurrently usable view of one replica set.
///
/// One monitor exists per set name per process (see
/// [`MonitorRegistry`](crate::registry::MonitorRegistry)); every client
/// for that set routes through it.
pub struct ReplicaSetMonitor {
    name: String,
    connector: Arc<dyn Connector>,
    /// Process-wide config-change hook cell, shared with the registry.
    hook: Arc<OnceLock<ConfigChangeHook>>,
    state: Mutex<MonitorState>,
    probe_lock: AsyncMutex<()>,
}

impl ReplicaSetMonitor {
    /// Build a monitor from a seed list, probing each reachable seed once.
    ///
    /// Seeds that cannot be reached are skipped; they rejoin through
    /// discovery if another member reports them later.
    pub(crate) async fn new(
        name: &str,
        seeds: &[HostPort],
        connector: Arc<dyn Connector>,
        hook: Arc<OnceLock<ConfigChangeHook>>,
    ) -> RsResult<Self> {
        if seeds.is_empty() {
            return Err(RsError::EmptySeedList);
        }
        if name.is_empty() {
            warn!("replica set name empty, first node: {}", seeds[0]);
        }

        let monitor = Self {
            name: name.to_string(),
            connector,
            hook,
            state: Mutex::new(MonitorState {
                nodes: Vec::new(),
                master: None,
                next_secondary: 0,
            }),
            probe_lock: AsyncMutex::new(()),
        };

        for seed in seeds {
            if monitor.find(seed).is_some() {
                continue;
            }
            let conn = match monitor.connector.connect(seed, Some(PROBE_TIMEOUT)).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!("error connecting to seed {}: {}", seed, e);
                    continue;
                }
            };
            let offset = {
                let mut state = monitor.state.lock().unwrap();
                state.nodes.push(Node::new(seed.clone(), conn.clone()));
                state.nodes.len() - 1
            };
            let (is_master, _) = monitor.check_connection(conn, Some(offset)).await;
            if is_master {
                monitor.state.lock().unwrap().master = Some(offset);
            }
        }

        Ok(monitor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical rendering: `"<name>/host1:port1,host2:port2,…"`, or just
    /// the host list when the set name is empty.
    pub fn server_address(&self) -> String {
        let mut out = String::new();
        if !self.name.is_empty() {
            out.push_str(&self.name);
            out.push('/');
        }
        let state = self.state.lock().unwrap();
        for (i, node) in state.nodes.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&node.addr.to_string());
        }
        out
    }

    /// Whether `server` (as `host:port`) is a known member.
    pub fn contains(&self, server: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.nodes.iter().any(|n| n.addr.to_string() == server)
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    /// Address of the current primary.
    ///
    /// Answers from the cached selection when it is still marked live;
    /// otherwise runs a full recheck first. Fails with
    /// [`RsError::NoPrimaryFound`] when no member claims the role.
    pub async fn get_primary(&self) -> RsResult<HostPort> {
        {
            let state = self.state.lock().unwrap();
            if let Some(i) = state.master {
                if state.nodes[i].ok {
                    return Ok(state.nodes[i].addr.clone());
                }
            }
        }

        self.full_check(false).await;

        let state = self.state.lock().unwrap();
        match state.master {
            Some(i) => Ok(state.nodes[i].addr.clone()),
            None => {
                warn!("no primary found for set: {}", self.name);
                Err(RsError::NoPrimaryFound)
            }
        }
    }

    /// Like [`get_secondary`](Self::get_secondary), but keeps using `prev`
    /// if it is still usable for secondary reads.
    pub async fn get_secondary_from(&self, prev: Option<&HostPort>) -> RsResult<HostPort> {
        if let Some(prev) = prev {
            let mut was_found = false;
            {
                let state = self.state.lock().unwrap();
                for node in &state.nodes {
                    if node.addr != *prev {
                        continue;
                    }
                    was_found = true;
                    if node.ok_for_secondary_queries() {
                        return Ok(prev.clone());
                    }
                    break;
                }
            }
            if was_found {
                debug!("secondary '{}' is no longer ok to use", prev);
            } else {
                debug!("secondary '{}' was not found in the replica set", prev);
            }
        }
        self.get_secondary().await
    }

    /// Select the next member usable for secondary reads.
    ///
    /// Rotates the round-robin cursor, skipping the primary and anything
    /// not usable. Each pass that comes up empty triggers a recheck; the
    /// final pass accepts any live node, and when even that fails the
    /// first known node is returned regardless of its state, so callers
    /// that need a healthy node find out on use.
    pub async fn get_secondary(&self) -> RsResult<HostPort> {
        debug!(
            "selecting new secondary from replica set {}",
            self.server_address()
        );

        for pass in 0..SECONDARY_SELECT_PASSES {
            {
                let mut guard = self.state.lock().unwrap();
                let state = &mut *guard;
                let n = state.nodes.len();
                for _ in 0..n {
                    state.next_secondary = (state.next_secondary + 1) % n;
                    let idx = state.next_secondary;
                    if state.master == Some(idx) {
                        debug!(
                            "not selecting {} as it is the current primary",
                            state.nodes[idx]
                        );
                        continue;
                    }
                    let node = &state.nodes[idx];
                    if node.ok_for_secondary_queries()
                        || (node.ok && pass + 1 >= SECONDARY_SELECT_PASSES)
                    {
                        return Ok(node.addr.clone());
                    }
                    debug!("not selecting {} as it is not ok to use", node);
                }
            }

            self.check(false).await;
        }

        let state = self.state.lock().unwrap();
        match state.nodes.first() {
            Some(node) => {
                debug!("no suitable secondary found, returning default node {}", node);
                Ok(node.addr.clone())
            }
            None => Err(RsError::NoReachableNodes),
        }
    }

    /// Report that the primary failed. Clears the cached selection so the
    /// next [`get_primary`](Self::get_primary) reprobes. No-op for any
    /// other address.
    pub fn notify_primary_failure(&self, server: &HostPort) {
        let mut state = self.state.lock().unwrap();
        if let Some(i) = state.master {
            if state.nodes[i].addr == *server {
                state.nodes[i].ok = false;
                state.master = None;
            }
        }
    }

    /// Report that a member failed as a read target. Never touches the
    /// primary selection.
    pub fn notify_secondary_failure(&self, server: &HostPort) {
        let mut state = self.state.lock().unwrap();
        if let Some(i) = state.nodes.iter().position(|n| n.addr == *server) {
            state.nodes[i].ok = false;
        }
    }

    /// Refresh the set: reprobe the cached primary first, and stop there
    /// if it still holds the role and `check_all_secondaries` is false.
    pub async fn check(&self, check_all_secondaries: bool) {
        let master_conn = {
            let state = self.state.lock().unwrap();
            state.master.map(|i| (i, state.nodes[i].conn.clone()))
        };
        if let Some((i, conn)) = master_conn {
            let (is_master, _) = self.check_connection(conn, Some(i)).await;
            if is_master && !check_all_secondaries {
                return;
            }
        }

        // no primary selected, or the selection is stale
        self.full_check(check_all_secondaries).await;
    }

    /// Probe every member looking for the primary, up to two passes with
    /// a short delay between them.
    ///
    /// A reply naming a primary triggers one out-of-order "quick check"
    /// of that member per invocation, so a failover usually resolves on
    /// the first pass. Members appended during the pass are picked up by
    /// the same pass.
    async fn full_check(&self, check_all_secondaries: bool) {
        debug!("full check: {}", self.server_address());

        let mut tried_quick_check = false;
        let mut new_master = None;

        for pass in 0..RECHECK_PASSES {
            let mut i = 0;
            loop {
                let conn = {
                    let state = self.state.lock().unwrap();
                    match state.nodes.get(i) {
                        Some(node) => node.conn.clone(),
                        None => break,
                    }
                };

                let (is_master, maybe_primary) = self.check_connection(conn, Some(i)).await;
                if is_master {
                    self.state.lock().unwrap().master = Some(i);
                    new_master = Some(i);
                    if !check_all_secondaries {
                        return;
                    }
                }

                if !tried_quick_check {
                    if let Some(hint) = maybe_primary {
                        if let Some(x) = self.find_by_name(&hint) {
                            tried_quick_check = true;
                            let conn = {
                                let state = self.state.lock().unwrap();
                                state.nodes[x].conn.clone()
                            };
                            let (is_master, _) = self.check_connection(conn, Some(x)).await;
                            if is_master {
                                self.state.lock().unwrap().master = Some(x);
                                new_master = Some(x);
                                if !check_all_secondaries {
                                    return;
                                }
                            }
                        }
                    }
                }

                i += 1;
            }

            if new_master.is_some() {
                return;
            }
            if pass + 1 < RECHECK_PASSES {
                tokio::time::sleep(Duration::from_secs(RECHECK_RETRY_DELAY_SECS)).await;
            }
        }
    }

    /// Probe one member and fold the result into its record.
    ///
    /// Serialized by the probe lock. Returns whether the member
    /// self-identified as primary, plus the primary address hint from its
    /// reply, if any. Probe failures mark the member down and are
    /// otherwise swallowed.
    async fn check_connection(
        &self,
        conn: Arc<dyn DocClient>,
        offset: Option<usize>,
    ) -> (bool, Option<String>) {
        let _probe = self.probe_lock.lock().await;

        let mut changed = false;
        let started = Instant::now();

        let result = match conn.is_master().await {
            Ok(doc) => {
                let ping_millis = started.elapsed().as_millis() as u64;
                let reply = IsMasterReply::from_document(&doc).unwrap_or_default();

                if reply.set_name.as_deref() != Some(self.name.as_str()) {
                    warn!(
                        "node {} isn't a part of set {}, isMaster: {}",
                        conn.server_address(),
                        self.name,
                        doc
                    );
                    if let Some(i) = offset {
                        self.state.lock().unwrap().nodes[i].ok = false;
                    }
                    return (false, None);
                }

                if let Some(i) = offset {
                    let mut state = self.state.lock().unwrap();
                    let node = &mut state.nodes[i];
                    node.ping_time_millis = ping_millis;
                    node.hidden = reply.hidden;
                    node.secondary = reply.secondary;
                    node.ismaster = reply.ismaster;
                    node.last_is_master = Some(doc);
                }

                debug!(
                    "probed {}: ismaster={} secondary={}",
                    conn.server_address(),
                    reply.ismaster,
                    reply.secondary
                );

                let mut maybe_primary = None;
                if !reply.hosts.is_empty() {
                    maybe_primary = reply.primary.clone();
                    changed |= self.check_hosts(&reply.hosts).await;
                }
                if !reply.passives.is_empty() {
                    changed |= self.check_hosts(&reply.passives).await;
                }

                self.check_status(conn.as_ref()).await;

                (reply.ismaster, maybe_primary)
            }
            Err(e) => {
                debug!("probe of {} failed: {}", conn.server_address(), e);
                if let Some(i) = offset {
                    self.state.lock().unwrap().nodes[i].ok = false;
                }
                (false, None)
            }
        };

        if changed {
            if let Some(hook) = self.hook.get() {
                hook(self);
            }
        }

        result
    }

    /// Append any members of `hosts` we have not seen yet.
    ///
    /// The connect happens outside the state lock, so presence is tested
    /// again under the lock before appending: two concurrent probes may
    /// race to add the same host, and only one append must win.
    async fn check_hosts(&self, hosts: &[String]) -> bool {
        let mut changed = false;
        for host in hosts {
            let addr: HostPort = match host.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    warn!("bad member address in isMaster reply: {:?}", host);
                    continue;
                }
            };
            if self.find(&addr).is_some() {
                continue;
            }

            let conn = match self.connector.connect(&addr, Some(PROBE_TIMEOUT)).await {
                Ok(conn) => conn,
                Err(e) => {
                    // unreachable right now; a later probe cycle will
                    // report it again
                    debug!("error connecting to new member {}: {}", addr, e);
                    continue;
                }
            };

            {
                let mut state = self.state.lock().unwrap();
                if state.nodes.iter().any(|n| n.addr == addr) {
                    continue;
                }
                state.nodes.push(Node::new(addr, conn));
            }
            info!("updated set ({}) to: {}", self.name, self.server_address());
            changed = true;
        }
        changed
    }

    /// Reconcile per-member liveness from `replSetGetStatus`: a member is
    /// live iff its health is up and it reports as primary or secondary.
    async fn check_status(&self, conn: &dyn DocClient) {
        let reply = match conn.run_command("admin", json!({"replSetGetStatus": 1})).await {
            Ok(reply) => reply,
            Err(_) => return,
        };
        let status = match ReplSetStatus::from_document(&reply) {
            Ok(status) => status,
            Err(_) => return,
        };

        for member in &status.members {
            let Some(i) = self.find_by_name(&member.name) else {
                continue;
            };
            let ok = member.is_live_data_member();
            self.state.lock().unwrap().nodes[i].ok = ok;
        }
    }

    /// Diagnostics snapshot: per-member flags plus the selection cursors.
    pub fn topology_info(&self) -> Document {
        let state = self.state.lock().unwrap();
        json!({
            "hosts": state.nodes.iter().map(Node::info).collect::<Vec<_>>(),
            "master": state.master.map(|i| i as i64).unwrap_or(-1),
            "nextSlave": state.next_secondary as i64,
        })
    }

    fn find(&self, addr: &HostPort) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state.nodes.iter().position(|n| n.addr == *addr)
    }

    fn find_by_name(&self, server: &str) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state.nodes.iter().position(|n| n.addr.to_string() == server)
    }
}
