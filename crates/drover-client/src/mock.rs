//! Scripted in-memory cluster for exercising the routing core.
//!
//! Implements [`Connector`] and [`DocClient`] over a table of per-node
//! role descriptions, so tests can stage discovery, failover, and
//! stepdown sequences without sockets. Role flags are mutable while a
//! monitor is live, which is exactly how a real set misbehaves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use drover_proto::{Cursor, Document, HostPort, Message, Reply, RsError, RsResult};

use crate::conn::{Connector, DocClient};

/// One scripted cluster member.
#[derive(Debug, Clone)]
pub struct MockNode {
    pub set_name: Option<String>,
    pub ismaster: bool,
    pub secondary: bool,
    pub hidden: bool,
    /// Primary address this node reports in its `isMaster` reply.
    pub primary: Option<String>,
    pub hosts: Vec<String>,
    pub passives: Vec<String>,
    /// When false, connects and every operation against this node fail.
    pub reachable: bool,
    /// Health this node gets in synthesized `replSetGetStatus` replies.
    pub healthy: bool,
    /// When false, this node refuses `replSetGetStatus`.
    pub status_enabled: bool,
    pub auth_fails: bool,
    /// Documents served for queries against this node.
    pub query_docs: Vec<Document>,
    pub probe_count: u64,
    pub query_count: u64,
    pub say_count: u64,
    pub write_count: u64,
}

impl Default for MockNode {
    fn default() -> Self {
        Self {
            set_name: None,
            ismaster: false,
            secondary: false,
            hidden: false,
            primary: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            reachable: true,
            healthy: true,
            status_enabled: true,
            auth_fails: false,
            query_docs: Vec::new(),
            probe_count: 0,
            query_count: 0,
            say_count: 0,
            write_count: 0,
        }
    }
}

/// The scripted cluster: a shared table of nodes plus an auth log.
pub struct MockCluster {
    nodes: Mutex<HashMap<String, MockNode>>,
    auth_log: Mutex<Vec<(String, String, String)>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            auth_log: Mutex::new(Vec::new()),
        })
    }

    pub fn put(&self, addr: &str, node: MockNode) {
        self.nodes.lock().unwrap().insert(addr.to_string(), node);
    }

    pub fn add_secondary(&self, addr: &str, set: &str) {
        self.put(
            addr,
            MockNode {
                set_name: Some(set.to_string()),
                secondary: true,
                ..MockNode::default()
            },
        );
    }

    pub fn update(&self, addr: &str, f: impl FnOnce(&mut MockNode)) {
        let mut nodes = self.nodes.lock().unwrap();
        f(nodes.get_mut(addr).expect("unknown mock node"));
    }

    /// Snapshot of one node's scripted state and counters.
    pub fn node(&self, addr: &str) -> MockNode {
        self.nodes.lock().unwrap().get(addr).expect("unknown mock node").clone()
    }

    /// `(addr, db, user)` triples, in authentication order.
    pub fn auth_log(&self) -> Vec<(String, String, String)> {
        self.auth_log.lock().unwrap().clone()
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            cluster: self.clone(),
        })
    }

    pub async fn connect_raw(self: &Arc<Self>, addr: &str) -> Arc<dyn DocClient> {
        self.connector()
            .connect(&addr.parse().unwrap(), None)
            .await
            .expect("mock connect failed")
    }
}

struct MockConnector {
    cluster: Arc<MockCluster>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        addr: &HostPort,
        _timeout: Option<Duration>,
    ) -> RsResult<Arc<dyn DocClient>> {
        let key = addr.to_string();
        {
            let nodes = self.cluster.nodes.lock().unwrap();
            match nodes.get(&key) {
                Some(node) if node.reachable => {}
                _ => return Err(RsError::ConnectFailed),
            }
        }
        Ok(Arc::new(MockConnection {
            cluster: self.cluster.clone(),
            addr: key,
        }))
    }
}

struct MockConnection {
    cluster: Arc<MockCluster>,
    addr: String,
}

impl MockConnection {
    fn with_node<T>(&self, f: impl FnOnce(&mut MockNode) -> RsResult<T>) -> RsResult<T> {
        let mut nodes = self.cluster.nodes.lock().unwrap();
        let node = nodes.get_mut(&self.addr).ok_or(RsError::Network)?;
        f(node)
    }
}

#[async_trait]
impl DocClient for MockConnection {
    async fn is_master(&self) -> RsResult<Document> {
        self.with_node(|node| {
            node.probe_count += 1;
            if !node.reachable {
                return Err(RsError::Network);
            }
            let mut doc = json!({
                "ismaster": node.ismaster,
                "secondary": node.secondary,
                "hidden": node.hidden,
            });
            if let Some(set) = &node.set_name {
                doc["setName"] = json!(set);
            }
            if let Some(primary) = &node.primary {
                doc["primary"] = json!(primary);
            }
            if !node.hosts.is_empty() {
                doc["hosts"] = json!(node.hosts);
            }
            if !node.passives.is_empty() {
                doc["passives"] = json!(node.passives);
            }
            Ok(doc)
        })
    }

    async fn run_command(&self, db: &str, cmd: Document) -> RsResult<Document> {
        let nodes = self.cluster.nodes.lock().unwrap();
        let node = nodes.get(&self.addr).ok_or(RsError::Network)?;
        if !node.reachable {
            return Err(RsError::Network);
        }
        if db == "admin" && cmd.get("replSetGetStatus").is_some() {
            if !node.status_enabled {
                return Err(RsError::Command);
            }
            let Some(set) = node.set_name.clone() else {
                return Err(RsError::Command);
            };
            let members: Vec<Document> = nodes
                .iter()
                .filter(|(_, n)| n.set_name.as_deref() == Some(set.as_str()))
                .map(|(addr, n)| {
                    json!({
                        "name": addr,
                        "health": if n.reachable && n.healthy { 1 } else { 0 },
                        "state": if n.ismaster {
                            1
                        } else if n.secondary {
                            2
                        } else {
                            8
                        },
                    })
                })
                .collect();
            return Ok(json!({ "set": set, "members": members }));
        }
        Err(RsError::Command)
    }

    async fn auth(&self, db: &str, user: &str, _pwd: &str, _digest: bool) -> RsResult<()> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            if node.auth_fails {
                return Err(RsError::Auth);
            }
            Ok(())
        })?;
        self.cluster.auth_log.lock().unwrap().push((
            self.addr.clone(),
            db.to_string(),
            user.to_string(),
        ));
        Ok(())
    }

    fn is_failed(&self) -> bool {
        let nodes = self.cluster.nodes.lock().unwrap();
        match nodes.get(&self.addr) {
            Some(node) => !node.reachable,
            None => true,
        }
    }

    async fn query(&self, _ns: &str, _filter: &Document, _flags: u32) -> RsResult<Cursor> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            node.query_count += 1;
            Ok(Cursor::new(node.query_docs.clone()))
        })
    }

    async fn find_one(
        &self,
        _ns: &str,
        _filter: &Document,
        _flags: u32,
    ) -> RsResult<Option<Document>> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            node.query_count += 1;
            Ok(node.query_docs.first().cloned())
        })
    }

    async fn insert(&self, _ns: &str, _docs: &[Document]) -> RsResult<()> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            node.write_count += 1;
            Ok(())
        })
    }

    async fn update(
        &self,
        _ns: &str,
        _filter: &Document,
        _update: &Document,
        _upsert: bool,
        _multi: bool,
    ) -> RsResult<()> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            node.write_count += 1;
            Ok(())
        })
    }

    async fn remove(&self, _ns: &str, _filter: &Document, _just_one: bool) -> RsResult<()> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            node.write_count += 1;
            Ok(())
        })
    }

    async fn say(&self, _msg: &Message) -> RsResult<()> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            node.say_count += 1;
            Ok(())
        })
    }

    async fn recv(&self) -> RsResult<Reply> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            Ok(Reply {
                n_returned: node.query_docs.len() as i64,
                docs: node.query_docs.clone(),
            })
        })
    }

    async fn call(&self, _msg: &Message) -> RsResult<Reply> {
        self.with_node(|node| {
            if !node.reachable {
                return Err(RsError::Network);
            }
            node.say_count += 1;
            Ok(Reply {
                n_returned: node.query_docs.len() as i64,
                docs: node.query_docs.clone(),
            })
        })
    }

    fn server_address(&self) -> String {
        self.addr.clone()
    }
}
