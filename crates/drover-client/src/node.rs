//! Per-member state tracked by the replica-set monitor.

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use drover_proto::{Document, HostPort};

use crate::conn::DocClient;

/// One member of a replica set, as last observed by probing.
///
/// Records are append-only: once a member is discovered it stays in the
/// monitor's list for the monitor's lifetime and only its flags change.
/// All mutation happens under the monitor's state lock.
pub struct Node {
    /// Member address. Immutable after creation.
    pub addr: HostPort,
    /// Shared probe connection, created once at discovery. If the socket
    /// drops, the connection layer re-establishes it on the next probe.
    pub conn: Arc<dyn DocClient>,
    /// Liveness: the last probe succeeded and reported the node usable.
    /// New members start optimistic until a probe says otherwise.
    pub ok: bool,
    pub ismaster: bool,
    pub secondary: bool,
    pub hidden: bool,
    /// Round-trip time of the last successful probe.
    pub ping_time_millis: u64,
    /// Most recent raw `isMaster` reply, kept for diagnostics.
    pub last_is_master: Option<Document>,
}

impl Node {
    pub fn new(addr: HostPort, conn: Arc<dyn DocClient>) -> Self {
        Self {
            addr,
            conn,
            ok: true,
            ismaster: false,
            secondary: false,
            hidden: false,
            ping_time_millis: 0,
            last_is_master: None,
        }
    }

    /// Whether this member may serve secondary-ok reads.
    pub fn ok_for_secondary_queries(&self) -> bool {
        self.ok && self.secondary && !self.hidden
    }

    /// Diagnostics row for this member.
    pub fn info(&self) -> Document {
        json!({
            "addr": self.addr.to_string(),
            "ok": self.ok,
            "ismaster": self.ismaster,
            "hidden": self.hidden,
            "secondary": self.secondary,
            "pingTimeMillis": self.ping_time_millis,
        })
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
