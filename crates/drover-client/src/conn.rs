//! Single-node connection abstraction — decouples routing from the wire.
//!
//! The monitor and the replica-set client never touch sockets directly.
//! Everything they need from one node goes through [`DocClient`], and new
//! connections are opened through [`Connector`]. Production code plugs in
//! the real TCP client; tests plug in a scripted cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use drover_proto::{Cursor, Document, HostPort, Message, Reply, RsResult};

/// Opens connections to individual cluster members.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `addr`, applying `timeout` to the socket if given.
    ///
    /// Monitor probe connections pass a short fixed timeout; client data
    /// connections pass the caller's configured socket timeout.
    async fn connect(
        &self,
        addr: &HostPort,
        timeout: Option<Duration>,
    ) -> RsResult<Arc<dyn DocClient>>;
}

/// A live connection to a single database node.
///
/// Handles are shared (`Arc`) and internally synchronized; implementations
/// reconnect a dropped socket on the next use rather than failing forever,
/// so a probe connection created at discovery time stays usable across
/// node restarts.
#[async_trait]
pub trait DocClient: Send + Sync + 'static {
    /// Run `isMaster` and return the raw reply document.
    async fn is_master(&self) -> RsResult<Document>;

    /// Run an arbitrary command against `db`.
    async fn run_command(&self, db: &str, cmd: Document) -> RsResult<Document>;

    /// Authenticate against `db`.
    async fn auth(&self, db: &str, user: &str, pwd: &str, digest: bool) -> RsResult<()>;

    /// Whether the underlying socket is known dead.
    fn is_failed(&self) -> bool;

    async fn query(&self, ns: &str, filter: &Document, flags: u32) -> RsResult<Cursor>;

    async fn find_one(&self, ns: &str, filter: &Document, flags: u32)
        -> RsResult<Option<Document>>;

    async fn insert(&self, ns: &str, docs: &[Document]) -> RsResult<()>;

    async fn update(
        &self,
        ns: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> RsResult<()>;

    async fn remove(&self, ns: &str, filter: &Document, just_one: bool) -> RsResult<()>;

    /// Send a message without waiting for the reply.
    async fn say(&self, msg: &Message) -> RsResult<()>;

    /// Receive the reply to the last [`say`](DocClient::say).
    async fn recv(&self) -> RsResult<Reply>;

    /// Paired send and receive.
    async fn call(&self, msg: &Message) -> RsResult<Reply>;

    /// `host:port` of the connected node.
    fn server_address(&self) -> String;
}
