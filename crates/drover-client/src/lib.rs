//! # drover-client
//!
//! Client-side replica-set routing core for the drover document database.
//!
//! A replicated cluster has one primary accepting writes and any number of
//! secondaries serving replicated reads. This crate keeps a live view of
//! that topology and routes operations to the right member:
//!
//! - [`ReplicaSetMonitor`] — shared per-set registry of members and roles,
//!   refreshed by probing each node with `isMaster` and `replSetGetStatus`.
//! - [`MonitorRegistry`] — process-wide set-name → monitor map, plus the
//!   background watcher task that rechecks every set periodically.
//! - [`ReplicaSetClient`] — a connection-like façade that binds to the
//!   current primary (and, for secondary-ok reads, a rotating secondary),
//!   retries across failovers, and replays cached credentials onto newly
//!   opened connections.
//!
//! The single-node connection itself (sockets, wire framing, handshakes)
//! is consumed through the [`conn::DocClient`] and [`conn::Connector`]
//! traits, keeping the transport pluggable.

pub mod conn;
pub mod monitor;
pub mod node;
pub mod registry;
pub mod rs_client;

#[cfg(test)]
pub(crate) mod mock;

// Re-export commonly used types at the crate root
pub use conn::{Connector, DocClient};
pub use monitor::{ConfigChangeHook, ReplicaSetMonitor};
pub use registry::MonitorRegistry;
pub use rs_client::{ReplicaSetClient, ResponseCheck};
