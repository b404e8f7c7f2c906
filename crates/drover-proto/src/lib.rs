//! # drover-proto
//!
//! Protocol types, error codes, and message framing for the drover
//! replica-set client.
//!
//! This crate defines the host addressing, error taxonomy, wire message
//! shapes, and typed command replies shared by every drover component.
//! It carries no I/O; the actual socket layer lives behind the connection
//! traits in `drover-client`.

pub mod defaults;
pub mod error;
pub mod host;
pub mod ismaster;
pub mod message;

// Re-export commonly used types at the crate root
pub use error::{RsError, RsResult};
pub use host::HostPort;
pub use ismaster::{IsMasterReply, MemberStatus, ReplSetStatus};
pub use message::{Cursor, Message, OpCode, Reply};

/// A database document. Commands, replies, and query results are all
/// documents; typed views (e.g. [`IsMasterReply`]) deserialize from them.
pub type Document = serde_json::Value;
