/// Wire message and reply shapes.
///
/// Framing and byte layout belong to the single-node connection layer; the
/// routing core only needs to see which operation a message carries and
/// whether a query permits secondary reads, so messages are kept as
/// structured values rather than encoded buffers.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::Document;

/// Operation carried by a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    Query,
    GetMore,
    Insert,
    Update,
    Delete,
    KillCursors,
    Command,
    Reply,
}

/// Query flag: the caller accepts reads from a secondary member.
pub const QUERY_SECONDARY_OK: u32 = 1 << 2;

/// A single client-to-server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Request ID, for matching replies.
    pub id: u32,
    pub op: OpCode,
    /// Op-specific flag bits (e.g. [`QUERY_SECONDARY_OK`]).
    pub flags: u32,
    /// Target namespace, `db.collection`.
    pub ns: String,
    /// Operation payload documents.
    pub body: Vec<Document>,
}

impl Message {
    pub fn query(ns: impl Into<String>, filter: Document, flags: u32) -> Self {
        Self {
            id: 0,
            op: OpCode::Query,
            flags,
            ns: ns.into(),
            body: vec![filter],
        }
    }

    /// Whether this is a query that may be served by a secondary.
    pub fn is_secondary_ok_query(&self) -> bool {
        self.op == OpCode::Query && self.flags & QUERY_SECONDARY_OK != 0
    }
}

/// A server reply to a single message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    /// Number of documents returned; −1 marks a network-level failure.
    pub n_returned: i64,
    pub docs: Vec<Document>,
}

impl Reply {
    pub fn first(&self) -> Option<&Document> {
        self.docs.first()
    }
}

/// Whether a result document is an error report.
pub fn has_err_field(doc: &Document) -> bool {
    doc.get("$err").is_some()
}

/// Numeric error code carried by a result document, if any.
pub fn error_code(doc: &Document) -> Option<i64> {
    doc.get("code").and_then(Document::as_i64)
}

/// A batch of query result documents, consumed front to back.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    docs: VecDeque<Document>,
}

impl Cursor {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs: docs.into() }
    }

    pub fn more(&self) -> bool {
        !self.docs.is_empty()
    }

    pub fn next(&mut self) -> Option<Document> {
        self.docs.pop_front()
    }

    /// Peek at the head of the batch without consuming it, returning it
    /// only if it is an error report.
    pub fn peek_error(&self) -> Option<&Document> {
        self.docs.front().filter(|d| has_err_field(d))
    }
}
