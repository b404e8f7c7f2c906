/// Typed views of the role-discovery command replies.
///
/// Every member answers `isMaster` describing its own role and its view of
/// set membership; `replSetGetStatus` (admin database) reports the health
/// of every member. Both arrive as documents; these structs are the fields
/// the routing core consumes, with unknown fields ignored.

use serde::{Deserialize, Serialize};

use crate::error::{RsError, RsResult};
use crate::Document;

/// Reply to the `isMaster` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IsMasterReply {
    /// Name of the replica set this member belongs to. Absent on
    /// standalone nodes.
    pub set_name: Option<String>,
    pub ismaster: bool,
    pub secondary: bool,
    pub hidden: bool,
    /// Address of the primary, as this member last saw it.
    pub primary: Option<String>,
    /// Voting members of the set, as `host:port` strings.
    pub hosts: Vec<String>,
    /// Passive (non-voting) members.
    pub passives: Vec<String>,
}

impl IsMasterReply {
    pub fn from_document(doc: &Document) -> RsResult<Self> {
        serde_json::from_value(doc.clone()).map_err(|_| RsError::Protocol)
    }
}

/// Member state codes reported by `replSetGetStatus`.
pub const MEMBER_STATE_PRIMARY: i64 = 1;
pub const MEMBER_STATE_SECONDARY: i64 = 2;

/// One member entry in the `replSetGetStatus` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberStatus {
    pub name: String,
    pub health: f64,
    pub state: i64,
}

impl MemberStatus {
    /// Whether this member is healthy and serving data (primary or
    /// secondary, not arbiter/recovering/down).
    pub fn is_live_data_member(&self) -> bool {
        self.health == 1.0
            && (self.state == MEMBER_STATE_PRIMARY || self.state == MEMBER_STATE_SECONDARY)
    }
}

/// Reply to the `replSetGetStatus` admin command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplSetStatus {
    pub set: String,
    pub members: Vec<MemberStatus>,
}

impl ReplSetStatus {
    pub fn from_document(doc: &Document) -> RsResult<Self> {
        serde_json::from_value(doc.clone()).map_err(|_| RsError::Protocol)
    }
}
