/// Drover error types.
///
/// Errors that are part of the public contract carry stable numeric codes
/// so callers can match on them across client versions; the rest are
/// client-local conditions with no code. The server-side "not primary or
/// secondary" condition also has a fixed code because secondaries report
/// it inside result documents during a failover.

use serde::{Deserialize, Serialize};

/// Unified error type for all drover operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum RsError {
    // Precondition violations (caller contract, never retried)
    #[error("need at least 1 node for a replica set")]
    EmptySeedList,
    #[error("config change hook already installed")]
    HookAlreadyInstalled,
    #[error("cursor operations cannot be routed through a replica-set connection")]
    CursorUnsupported,
    #[error("no pipelined request in flight")]
    NoRequestInFlight,

    // Unrecoverable topology conditions
    #[error("no primary found for set")]
    NoPrimaryFound,
    #[error("can't connect to new replica set primary")]
    PrimaryConnectFailed,
    #[error("no reachable nodes in set")]
    NoReachableNodes,

    // Topology mismatch (retried until the budget runs out)
    #[error("secondary is no longer usable for reads")]
    NoLongerSecondary,
    #[error("node is not primary or secondary")]
    NotPrimaryOrSecondary,

    // Transient I/O
    #[error("could not reach node")]
    ConnectFailed,
    #[error("network error")]
    Network,
    #[error("command failed")]
    Command,
    #[error("authentication failed")]
    Auth,
    #[error("malformed reply")]
    Protocol,
}

/// Server-reported error code meaning the responding node is neither
/// primary nor secondary. Secondaries emit it in result documents while
/// stepping down; the client translates it into a retry.
pub const NOT_PRIMARY_OR_SECONDARY: i64 = 13436;

impl RsError {
    /// Stable user-visible code for this error, if it has one.
    pub fn code(self) -> Option<i64> {
        match self {
            Self::EmptySeedList => Some(13642),
            Self::NoPrimaryFound => Some(10009),
            Self::PrimaryConnectFailed => Some(13639),
            Self::HookAlreadyInstalled => Some(13610),
            Self::NoLongerSecondary => Some(14812),
            Self::NotPrimaryOrSecondary => Some(NOT_PRIMARY_OR_SECONDARY),
            _ => None,
        }
    }

    /// Map a stable code back to its error.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            13642 => Some(Self::EmptySeedList),
            10009 => Some(Self::NoPrimaryFound),
            13639 => Some(Self::PrimaryConnectFailed),
            13610 => Some(Self::HookAlreadyInstalled),
            14812 => Some(Self::NoLongerSecondary),
            NOT_PRIMARY_OR_SECONDARY => Some(Self::NotPrimaryOrSecondary),
            _ => None,
        }
    }
}

/// Result type alias for drover operations.
pub type RsResult<T> = Result<T, RsError>;

impl From<std::io::Error> for RsError {
    fn from(_: std::io::Error) -> Self {
        RsError::Network
    }
}
