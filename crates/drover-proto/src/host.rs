/// Host addressing for cluster members.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::defaults::DEFAULT_DB_PORT;
use crate::error::RsError;

/// Network address of a cluster member, compared by value.
///
/// Members are identified by hostname rather than resolved IP because the
/// server reports its peers as `host:port` strings and those strings are
/// the membership keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = RsError;

    /// Parse `host:port`, or a bare `host` with the default port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RsError::Protocol);
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(RsError::Protocol);
                }
                let port = port.parse().map_err(|_| RsError::Protocol)?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, DEFAULT_DB_PORT)),
        }
    }
}
