use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a configured Redis instance, in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddr {
    pub host: String,
    pub port: u16,
}

impl EndpointAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Redis URL for this endpoint.
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for EndpointAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::configuration(format!("invalid endpoint '{}': expected host:port", s)))?;
        if host.is_empty() {
            return Err(Error::configuration(format!(
                "invalid endpoint '{}': empty host",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::configuration(format!("invalid endpoint '{}': bad port", s)))?;
        Ok(Self::new(host, port))
    }
}

/// Replication role reported by a Redis instance.
///
/// A slave carries the address of the master it replicates, as reported by
/// the `ROLE` command. Unreachable or confused instances are `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedisRole {
    Master,
    Slave { master: EndpointAddr },
    Unknown,
}

impl RedisRole {
    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master)
    }

    pub fn is_slave_of(&self, addr: &EndpointAddr) -> bool {
        matches!(self, Self::Slave { master } if master == addr)
    }
}

/// Immutable result of probing one endpoint during a probe cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub addr: EndpointAddr,
    pub role: RedisRole,
    pub available: bool,
}

impl EndpointStatus {
    pub fn unreachable(addr: EndpointAddr) -> Self {
        Self {
            addr,
            role: RedisRole::Unknown,
            available: false,
        }
    }
}
