//! [`ConnectionFact`]: a reachable service endpoint and its relation-bag encoding.
//!
//! Wire form (provider -> requirer), both values strings:
//!
//! ```text
//! host: <address>
//! port: <decimal port>
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FactError;
use crate::types::Databag;

pub const HOST_KEY: &str = "host";
pub const PORT_KEY: &str = "port";

/// A complete `(host, port)` endpoint. Incomplete facts cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionFact {
    pub host: String,
    pub port: u16,
}

impl ConnectionFact {
    /// Build a fact, rejecting an empty host or port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, FactError> {
        let host = host.into();
        if host.is_empty() {
            return Err(FactError::EmptyHost);
        }
        if port == 0 {
            return Err(FactError::PortOutOfRange(0));
        }
        Ok(Self { host, port })
    }

    /// Parse a fact out of a remote bag.
    ///
    /// Keys are checked before values so a bag with neither key reports the
    /// missing host first.
    pub fn from_databag(bag: &Databag) -> Result<Self, FactError> {
        let host = bag.get(HOST_KEY).ok_or(FactError::MissingKey(HOST_KEY))?;
        let raw_port = bag.get(PORT_KEY).ok_or(FactError::MissingKey(PORT_KEY))?;
        let port = parse_port(raw_port)?;
        Self::new(host.clone(), port)
    }

    /// Encode as bag entries; the port is written in decimal.
    pub fn to_databag(&self) -> Databag {
        let mut bag = Databag::new();
        bag.insert(HOST_KEY.to_string(), self.host.clone());
        bag.insert(PORT_KEY.to_string(), self.port.to_string());
        bag
    }

    /// `true` when `bag` already carries exactly this fact.
    pub fn is_published_in(&self, bag: &Databag) -> bool {
        bag.get(HOST_KEY) == Some(&self.host) && bag.get(PORT_KEY) == Some(&self.port.to_string())
    }
}

impl fmt::Display for ConnectionFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn parse_port(raw: &str) -> Result<u16, FactError> {
    let value: i64 = raw.parse().map_err(|source| FactError::MalformedPort {
        value: raw.to_string(),
        source,
    })?;
    match u16::try_from(value) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(FactError::PortOutOfRange(value)),
    }
}
