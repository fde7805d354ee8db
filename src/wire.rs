//! JSON datagram encoding shared by the simulated clients and the mock responder.

use std::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::identity::ClientIdentity;

/// Command asking the server for a fresh address.
pub const REQUEST_IP: &str = "REQUEST_IP";
/// Command extending an existing lease. Part of the protocol, never sent by the simulator.
pub const UPDATE_LEASE: &str = "UPDATE_LEASE";

pub const ASSIGNED_IP: &str = "ASSIGNED_IP";
pub const NO_IP_ASSIGNED: &str = "NO_IP_ASSIGNED";
pub const LEASE_UPDATED: &str = "LEASE_UPDATED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub command: CompactString,
    pub mac_address: ClientIdentity,
}

impl LeaseRequest {
    pub fn new(command: impl Into<CompactString>, mac_address: ClientIdentity) -> Self {
        Self {
            command: command.into(),
            mac_address,
        }
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Reply to a [`LeaseRequest`]. Every field is optional on the wire; a missing
/// status is classified later rather than rejected here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeaseResponse {
    #[serde(default)]
    pub status: Option<LeaseStatus>,
    #[serde(default)]
    pub assigned_ip: Option<CompactString>,
    #[serde(default)]
    pub lease_time: Option<LeaseTime>,
    // servers explain refusals here
    #[serde(default)]
    pub message: Option<String>,
}

impl LeaseResponse {
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaseStatus {
    Assigned,
    NotAssigned,
    LeaseUpdated,
    /// Anything else the server sent, kept verbatim for logging
    Unknown(Value),
}

impl LeaseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LeaseStatus::Assigned => ASSIGNED_IP,
            LeaseStatus::NotAssigned => NO_IP_ASSIGNED,
            LeaseStatus::LeaseUpdated => LEASE_UPDATED,
            LeaseStatus::Unknown(Value::String(s)) => s.as_str(),
            LeaseStatus::Unknown(_) => "<non-string status>",
        }
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseStatus::Unknown(v) if !v.is_string() => write!(f, "{v}"),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for LeaseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value.as_str() {
            Some(ASSIGNED_IP) => LeaseStatus::Assigned,
            Some(NO_IP_ASSIGNED) => LeaseStatus::NotAssigned,
            Some(LEASE_UPDATED) => LeaseStatus::LeaseUpdated,
            _ => LeaseStatus::Unknown(value),
        })
    }
}

/// Lease duration as servers actually send it: a JSON integer, a float, or a
/// number inside a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LeaseTime {
    Whole(i64),
    Fractional(f64),
    Text(CompactString),
}

impl LeaseTime {
    /// Coerce to whole seconds. Fractions truncate toward zero; negative or
    /// non-numeric values yield `None`.
    pub fn seconds(&self) -> Option<u64> {
        match self {
            LeaseTime::Whole(n) => u64::try_from(*n).ok(),
            LeaseTime::Fractional(f) => {
                let t = f.trunc();
                (t.is_finite() && t >= 0.0 && t <= u64::MAX as f64).then_some(t as u64)
            }
            LeaseTime::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for LeaseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseTime::Whole(n) => write!(f, "{n}"),
            LeaseTime::Fractional(x) => write!(f, "{x}"),
            LeaseTime::Text(s) => write!(f, "{s:?}"),
        }
    }
}
