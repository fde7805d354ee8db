//! Simulated clients for a JSON-over-UDP address leasing service.
//!
//! Each client draws a hardware address, asks the server for a lease with a
//! single datagram, waits a bounded time for one reply and, when granted,
//! holds the lease until its renewal point.

pub mod config;
pub mod identity;
pub mod logging;
pub mod orchestrator;
pub mod responder;
pub mod session;
pub mod wire;

pub use config::{Config, ConfigError, ResponderConfig};
pub use identity::ClientIdentity;
pub use orchestrator::{Orchestrator, SessionReport, Summary};
pub use responder::{Reply, Responder};
pub use session::{LeaseSession, ProtocolError, SessionError, SessionOutcome, SessionState};
pub use wire::{LeaseRequest, LeaseResponse, LeaseStatus, LeaseTime};
