//! Core abstractions for the fleetwatch hub and agents.
//!
//! This crate provides the fundamental building blocks:
//! - Wire protocol envelopes and `ConnectionId`
//! - `CommandSink` - the outbound half of a session
//! - `ConnectionRegistry` - concurrent table of live sessions

pub mod protocol;
pub mod registry;
pub mod traits;

pub use protocol::{AgentEnvelope, ConnectionId, DIRECT_SOURCE, HubEnvelope, UuidResponse};
pub use registry::{BroadcastReport, ConnectionEntry, ConnectionRegistry};
pub use traits::{CommandSink, RegistryError, TransportError};
