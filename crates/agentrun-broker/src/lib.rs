//! # agentrun-broker
//!
//! Contracts for the shared services a run coordinator talks to, and an
//! in-process implementation of all of them.
//!
//! - [`LivenessRegistry`]: expiring `active_run:{instance}:{run}` markers
//! - [`ResponseLog`]: per-run append-only event log with change pings
//! - [`ControlChannel`]: ephemeral pub/sub carrying [`ControlSignal`]s
//! - [`MemoryBroker`]: all three over one shared in-process state
//!
//! [`ControlSignal`]: agentrun_core::ControlSignal

#![deny(unsafe_code)]

pub mod control;
pub mod errors;
pub mod liveness;
pub mod memory;
pub mod pubsub;
pub mod response_log;

pub use control::{ControlChannel, ControlMessage, ControlSubscription};
pub use errors::{BrokerError, Result};
pub use liveness::{LivenessRegistry, MarkerHandle};
pub use memory::{BrokerStats, MemoryBroker};
pub use pubsub::BrokerMessage;
pub use response_log::{ChangeFeed, ResponseLog};
