//! # agentrun-core
//!
//! Shared vocabulary for the agent run coordination crates:
//!
//! - **Branded IDs**: `RunId`, `InstanceId`, `ThreadId` newtypes
//! - **Statuses**: [`RunStatus`] with the terminal subset
//! - **Events**: [`RunEvent`], the records appended to a run's response log
//! - **Control signals**: [`ControlSignal`], decoded from wire tokens at the boundary
//! - **Keys**: storage key and channel naming shared by every process
//! - **Retry**: backoff math for the finalize step

#![deny(unsafe_code)]

pub mod control;
pub mod events;
pub mod ids;
pub mod keys;
pub mod retry;
pub mod status;

pub use control::{ControlSignal, UnknownSignal};
pub use events::RunEvent;
pub use ids::{InstanceId, RunId, ThreadId};
pub use keys::ChannelName;
pub use retry::RetryPolicy;
pub use status::{RunStatus, UnknownStatus};
