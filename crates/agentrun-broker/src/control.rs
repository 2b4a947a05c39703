//! Control channel contract.
//!
//! Control signals are ephemeral: only current subscribers see them. Payloads
//! are wire tokens (`STOP`, `END_STREAM`, `ERROR`) decoded into
//! [`ControlSignal`] on receipt; unknown tokens are logged and skipped.

use std::time::Duration;

use agentrun_core::{ChannelName, ControlSignal};
use async_trait::async_trait;
use tracing::warn;

use crate::errors::Result;
use crate::pubsub::BrokerMessage;

/// A decoded control signal and the channel it arrived on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlMessage {
    /// Channel the signal was published on.
    pub channel: ChannelName,
    /// Decoded signal.
    pub signal: ControlSignal,
}

impl ControlMessage {
    /// Decode a raw broker message, skipping unknown tokens.
    pub fn decode(message: BrokerMessage) -> Option<Self> {
        match message.payload.parse::<ControlSignal>() {
            Ok(signal) => Some(Self {
                channel: message.channel,
                signal,
            }),
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "ignoring unknown control payload");
                None
            }
        }
    }
}

/// A live subscription to one or more control channels.
///
/// Dropping the subscription unsubscribes.
#[async_trait]
pub trait ControlSubscription: Send {
    /// Wait up to `timeout` for the next decodable signal.
    ///
    /// `Ok(None)` means the wait timed out. [`BrokerError::Closed`] means the
    /// subscription will never deliver again.
    ///
    /// [`BrokerError::Closed`]: crate::BrokerError::Closed
    async fn next_message(&mut self, timeout: Duration) -> Result<Option<ControlMessage>>;

    /// Stop receiving. Further polls return [`BrokerError::Closed`].
    ///
    /// [`BrokerError::Closed`]: crate::BrokerError::Closed
    async fn unsubscribe(&mut self) -> Result<()>;
}

/// Publish/subscribe transport for control signals.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Subscribe to every channel in `channels`.
    async fn subscribe(&self, channels: &[ChannelName]) -> Result<Box<dyn ControlSubscription>>;

    /// Publish `signal` on `channel`. Returns the number of receivers.
    async fn publish(&self, channel: &ChannelName, signal: ControlSignal) -> Result<usize>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
