//! Raw pub/sub message shared by the change feed and control subscriptions.

use agentrun_core::ChannelName;

/// A payload received on a subscribed channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Channel the payload was published on.
    pub channel: ChannelName,
    /// Raw payload string.
    pub payload: String,
}

impl BrokerMessage {
    /// Build a message.
    pub fn new(channel: ChannelName, payload: impl Into<String>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}
