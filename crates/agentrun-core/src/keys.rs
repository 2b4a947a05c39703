//! Storage keys and pub/sub channel names.
//!
//! Every process that observes or controls a run derives names from these
//! functions, so the formats are part of the wire contract:
//!
//! | Name | Format |
//! |------|--------|
//! | liveness marker | `active_run:{instance}:{run}` |
//! | response log | `agent_run:{run}:responses` |
//! | change notifications | `agent_run:{run}:new_response` |
//! | instance control | `agent_run:{run}:control:{instance}` |
//! | run control | `agent_run:{run}:control` |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{InstanceId, RunId};

/// Prefix shared by every liveness marker key.
pub const ACTIVE_RUN_PREFIX: &str = "active_run";

/// Payload published on the change-notification channel.
pub const NEW_RESPONSE_PING: &str = "new";

/// A pub/sub channel name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Wrap a raw channel name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Liveness marker key for `run` on `instance`.
pub fn active_run_key(instance: &InstanceId, run: &RunId) -> String {
    format!("{ACTIVE_RUN_PREFIX}:{instance}:{run}")
}

/// Scan prefix matching every marker owned by `instance`.
pub fn active_run_prefix(instance: &InstanceId) -> String {
    format!("{ACTIVE_RUN_PREFIX}:{instance}:")
}

/// Split a marker key back into its instance and run ids.
///
/// Returns `None` for keys that do not follow the marker format.
pub fn parse_active_run_key(key: &str) -> Option<(InstanceId, RunId)> {
    let rest = key.strip_prefix(ACTIVE_RUN_PREFIX)?.strip_prefix(':')?;
    let (instance, run) = rest.split_once(':')?;
    if instance.is_empty() || run.is_empty() || run.contains(':') {
        return None;
    }
    Some((InstanceId::from(instance), RunId::from(run)))
}

/// Response log key for `run`.
pub fn responses_key(run: &RunId) -> String {
    format!("agent_run:{run}:responses")
}

/// Change-notification channel for `run`.
pub fn new_response_channel(run: &RunId) -> ChannelName {
    ChannelName(format!("agent_run:{run}:new_response"))
}

/// Control channel addressed to the copy of `run` on `instance`.
pub fn instance_control_channel(run: &RunId, instance: &InstanceId) -> ChannelName {
    ChannelName(format!("agent_run:{run}:control:{instance}"))
}

/// Control channel addressed to `run` regardless of instance.
pub fn run_control_channel(run: &RunId) -> ChannelName {
    ChannelName(format!("agent_run:{run}:control"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
