//! # agentrun-settings
//!
//! Layered configuration for agent run workers.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AgentRunSettings::default()`]
//! 2. **User file**: `~/.agentrun/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `AGENTRUN_*` overrides
//!
//! There is no process-wide instance. The binary loads settings once and
//! passes them to the components that need them.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    agentrun_home, apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings,
    load_settings_from_path, load_settings_with_env, settings_path,
};
pub use types::*;
