//! Emitter configuration.
//!
//! Embedders usually load this as one section of a larger TOML file; every
//! field has a default so an empty table is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MadnhError;
use crate::priority::PRIORITY_DEFAULT;
use crate::Result;

/// Listener limit value that disables the limit check.
pub const UNLIMITED_LISTENERS: i64 = -1;

fn default_priority() -> i32 {
    PRIORITY_DEFAULT
}

fn default_listener_limit() -> i64 {
    10
}

fn default_async_delay_ms() -> u64 {
    1
}

/// Settings shared by every emitter built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Priority given to listeners registered without one
    #[serde(default = "default_priority")]
    pub default_priority: i32,
    /// Listener count per event above which a warning is logged (-1 disables)
    #[serde(default = "default_listener_limit")]
    pub listener_limit: i64,
    /// Delay applied to async listeners and async follower notices
    #[serde(default = "default_async_delay_ms")]
    pub async_delay_ms: u64,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            default_priority: default_priority(),
            listener_limit: default_listener_limit(),
            async_delay_ms: default_async_delay_ms(),
        }
    }
}

impl EmitterConfig {
    #[inline]
    pub fn async_delay(&self) -> Duration {
        Duration::from_millis(self.async_delay_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// [`MadnhError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.listener_limit < UNLIMITED_LISTENERS {
            return Err(MadnhError::InvalidConfig(format!(
                "listener_limit must be {} or greater, got {}",
                UNLIMITED_LISTENERS, self.listener_limit
            )));
        }
        Ok(())
    }
}
