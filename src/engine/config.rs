//! Live engine configuration.

use crate::config::{ConfigError, EngineConfig, LogLevel};
use crate::types::Amount;
use parking_lot::Mutex;

/// Engine settings that can be swapped while the node runs.
///
/// Guarded by a mutex so a config watcher thread can push updates. Reads copy
/// the value out, so the lock is never held across a transfer.
#[derive(Debug, Default)]
pub struct LiveConfig {
    inner: Mutex<EngineConfig>,
}

impl LiveConfig {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(config),
        })
    }

    /// Replaces the whole config. invalid configs are rejected and the old one stays.
    pub fn reload(&self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.inner.lock() = config;
        Ok(())
    }

    pub fn snapshot(&self) -> EngineConfig {
        self.inner.lock().clone()
    }

    pub fn level(&self) -> LogLevel {
        self.inner.lock().level
    }

    pub fn final_settlement_factor(&self) -> Amount {
        self.inner.lock().final_settlement_factor
    }

    pub fn max_event_batch(&self) -> usize {
        self.inner.lock().max_event_batch
    }
}
