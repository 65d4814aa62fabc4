// 10.0 config.rs: engine settings. log level, final settlement rounding, event batching.
// 10.1 loaded from json by the node, swapped at runtime through engine::LiveConfig.

use serde::{Deserialize, Serialize};

use crate::types::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }

    // per-transfer detail is only logged at debug and below
    pub fn is_verbose(&self) -> bool {
        *self <= LogLevel::Debug
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub level: LogLevel,
    // Largest settlement residual final settlement may sweep instead of halting
    pub final_settlement_factor: Amount,
    // Upper bound on events handed to the sink in one publish_batch call
    pub max_event_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            final_settlement_factor: Amount::new(1),
            max_event_batch: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse { reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_event_batch == 0 {
            return Err(ConfigError::InvalidBatch {
                reason: "Event batch size must be at least 1".to_string(),
            });
        }

        if self.final_settlement_factor.is_zero() {
            return Err(ConfigError::InvalidSettlement {
                reason: "Final settlement factor must be positive".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config json: {reason}")]
    Parse { reason: String },

    #[error("Invalid event batching: {reason}")]
    InvalidBatch { reason: String },

    #[error("Invalid settlement params: {reason}")]
    InvalidSettlement { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.final_settlement_factor, Amount::new(1));
        assert_eq!(config.level, LogLevel::Info);
    }

    #[test]
    fn test_invalid_batch() {
        let config = EngineConfig {
            max_event_batch: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBatch { .. })));
    }

    #[test]
    fn test_invalid_factor() {
        let config = EngineConfig {
            final_settlement_factor: Amount::zero(),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSettlement { .. })));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"level":"debug"}"#).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.max_event_batch, 1_000);
        assert!(config.level.is_verbose());
        assert!(!LogLevel::Warn.is_verbose());
    }

    #[test]
    fn test_bad_json_rejected() {
        assert!(matches!(EngineConfig::from_json("{"), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            EngineConfig::from_json(r#"{"level":"loud"}"#),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"max_event_batch":0}"#),
            Err(ConfigError::InvalidBatch { .. })
        ));
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig {
            level: LogLevel::Warn,
            final_settlement_factor: Amount::new(5),
            max_event_batch: 64,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
