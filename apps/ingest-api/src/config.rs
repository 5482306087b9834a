//! Service configuration loaded from environment variables.
//!
//! Fail-fast: required variables must be present and valid or the process
//! exits with a clear error before any listener is bound.

use std::env;

use thiserror::Error;
use triage_events::{BrokerConfig, EventError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    Missing { var: String },

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error(transparent)]
    Broker(#[from] EventError),
}

/// Ingest API configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub broker: BrokerConfig,
}

impl Config {
    /// Load from environment variables.
    ///
    /// Required: `PORT`, plus the broker variables consumed by
    /// [`BrokerConfig::from_env`]. Optional: `HOST` (default "0.0.0.0"),
    /// `RUST_LOG` (default "info").
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_raw = env::var("PORT").map_err(|_| ConfigError::Missing {
            var: "PORT".to_string(),
        })?;
        let port: u16 = match port_raw.parse() {
            Ok(p) if p > 0 => p,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "PORT".to_string(),
                    reason: format!("must be a positive integer, got '{port_raw}'"),
                })
            }
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            broker: BrokerConfig::from_env()?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
