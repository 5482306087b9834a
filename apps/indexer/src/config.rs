//! Service configuration loaded from environment variables.

use std::env;

use thiserror::Error;
use triage_events::{BrokerConfig, EventError};

pub const DEFAULT_INDEX: &str = "patient-events";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    Missing { var: String },

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error(transparent)]
    Broker(#[from] EventError),
}

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub elasticsearch_url: String,
    pub elasticsearch_index: String,
    pub broker: BrokerConfig,
}

impl Config {
    /// Load from environment variables.
    ///
    /// Required: `PORT`, `ELASTICSEARCH_URL`, the broker variables consumed
    /// by [`BrokerConfig::from_env`], and `KAFKA_GROUP_ID` (the consumer
    /// role cannot run without a group). Optional: `HOST`, `RUST_LOG`,
    /// `ELASTICSEARCH_INDEX` (default "patient-events").
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

        let elasticsearch_url =
            env::var("ELASTICSEARCH_URL").map_err(|_| ConfigError::Missing {
                var: "ELASTICSEARCH_URL".to_string(),
            })?;

        let broker = BrokerConfig::from_env()?;
        if broker.group_id.is_none() {
            return Err(ConfigError::Missing {
                var: "KAFKA_GROUP_ID".to_string(),
            });
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            elasticsearch_url: elasticsearch_url.trim_end_matches('/').to_string(),
            elasticsearch_index: env::var("ELASTICSEARCH_INDEX")
                .unwrap_or_else(|_| DEFAULT_INDEX.to_string()),
            broker,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
