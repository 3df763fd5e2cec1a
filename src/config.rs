//! Server configuration module
//! Handles configuration parameters for the chat relay server

use crate::constants::{DEFAULT_HOST, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT};
use crate::error::{RedchatError, Result};
use std::env;

/// Which broker backs room fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerKind {
    /// In-process bus, only fans out within this server
    Memory,
    /// Redis pub/sub, shared by every server pointing at the same instance
    Redis { url: String },
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub broker: BrokerKind,
    /// Largest inbound text frame accepted from a client, in bytes
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Create a test configuration backed by the memory broker
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            broker: BrokerKind::Memory,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("REDCHAT_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match lookup("REDCHAT_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                RedchatError::ConfigError(format!("REDCHAT_PORT '{}' is not a valid port: {}", raw, e))
            })?,
            None => DEFAULT_PORT,
        };

        let max_message_size = match lookup("REDCHAT_MAX_MESSAGE_SIZE") {
            Some(raw) => raw.parse::<usize>().ok().filter(|size| *size > 0).ok_or_else(|| {
                RedchatError::ConfigError(format!(
                    "REDCHAT_MAX_MESSAGE_SIZE '{}' must be a positive number of bytes",
                    raw
                ))
            })?,
            None => DEFAULT_MAX_MESSAGE_SIZE,
        };

        let redis_url = lookup("REDIS_URL").filter(|url| !url.trim().is_empty());

        let broker = match lookup("REDCHAT_BROKER").map(|b| b.to_lowercase()) {
            Some(kind) if kind == "memory" => BrokerKind::Memory,
            Some(kind) if kind == "redis" => match redis_url {
                Some(url) => BrokerKind::Redis { url },
                None => {
                    return Err(RedchatError::ConfigError(
                        "REDCHAT_BROKER=redis requires REDIS_URL to be set".to_string(),
                    ))
                }
            },
            Some(other) => {
                return Err(RedchatError::ConfigError(format!(
                    "Unknown REDCHAT_BROKER '{}', expected 'memory' or 'redis'",
                    other
                )))
            }
            None => match redis_url {
                Some(url) => BrokerKind::Redis { url },
                None => BrokerKind::Memory,
            },
        };

        Ok(Self {
            host,
            port,
            broker,
            max_message_size,
        })
    }
}
