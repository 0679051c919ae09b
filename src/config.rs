use std::{env, net::SocketAddr, sync::OnceLock, time::Duration};

use regex::Regex;
use thiserror::Error;

use crate::session::InstanceId;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub instance_id: InstanceId,
    pub keepalive_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_INSTANCE_ID must match ^[A-Za-z0-9_-]{{1,64}}$")]
    InvalidInstanceId,
    #[error("MCP_KEEPALIVE_SECS must be between 1 and 300")]
    InvalidKeepalive,
}

fn instance_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid instance id pattern"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = non_empty(lookup("BIND_ADDR")).unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_empty(lookup("BIND_PORT"))
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let instance_id = match non_empty(lookup("MCP_INSTANCE_ID")) {
            Some(value) if instance_id_pattern().is_match(&value) => InstanceId::new(value),
            Some(_) => return Err(ConfigError::InvalidInstanceId),
            None => InstanceId::generate(),
        };

        let keepalive_secs = non_empty(lookup("MCP_KEEPALIVE_SECS"))
            .map(|value| value.parse::<u64>().map_err(|_| ConfigError::InvalidKeepalive))
            .transpose()?
            .unwrap_or(30);
        if !(1..=300).contains(&keepalive_secs) {
            return Err(ConfigError::InvalidKeepalive);
        }

        let config = Self {
            bind_addr,
            bind_port,
            instance_id,
            keepalive_interval: Duration::from_secs(keepalive_secs),
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
