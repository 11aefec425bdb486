use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use axum::http::HeaderName;
use thiserror::Error;

/// How a Modern POST without a session header is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModernSessionPolicy {
    /// Every header-less POST is a handshake and mints a session.
    #[default]
    Auto,
    /// Only a header-less POST carrying `initialize` mints a session.
    Strict,
    /// Header-less POSTs are one-shot calls with no session at all.
    Stateless,
}

impl FromStr for ModernSessionPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "strict" => Ok(Self::Strict),
            "stateless" => Ok(Self::Stateless),
            _ => Err(ConfigError::InvalidSessionPolicy),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub default_credential: Option<String>,
    pub credential_header: HeaderName,
    pub session_idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub keep_alive_interval: Duration,
    pub channel_capacity: usize,
    pub modern_sessions: ModernSessionPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_CREDENTIAL_HEADER must be a valid HTTP header name")]
    InvalidCredentialHeader,
    #[error("{0} must be a positive integer")]
    InvalidNumber(&'static str),
    #[error("MCP_MODERN_SESSIONS must be one of auto, strict, stateless")]
    InvalidSessionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            bind_port: 8080,
            default_credential: None,
            credential_header: HeaderName::from_static("x-api-key"),
            session_idle_timeout: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(15),
            channel_capacity: 64,
            modern_sessions: ModernSessionPolicy::Auto,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let seconds = |key: &'static str, fallback: Duration| -> Result<Duration, ConfigError> {
            read(key)
                .map(|value| match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                    _ => Err(ConfigError::InvalidNumber(key)),
                })
                .transpose()
                .map(|value| value.unwrap_or(fallback))
        };
        let defaults = Self::default();

        let bind_addr = read("BIND_ADDR").unwrap_or(defaults.bind_addr);
        let bind_port = read("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(defaults.bind_port);
        let credential_header = read("MCP_CREDENTIAL_HEADER")
            .map(|value| {
                HeaderName::from_bytes(value.to_ascii_lowercase().as_bytes())
                    .map_err(|_| ConfigError::InvalidCredentialHeader)
            })
            .transpose()?
            .unwrap_or(defaults.credential_header);
        let channel_capacity = read("MCP_SSE_CHANNEL_CAPACITY")
            .map(|value| match value.parse::<usize>() {
                Ok(capacity) if capacity > 0 => Ok(capacity),
                _ => Err(ConfigError::InvalidNumber("MCP_SSE_CHANNEL_CAPACITY")),
            })
            .transpose()?
            .unwrap_or(defaults.channel_capacity);
        let modern_sessions = read("MCP_MODERN_SESSIONS")
            .map(|value| value.parse::<ModernSessionPolicy>())
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            bind_addr,
            bind_port,
            default_credential: read("MCP_DEFAULT_CREDENTIAL"),
            credential_header,
            session_idle_timeout: seconds("MCP_SESSION_IDLE_SECS", defaults.session_idle_timeout)?,
            sweep_interval: seconds("MCP_SESSION_SWEEP_SECS", defaults.sweep_interval)?,
            keep_alive_interval: seconds("MCP_SSE_KEEPALIVE_SECS", defaults.keep_alive_interval)?,
            channel_capacity,
            modern_sessions,
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
