use std::{env, fmt, net::SocketAddr, str::FromStr};

use thiserror::Error;

pub const DEFAULT_BIND_PORT: u16 = 8000;
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Which transport adapter carries requests to the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// `POST /rpc` over HTTP.
    #[default]
    Http,
    /// Async TCP, one newline or EOF terminated exchange per connection.
    Tcp,
    /// Blocking TCP, thread per connection, length-header framing.
    Blocking,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "tcp" => Ok(Self::Tcp),
            "blocking" => Ok(Self::Blocking),
            _ => Err(ConfigError::InvalidTransport),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
            Self::Blocking => "blocking",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub bind_addr: String,
    pub bind_port: u16,
    pub max_request_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RPC_TRANSPORT must be one of: http, tcp, blocking")]
    InvalidTransport,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("RPC_MAX_REQUEST_BYTES must be a positive integer")]
    InvalidMaxRequestBytes,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            bind_addr: "127.0.0.1".to_string(),
            bind_port: DEFAULT_BIND_PORT,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let transport = lookup("RPC_TRANSPORT")
            .map(|value| value.parse::<TransportKind>())
            .transpose()?
            .unwrap_or(defaults.transport);
        let bind_addr = lookup("BIND_ADDR").unwrap_or(defaults.bind_addr);
        let bind_port = lookup("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(defaults.bind_port);
        let max_request_bytes = lookup("RPC_MAX_REQUEST_BYTES")
            .map(|value| {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|limit| *limit > 0)
                    .ok_or(ConfigError::InvalidMaxRequestBytes)
            })
            .transpose()?
            .unwrap_or(defaults.max_request_bytes);

        let config = Self {
            transport,
            bind_addr,
            bind_port,
            max_request_bytes,
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
