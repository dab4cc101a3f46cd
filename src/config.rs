use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PEER_TIMEOUT_MS: u64 = 5000;

/// Errors that can occur while reading the node configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    Invalid { key: String, value: String },
}

/// Runtime configuration of a ledger node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Interface the HTTP server binds to
    pub host: String,

    pub port: u16,

    /// Directory of the sled database
    pub data_dir: PathBuf,

    /// Address other nodes use to reach this one; also the node's identity
    pub public_url: String,

    /// Number of mining threads
    pub mining_workers: usize,

    /// Timeout of every request to a peer
    pub peer_timeout: Duration,

    /// Peers to connect to at startup
    pub peers: Vec<String>,
}

impl NodeConfig {
    /// Reads the configuration from `LEDGER_*` environment variables
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LEDGER_HOST` | `127.0.0.1` |
    /// | `LEDGER_PORT` | `8080` |
    /// | `LEDGER_DATA_DIR` | `data/<port>` |
    /// | `LEDGER_PUBLIC_URL` | `http://<host>:<port>` |
    /// | `LEDGER_MINING_WORKERS` | available parallelism |
    /// | `LEDGER_PEER_TIMEOUT_MS` | `5000` |
    /// | `LEDGER_PEERS` | none (comma-separated URLs) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = value("LEDGER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(&value, "LEDGER_PORT", DEFAULT_PORT)?;

        let data_dir = value("LEDGER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data").join(port.to_string()));

        let public_url = value("LEDGER_PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{}:{}", host, port));

        let mining_workers = parse_or(&value, "LEDGER_MINING_WORKERS", default_workers())?;
        if mining_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "LEDGER_MINING_WORKERS".to_string(),
                value: "0".to_string(),
            });
        }

        let timeout_ms = parse_or(&value, "LEDGER_PEER_TIMEOUT_MS", DEFAULT_PEER_TIMEOUT_MS)?;

        let peers = value("LEDGER_PEERS")
            .map(|list| {
                list.split(',')
                    .map(|peer| peer.trim().trim_end_matches('/').to_string())
                    .filter(|peer| !peer.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(NodeConfig {
            host,
            port,
            data_dir,
            public_url,
            mining_workers,
            peer_timeout: Duration::from_millis(timeout_ms),
            peers,
        })
    }
}

fn parse_or<T, F>(value: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match value(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
