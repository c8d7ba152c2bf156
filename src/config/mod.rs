use alloy::primitives::Address;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_PATH: &str = "betsync.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint - overridden by env RPC_URL
    #[serde(default)]
    pub rpc_url: String,
    /// Betting contract address - overridden by env CONTRACT_ADDRESS
    #[serde(default)]
    pub contract_address: String,
    /// First block to scan when no cursor has been persisted yet.
    /// Unset means "start at the current head".
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Largest block span requested in a single eth_getLogs call.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// Upper bound on a single RPC round-trip.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL - overridden by env DATABASE_URL
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Full snapshot reconciliation interval.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Event poll interval after a successful poll.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Event poll interval after a failed poll.
    #[serde(default = "default_poll_backoff")]
    pub poll_backoff_secs: u64,
    /// Resume polling from the persisted cursor instead of the chain head.
    #[serde(default = "default_true")]
    pub resume_from_cursor: bool,
    /// Upper bound on the chain reads of one reconciliation, which run
    /// while the snapshot write lock is held.
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address - overridden by env BIND_ADDR
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    /// Etherscan-compatible API base URL
    #[serde(default = "default_explorer_url")]
    pub url: String,
    /// API key - loaded from env EXPLORER_API_KEY
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_max_block_range() -> u64 {
    2_000
}
fn default_request_timeout() -> u64 {
    15
}
fn default_reconcile_timeout() -> u64 {
    45
}
fn default_database_url() -> String {
    "sqlite://betting.db".to_string()
}
fn default_max_connections() -> u32 {
    5
}
fn default_reconcile_interval() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    2
}
fn default_poll_backoff() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_bind() -> String {
    "0.0.0.0:5001".to_string()
}
fn default_explorer_url() -> String {
    "https://api-sepolia.etherscan.io/api".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            contract_address: String::new(),
            start_block: None,
            max_block_range: default_max_block_range(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            poll_interval_secs: default_poll_interval(),
            poll_backoff_secs: default_poll_backoff(),
            resume_from_cursor: true,
            reconcile_timeout_secs: default_reconcile_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            url: default_explorer_url(),
            api_key: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
    pub fn install(&self) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.level));

        if self.json {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Load a default config driven entirely by environment variables.
    pub fn from_env() -> Self {
        let mut config = Config {
            chain: ChainConfig::default(),
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            server: ServerConfig::default(),
            explorer: ExplorerConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env();
        config
    }

    /// `betsync.toml` when it exists in the working directory, env-only otherwise.
    pub fn discover() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::from_env())
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(address) = std::env::var("CONTRACT_ADDRESS") {
            self.chain.contract_address = address;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(bind) = std::env::var("BIND_ADDR") {
            self.server.bind = bind;
        }
        if let Ok(key) = std::env::var("EXPLORER_API_KEY") {
            self.explorer.api_key = key;
        }
    }

    /// Reject settings that would only fail later, once services are running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::Invalid(
                "chain.rpc_url is empty (set RPC_URL)".to_string(),
            ));
        }
        self.contract_address()?;
        if self.chain.max_block_range == 0 {
            return Err(ConfigError::Invalid(
                "chain.max_block_range must be at least 1".to_string(),
            ));
        }
        if self.chain.request_timeout_secs == 0 || self.sync.reconcile_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "chain.request_timeout_secs and sync.reconcile_timeout_secs must be at least 1"
                    .to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The parsed contract address.
    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        Address::from_str(self.chain.contract_address.trim()).map_err(|e| {
            ConfigError::Invalid(format!(
                "chain.contract_address {:?} is not an address: {e}",
                self.chain.contract_address
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chain]
            rpc_url = "http://localhost:8545"
            contract_address = "0xb5c4bea741cea63b2151d719b2cca12e80e6c7e8"

            [sync]
            poll_interval_secs = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.poll_interval_secs, 1);
        assert_eq!(config.sync.poll_backoff_secs, 5);
        assert_eq!(config.sync.reconcile_interval_secs, 60);
        assert!(config.sync.resume_from_cursor);
        assert_eq!(config.chain.max_block_range, 2_000);
        assert_eq!(config.chain.request_timeout_secs, 15);
        assert_eq!(config.sync.reconcile_timeout_secs, 45);
        assert_eq!(config.database.url, "sqlite://betting.db");
        assert_eq!(config.server.bind, "0.0.0.0:5001");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_contract_address() {
        let config: Config = toml::from_str(
            r#"
            [chain]
            rpc_url = "http://localhost:8545"
            contract_address = "not-an-address"
            "#,
        )
        .unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config: Config = toml::from_str(
            r#"
            [chain]
            rpc_url = "http://localhost:8545"
            contract_address = "0xb5c4bea741cea63b2151d719b2cca12e80e6c7e8"
            request_timeout_secs = 0
            "#,
        )
        .unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_missing_rpc_url() {
        let config: Config = toml::from_str("").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
