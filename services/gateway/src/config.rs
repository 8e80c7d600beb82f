//! Service configuration
//!
//! Layered: built-in defaults, then an optional `engine.toml` (path from
//! `ENGINE_CONFIG`), then `ENGINE__SECTION__KEY` environment variables.

use crate::coordinator::custody::CLOCK_SKEW_SECS;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use types::market::MarketConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub freeze: FreezeSettings,
    pub chain: ChainSettings,
    pub oracle: OracleSettings,
    pub settlement: SettlementSettings,
    pub markets: Vec<MarketConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Accept `POST /orders` without a freeze; for deployments without custody
    pub direct_orders_enabled: bool,
    /// Levels per side in `/orderbook`
    pub book_depth: usize,
    /// Broadcast buffer per WebSocket fan-out
    pub stream_buffer: usize,
    /// Trades kept per market for `/trades`
    pub trade_history: usize,
    pub expiry_sweep_ms: u64,
    /// Lock acquisition bound for the health probe
    pub health_probe_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Journal directory; persistence is off when unset
    pub journal_dir: Option<PathBuf>,
    pub max_file_size: u64,
    /// fsync after this many records; 1 syncs every record
    pub fsync_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreezeSettings {
    pub quote_ttl_secs: u64,
    /// Decimals of the collateral coin's base unit
    pub collateral_decimals: u32,
    pub collateral_coin_type: String,
    pub gas_limit: u64,
    pub gas_unit_price: u64,
    /// Ask the chain for the user's free collateral before quoting
    pub check_free_collateral: bool,
    pub sweep_interval_ms: u64,
    /// How long expired quotes and spent lock transactions are remembered
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub node_url: String,
    pub contract_address: String,
    /// Transaction relay that signs and submits settlement batches
    pub relay_url: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    /// Price feed base URL; reference prices come from last trades when unset
    pub url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSettings {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_fills: usize,
    pub band_bps: u32,
    pub validity_secs: u64,
    pub max_reference_age_secs: u64,
    pub submit_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub tick_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                direct_orders_enabled: false,
                book_depth: 50,
                stream_buffer: 4096,
                trade_history: 1000,
                expiry_sweep_ms: 1000,
                health_probe_ms: 250,
            },
            storage: StorageSettings {
                journal_dir: Some(PathBuf::from("data/journal")),
                max_file_size: 64 * 1024 * 1024,
                fsync_every: 1,
            },
            freeze: FreezeSettings {
                quote_ttl_secs: 30,
                collateral_decimals: 6,
                collateral_coin_type: "0x1::aptos_coin::AptosCoin".to_string(),
                gas_limit: 100_000,
                gas_unit_price: 100,
                check_free_collateral: false,
                sweep_interval_ms: 1000,
                retention_secs: 86_400,
            },
            chain: ChainSettings {
                node_url: "https://fullnode.testnet.aptoslabs.com/v1".to_string(),
                contract_address: "0x1".to_string(),
                relay_url: "http://127.0.0.1:8090/apply_batch".to_string(),
                request_timeout_ms: 10_000,
            },
            oracle: OracleSettings {
                url: None,
                timeout_ms: 2_000,
            },
            settlement: SettlementSettings {
                enabled: true,
                window_ms: 2_000,
                max_fills: 10,
                band_bps: 500,
                validity_secs: 60,
                max_reference_age_secs: 30,
                submit_timeout_secs: 30,
                max_attempts: 3,
                backoff_base_ms: 250,
                backoff_max_ms: 5_000,
                tick_ms: 500,
            },
            markets: MarketConfig::defaults(),
        }
    }
}

impl EngineSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ENGINE_CONFIG").unwrap_or_else(|_| "engine".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(Config::try_from(&EngineSettings::default())?)
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("ENGINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: EngineSettings = settings.try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.markets.is_empty() {
            return Err(ConfigError::Message("at least one market is required".to_string()));
        }
        for market in &self.markets {
            market.check().map_err(ConfigError::Message)?;
        }
        if self.freeze.quote_ttl_secs == 0 {
            return Err(ConfigError::Message("freeze.quote_ttl_secs must be positive".to_string()));
        }
        // A spent transaction may only be forgotten once custody would reject it as stale
        let min_retention = 2 * self.freeze.quote_ttl_secs + CLOCK_SKEW_SECS;
        if self.freeze.retention_secs < min_retention {
            return Err(ConfigError::Message(format!(
                "freeze.retention_secs must be at least {}",
                min_retention
            )));
        }
        if self.settlement.max_fills == 0 || self.settlement.max_attempts == 0 {
            return Err(ConfigError::Message(
                "settlement.max_fills and settlement.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn quote_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freeze.quote_ttl_secs as i64)
    }

    pub fn quote_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freeze.retention_secs as i64)
    }

    pub fn settlement_config(&self) -> settlement::SettlementConfig {
        let s = &self.settlement;
        settlement::SettlementConfig {
            policy: settlement::BatchPolicy {
                max_fills: s.max_fills,
                window: chrono::Duration::milliseconds(s.window_ms as i64),
                band_bps: s.band_bps,
                validity: chrono::Duration::seconds(s.validity_secs as i64),
                max_reference_age: chrono::Duration::seconds(s.max_reference_age_secs as i64),
            },
            tick: Duration::from_millis(s.tick_ms.max(1)),
            submit_timeout: Duration::from_secs(s.submit_timeout_secs),
            max_attempts: s.max_attempts,
            backoff_base: Duration::from_millis(s.backoff_base_ms),
            backoff_max: Duration::from_millis(s.backoff_max_ms),
        }
    }

    pub fn journal_config(&self) -> Option<persistence::JournalConfig> {
        let dir = self.storage.journal_dir.as_ref()?;
        let mut journal = persistence::JournalConfig::new(dir);
        journal.max_file_size = self.storage.max_file_size;
        journal.fsync_policy = if self.storage.fsync_every <= 1 {
            persistence::FsyncPolicy::EveryWrite
        } else {
            persistence::FsyncPolicy::EveryN(self.storage.fsync_every)
        };
        Some(journal)
    }
}
