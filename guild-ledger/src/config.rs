//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest accepted cooldown window (one year)
pub const MAX_COOLDOWN_SECS: u64 = 365 * 24 * 60 * 60;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Batching configuration
    pub batching: BatchingConfig,

    /// Experience configuration
    pub experience: ExperienceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/guild-ledger"),
            service_name: "guild-ledger".to_string(),
            rocksdb: RocksDBConfig::default(),
            batching: BatchingConfig::default(),
            experience: ExperienceConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync the WAL before acknowledging a commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum batch size (entries)
    pub max_batch_size: usize,

    /// Batch timeout (milliseconds)
    pub batch_timeout_ms: u64,

    /// Enable group commit
    pub enabled: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            batch_timeout_ms: 5,
            enabled: true,
        }
    }
}

/// Experience configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceConfig {
    /// Minimum gap between accepted events per member (seconds)
    pub cooldown_secs: u64,

    /// Lower bound of experience granted per event (inclusive)
    pub min_xp_per_event: u64,

    /// Upper bound of experience granted per event (inclusive)
    pub max_xp_per_event: u64,
}

impl ExperienceConfig {
    /// Cooldown window as a duration
    pub fn cooldown(&self) -> crate::Result<chrono::Duration> {
        i64::try_from(self.cooldown_secs)
            .ok()
            .filter(|_| self.cooldown_secs <= MAX_COOLDOWN_SECS)
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                crate::Error::Config(format!(
                    "cooldown_secs ({}) exceeds {}",
                    self.cooldown_secs, MAX_COOLDOWN_SECS
                ))
            })
    }
}

impl Default for ExperienceConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            min_xp_per_event: 15,
            max_xp_per_event: 25,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("GUILD_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(secs) = std::env::var("GUILD_LEDGER_XP_COOLDOWN_SECS") {
            config.experience.cooldown_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid GUILD_LEDGER_XP_COOLDOWN_SECS: {}", e))
            })?;
        }

        if let Ok(sync) = std::env::var("GUILD_LEDGER_SYNC_WRITES") {
            config.rocksdb.sync_writes = sync.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid GUILD_LEDGER_SYNC_WRITES: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let xp = &self.experience;
        xp.cooldown()?;
        if xp.min_xp_per_event == 0 {
            return Err(crate::Error::Config(
                "min_xp_per_event must be at least 1".to_string(),
            ));
        }
        if xp.min_xp_per_event > xp.max_xp_per_event {
            return Err(crate::Error::Config(format!(
                "min_xp_per_event ({}) exceeds max_xp_per_event ({})",
                xp.min_xp_per_event, xp.max_xp_per_event
            )));
        }
        if self.batching.enabled && self.batching.max_batch_size == 0 {
            return Err(crate::Error::Config(
                "max_batch_size must be positive when batching is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
