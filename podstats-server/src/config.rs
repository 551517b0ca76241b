// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use podstats_query::HourlyOptions;
use podstats_storage::PartitionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Podstats Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PodstatsConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for partition journals
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Keep a durable journal per partition (otherwise memory only)
    #[serde(default = "default_journal")]
    pub journal: bool,

    /// fsync every journal append
    #[serde(default)]
    pub sync: bool,

    /// Root directory of the filesystem blob store
    #[serde(default = "default_stats_dir")]
    pub stats_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Capacity of the redirect logger's pending batch
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,

    /// Edge location used when an event carries none
    #[serde(default = "default_edge_colo")]
    pub edge_colo: String,

    /// Store location written on every appended record
    #[serde(default)]
    pub do_colo: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    #[serde(default = "default_query_size")]
    pub query_size: usize,

    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HashingConfig {
    /// Hex secret (32 bytes) used to hash client IP addresses
    pub ip_hash_key: Option<String>,
}

// Default values
fn default_data_dir() -> PathBuf {
    PathBuf::from("./podstats-data")
}

fn default_journal() -> bool {
    true
}

fn default_stats_dir() -> PathBuf {
    PathBuf::from("./podstats-stats")
}

fn default_pending_capacity() -> usize {
    1000
}

fn default_edge_colo() -> String {
    "XXX".to_string()
}

fn default_max_queries() -> usize {
    HourlyOptions::default().max_queries
}

fn default_query_size() -> usize {
    HourlyOptions::default().query_size
}

fn default_max_hits() -> usize {
    HourlyOptions::default().max_hits
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            journal: default_journal(),
            sync: false,
            stats_dir: default_stats_dir(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pending_capacity: default_pending_capacity(),
            edge_colo: default_edge_colo(),
            do_colo: String::new(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            query_size: default_query_size(),
            max_hits: default_max_hits(),
        }
    }
}

impl PodstatsConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - PODSTATS_DATA_DIR: Journal directory (default: ./podstats-data)
    /// - PODSTATS_STATS_DIR: Blob store directory (default: ./podstats-stats)
    /// - PODSTATS_IP_HASH_KEY: Hex secret for hashing client IPs
    /// - PODSTATS_PENDING_CAPACITY: Redirect logger pending batch size (default: 1000)
    pub fn from_env() -> Self {
        Self::merge_with_env(Self::default())
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };
        Ok(Self::merge_with_env(config))
    }

    /// Override with environment variables that are explicitly set
    fn merge_with_env(mut config: Self) -> Self {
        if let Ok(data_dir) = std::env::var("PODSTATS_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(stats_dir) = std::env::var("PODSTATS_STATS_DIR") {
            config.storage.stats_dir = PathBuf::from(stats_dir);
        }
        if let Ok(key) = std::env::var("PODSTATS_IP_HASH_KEY") {
            config.hashing.ip_hash_key = Some(key);
        }
        if let Ok(capacity) = std::env::var("PODSTATS_PENDING_CAPACITY") {
            if let Ok(val) = capacity.parse() {
                config.ingest.pending_capacity = val;
            }
        }
        config
    }

    /// Decoded IP hashing secret; all zeros when unset.
    pub fn ip_hash_key(&self) -> Result<[u8; 32]> {
        let Some(encoded) = &self.hashing.ip_hash_key else {
            return Ok([0; 32]);
        };
        let bytes = hex::decode(encoded.trim())?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow::anyhow!("ip_hash_key must be 32 bytes, found {}", b.len()))
    }

    /// How partitions are opened.
    pub fn partition_config(&self) -> Result<PartitionConfig> {
        Ok(PartitionConfig {
            journal_dir: self.storage.journal.then(|| self.storage.data_dir.clone()),
            sync: self.storage.sync,
            ip_hash_key: self.ip_hash_key()?,
            do_colo: self.ingest.do_colo.clone(),
        })
    }

    pub fn hourly_options(&self) -> HourlyOptions {
        HourlyOptions {
            max_queries: self.aggregation.max_queries,
            query_size: self.aggregation.query_size,
            max_hits: self.aggregation.max_hits,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.ip_hash_key()?;
        if self.hashing.ip_hash_key.is_none() {
            tracing::warn!("No ip_hash_key configured, client IPs are hashed with an all-zero key");
        }

        if self.ingest.pending_capacity == 0 {
            anyhow::bail!("ingest.pending_capacity must be positive");
        }
        let AggregationConfig {
            max_queries,
            query_size,
            max_hits,
        } = self.aggregation;
        if max_queries == 0 || query_size == 0 || max_hits == 0 {
            anyhow::bail!("aggregation limits must be positive");
        }

        // Validate directories are writable
        if self.storage.journal && !self.storage.data_dir.exists() {
            std::fs::create_dir_all(&self.storage.data_dir)?;
        }
        if !self.storage.stats_dir.exists() {
            std::fs::create_dir_all(&self.storage.stats_dir)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PodstatsConfig::default();
        assert_eq!(config.ingest.pending_capacity, 1000);
        assert_eq!(config.aggregation.query_size, 1000);
        assert!(config.storage.journal);
        assert_eq!(config.ip_hash_key().unwrap(), [0; 32]);
    }

    #[test]
    fn test_partial_toml() {
        let config: PodstatsConfig = toml::from_str(
            r#"
            [storage]
            data_dir = "/var/lib/podstats"
            journal = false

            [aggregation]
            max_hits = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/podstats"));
        assert_eq!(config.storage.stats_dir, PathBuf::from("./podstats-stats"));
        assert_eq!(config.hourly_options().max_hits, 500);
        assert_eq!(config.hourly_options().max_queries, 100);
        assert!(config.partition_config().unwrap().journal_dir.is_none());
    }

    #[test]
    fn test_ip_hash_key() {
        let mut config = PodstatsConfig::default();
        config.hashing.ip_hash_key = Some("ab".repeat(32));
        assert_eq!(config.ip_hash_key().unwrap(), [0xab; 32]);

        config.hashing.ip_hash_key = Some("abcd".to_string());
        assert!(config.ip_hash_key().is_err());
        config.hashing.ip_hash_key = Some("zz".repeat(32));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = PodstatsConfig::default();
        config.aggregation.query_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("PODSTATS_PENDING_CAPACITY", "7");
        std::env::set_var("PODSTATS_STATS_DIR", "/tmp/podstats-env-stats");

        let config = PodstatsConfig::from_env();
        assert_eq!(config.ingest.pending_capacity, 7);
        assert_eq!(config.storage.stats_dir, PathBuf::from("/tmp/podstats-env-stats"));

        std::env::remove_var("PODSTATS_PENDING_CAPACITY");
        std::env::remove_var("PODSTATS_STATS_DIR");
    }
}
