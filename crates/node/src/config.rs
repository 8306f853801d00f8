//! Node configuration surface.
//!
//! Parsed once at startup into an immutable struct; components receive the
//! sections they need by value. Mutation after startup only happens through
//! [`NodeConfig::mock`] in tests.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Mainnet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub network: Network,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeederConfig {
    pub addresses: Vec<String>,
    /// Fixed seeder list, honored on testnet only.
    pub fixed: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub port: u16,
    pub seeder: SeederConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 7100,
            seeder: SeederConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: String,
    pub dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "memory".into(),
            dir: ".chain".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Hashmap,
    Syncpool,
    Memcached,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub max_size_mb: u32,
    pub pool_type: PoolType,
    pub prealloc_txs: u32,
    /// 0 disables mempool inventory responses.
    pub max_inv_items: u32,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 100,
            pool_type: PoolType::Hashmap,
            prealloc_txs: 100,
            max_inv_items: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub accumulator_workers: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            accumulator_workers: 4,
        }
    }
}

/// The full recognized option surface.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    pub mempool: MempoolConfig,
    pub consensus: sba_consensus::Config,
    pub performance: PerformanceConfig,
}

impl NodeConfig {
    /// The consensus section with performance overrides applied.
    pub fn effective_consensus(&self) -> sba_consensus::Config {
        let mut config = self.consensus.clone();
        config.accumulator_workers = self.performance.accumulator_workers;
        config
    }

    /// A configuration for tests.
    pub fn mock() -> Self {
        Self {
            consensus: sba_consensus::Config::mock(),
            ..Self::default()
        }
    }
}
