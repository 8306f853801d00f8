//! Node-side chain handling: block acceptance, candidate validation and the
//! chain database surface.

mod candidate;
mod chain;
mod config;
mod storage;

pub use candidate::{check_hash, check_root, pre_certificate_hash, validate, CandidateStore};
pub use chain::Chain;
pub use config::{
    DatabaseConfig, GeneralConfig, MempoolConfig, Network, NetworkConfig, NodeConfig,
    PerformanceConfig, PoolType, SeederConfig,
};
pub use storage::{ChainDb, DbTransaction, MemoryDb, StorageError};

use sba_wire::WireError;

/// Errors on the chain's synchronous paths.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("invalid block hash")]
    InvalidBlockHash,

    #[error("invalid merkle root hash")]
    InvalidMerkleRoot,

    #[error("block does not extend the current tip")]
    BadLinkage,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
