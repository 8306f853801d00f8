//! The SBA consensus pipeline: score generation and selection, two-step
//! binary reduction and the agreement stage that certifies a block hash.
//!
//! Components never call each other directly. They exchange events over the
//! bus and the narrow [`Signer`] capability, and the [`Coordinator`] owns the
//! authoritative `(round, step)` pair that classifies every incoming event.

mod accumulator;
mod agreement;
mod committee;
mod config;
mod coordinator;
mod generation;
mod reduction;
mod selection;
mod state;
mod timer;

pub mod testing;

pub use accumulator::{Accumulator, Handler};
pub use agreement::{Agreement, AgreementHandler};
pub use committee::CommitteeSet;
pub use config::Config;
pub use coordinator::{classify, Coordinator, CoordinatorMsg, Signer, Status};
pub use generation::{derive_seed, BlockGenerator, HashProver, ScoreProver};
pub use reduction::{Reducer, ReductionHandler};
pub use selection::Selector;
pub use state::RoundState;
pub use timer::StepTimer;

use sba_wire::WireError;

/// Errors surfaced on the synchronous paths of the consensus components.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("invalid vote signature")]
    InvalidSignature,

    #[error("invalid aggregated signature for step {step}")]
    InvalidAggregate { step: u8 },

    #[error("sender is not a committee member")]
    NotCommitteeMember,

    #[error("aggregated votes below quorum: {got} < {quorum}")]
    BelowQuorum { got: usize, quorum: usize },

    #[error("invalid score proof")]
    InvalidScoreProof,

    #[error("score references the wrong previous block")]
    WrongPrevHash,

    #[error("component already stopped")]
    Stopped,

    #[error(transparent)]
    Wire(#[from] WireError),
}
