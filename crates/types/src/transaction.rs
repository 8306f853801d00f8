//! Transactions, reduced to the surface consensus membership needs.
//!
//! `Stake` adds a provisioner and `Bid` adds a blind-bid entry, both effective
//! for `[start_height, start_height + lock_time)`. Everything else about the
//! transaction model (inputs, range proofs, fees) lives outside the core.

use crate::{BlsPublicKey, EdPublicKey, Hash};

/// A Pedersen commitment to an output amount. For membership accounting the
/// committed amount is read from the low 64 bits, big-endian.
pub type Commitment = [u8; 32];

/// Fields shared by plain transfer transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardFields {
    pub outputs: Vec<Commitment>,
}

/// A stake transaction locking funds to become a provisioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeFields {
    pub pk_bls: BlsPublicKey,
    pub pk_ed: EdPublicKey,
    pub lock_time: u64,
    pub outputs: Vec<Commitment>,
}

/// A bid transaction entering the blind-bid lottery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidFields {
    /// The bidder's secret commitment `m`.
    pub m: [u8; 32],
    pub lock_time: u64,
    pub outputs: Vec<Commitment>,
}

/// The transaction kinds the consensus core distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Standard(StandardFields),
    Stake(StakeFields),
    Bid(BidFields),
}

impl Transaction {
    /// One-byte kind tag, also used on the wire.
    pub fn kind(&self) -> u8 {
        match self {
            Transaction::Standard(_) => 0,
            Transaction::Stake(_) => 1,
            Transaction::Bid(_) => 2,
        }
    }

    /// Sum of the committed output amounts (low 64 bits, big-endian).
    pub fn total_output_amount(&self) -> u64 {
        self.outputs()
            .iter()
            .map(|c| u64::from_be_bytes(c[24..32].try_into().unwrap()))
            .fold(0u64, u64::wrapping_add)
    }

    pub fn outputs(&self) -> &[Commitment] {
        match self {
            Transaction::Standard(tx) => &tx.outputs,
            Transaction::Stake(tx) => &tx.outputs,
            Transaction::Bid(tx) => &tx.outputs,
        }
    }

    /// Canonical transaction hash (merkle leaf).
    pub fn hash(&self) -> Hash {
        let mut bytes = vec![self.kind()];
        match self {
            Transaction::Standard(_) => {}
            Transaction::Stake(tx) => {
                bytes.extend_from_slice(tx.pk_bls.as_bytes());
                bytes.extend_from_slice(tx.pk_ed.as_bytes());
                bytes.extend_from_slice(&tx.lock_time.to_le_bytes());
            }
            Transaction::Bid(tx) => {
                bytes.extend_from_slice(&tx.m);
                bytes.extend_from_slice(&tx.lock_time.to_le_bytes());
            }
        }
        for output in self.outputs() {
            bytes.extend_from_slice(output);
        }
        Hash::from_bytes(&bytes)
    }
}

/// Build a commitment to a plain amount (tests and block generation).
pub fn commit_amount(amount: u64) -> Commitment {
    let mut c = [0u8; 32];
    c[24..32].copy_from_slice(&amount.to_be_bytes());
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_amounts_sum() {
        let tx = Transaction::Standard(StandardFields {
            outputs: vec![commit_amount(100), commit_amount(250)],
        });
        assert_eq!(tx.total_output_amount(), 350);
    }

    #[test]
    fn hash_distinguishes_kinds() {
        let stake = Transaction::Stake(StakeFields {
            pk_bls: BlsPublicKey([1u8; 48]),
            pk_ed: EdPublicKey([2u8; 32]),
            lock_time: 10,
            outputs: vec![commit_amount(1)],
        });
        let bid = Transaction::Bid(BidFields {
            m: [3u8; 32],
            lock_time: 10,
            outputs: vec![commit_amount(1)],
        });
        assert_ne!(stake.hash(), bid.hash());
    }

    #[test]
    fn hash_commits_to_lock_time() {
        let mk = |lock_time| {
            Transaction::Bid(BidFields {
                m: [3u8; 32],
                lock_time,
                outputs: vec![commit_amount(7)],
            })
        };
        assert_ne!(mk(10).hash(), mk(11).hash());
    }
}
