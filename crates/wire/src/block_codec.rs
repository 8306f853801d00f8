//! Wire codec for blocks, certificates and transactions.

use crate::{
    marshal_step_votes, unmarshal_step_votes, write_256, write_i64, write_u64, write_u8,
    write_var_bytes, write_var_int, Reader, WireError,
};
use sba_types::{
    BidFields, Block, BlockHeader, BlsPublicKey, Certificate, Commitment, EdPublicKey, Hash, Seed,
    StakeFields, StandardFields, Transaction,
};

pub fn marshal_certificate(cert: &Certificate, w: &mut Vec<u8>) {
    marshal_step_votes(&cert.step_one_batch, w);
    marshal_step_votes(&cert.step_two_batch, w);
    write_256(w, cert.first_reduction_hash.as_bytes());
    write_256(w, cert.second_reduction_hash.as_bytes());
}

pub fn unmarshal_certificate(r: &mut Reader<'_>) -> Result<Certificate, WireError> {
    let step_one_batch = unmarshal_step_votes(r)?;
    let step_two_batch = unmarshal_step_votes(r)?;
    let first_reduction_hash = Hash::from(r.read_256()?);
    let second_reduction_hash = Hash::from(r.read_256()?);
    Ok(Certificate {
        step_one_batch,
        step_two_batch,
        first_reduction_hash,
        second_reduction_hash,
    })
}

pub fn marshal_header(header: &BlockHeader, w: &mut Vec<u8>) {
    write_u8(w, header.version);
    write_u64(w, header.height);
    write_i64(w, header.timestamp);
    write_256(w, header.prev_hash.as_bytes());
    write_var_bytes(w, header.seed.as_bytes());
    write_256(w, header.tx_root.as_bytes());
    write_256(w, header.hash.as_bytes());
    marshal_certificate(&header.certificate, w);
}

pub fn unmarshal_header(r: &mut Reader<'_>) -> Result<BlockHeader, WireError> {
    let version = r.read_u8()?;
    let height = r.read_u64()?;
    let timestamp = r.read_i64()?;
    let prev_hash = Hash::from(r.read_256()?);
    let seed = r.read_var_bytes()?;
    if seed.len() != Seed::BYTES {
        return Err(WireError::InvalidFieldLength {
            what: "seed",
            expected: Seed::BYTES,
            actual: seed.len(),
        });
    }
    let seed = Seed::from_slice(seed);
    let tx_root = Hash::from(r.read_256()?);
    let hash = Hash::from(r.read_256()?);
    let certificate = unmarshal_certificate(r)?;
    Ok(BlockHeader {
        version,
        height,
        timestamp,
        prev_hash,
        seed,
        tx_root,
        hash,
        certificate,
    })
}

fn marshal_outputs(outputs: &[Commitment], w: &mut Vec<u8>) {
    write_var_int(w, outputs.len() as u64);
    for output in outputs {
        write_256(w, output);
    }
}

fn unmarshal_outputs(r: &mut Reader<'_>) -> Result<Vec<Commitment>, WireError> {
    let count = r.read_var_int()?;
    if count > r.remaining() as u64 / 32 {
        return Err(WireError::LengthOverflow {
            declared: count,
            remaining: r.remaining(),
        });
    }
    let mut outputs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        outputs.push(r.read_256()?);
    }
    Ok(outputs)
}

pub fn marshal_transaction(tx: &Transaction, w: &mut Vec<u8>) {
    write_u8(w, tx.kind());
    match tx {
        Transaction::Standard(_) => {}
        Transaction::Stake(fields) => {
            write_var_bytes(w, fields.pk_bls.as_bytes());
            write_256(w, fields.pk_ed.as_bytes());
            write_u64(w, fields.lock_time);
        }
        Transaction::Bid(fields) => {
            write_256(w, &fields.m);
            write_u64(w, fields.lock_time);
        }
    }
    marshal_outputs(tx.outputs(), w);
}

pub fn unmarshal_transaction(r: &mut Reader<'_>) -> Result<Transaction, WireError> {
    let kind = r.read_u8()?;
    Ok(match kind {
        0 => Transaction::Standard(StandardFields {
            outputs: unmarshal_outputs(r)?,
        }),
        1 => {
            let pk_bls = r.read_var_bytes()?;
            if pk_bls.len() != BlsPublicKey::BYTES {
                return Err(WireError::InvalidFieldLength {
                    what: "BLS public key",
                    expected: BlsPublicKey::BYTES,
                    actual: pk_bls.len(),
                });
            }
            let pk_bls = BlsPublicKey::from_slice(pk_bls);
            let pk_ed = EdPublicKey(r.read_256()?);
            let lock_time = r.read_u64()?;
            Transaction::Stake(StakeFields {
                pk_bls,
                pk_ed,
                lock_time,
                outputs: unmarshal_outputs(r)?,
            })
        }
        2 => {
            let m = r.read_256()?;
            let lock_time = r.read_u64()?;
            Transaction::Bid(BidFields {
                m,
                lock_time,
                outputs: unmarshal_outputs(r)?,
            })
        }
        tag => {
            return Err(WireError::UnknownTag {
                what: "transaction",
                tag,
            })
        }
    })
}

/// Encode a full block.
pub fn marshal_block(block: &Block, w: &mut Vec<u8>) {
    marshal_header(&block.header, w);
    write_var_int(w, block.txs.len() as u64);
    for tx in &block.txs {
        marshal_transaction(tx, w);
    }
}

pub fn block_to_bytes(block: &Block) -> Vec<u8> {
    let mut buf = Vec::new();
    marshal_block(block, &mut buf);
    buf
}

/// Decode a full block, requiring the buffer to be fully consumed.
pub fn block_from_bytes(buf: &[u8]) -> Result<Block, WireError> {
    let mut r = Reader::new(buf);
    let block = unmarshal_block(&mut r)?;
    r.finish()?;
    Ok(block)
}

pub fn unmarshal_block(r: &mut Reader<'_>) -> Result<Block, WireError> {
    let header = unmarshal_header(r)?;
    let count = r.read_var_int()?;
    if count > r.remaining() as u64 {
        return Err(WireError::LengthOverflow {
            declared: count,
            remaining: r.remaining(),
        });
    }
    let mut txs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        txs.push(unmarshal_transaction(r)?);
    }
    Ok(Block { header, txs })
}

/// Inventory item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvKind {
    Block = 0,
    Tx = 1,
}

/// An inventory advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inv {
    pub items: Vec<(InvKind, Hash)>,
}

impl Inv {
    pub fn add(&mut self, kind: InvKind, hash: Hash) {
        self.items.push((kind, hash));
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.items.len() * 33);
        write_var_int(&mut buf, self.items.len() as u64);
        for (kind, hash) in &self.items {
            write_u8(&mut buf, *kind as u8);
            write_256(&mut buf, hash.as_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let count = r.read_var_int()?;
        if count > r.remaining() as u64 / 33 {
            return Err(WireError::LengthOverflow {
                declared: count,
                remaining: r.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = match r.read_u8()? {
                0 => InvKind::Block,
                1 => InvKind::Tx,
                tag => return Err(WireError::UnknownTag { what: "inv", tag }),
            };
            items.push((kind, Hash::from(r.read_256()?)));
        }
        r.finish()?;
        Ok(Self { items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::{commit_amount, BlsSignature, StepVotes};

    fn sample_block() -> Block {
        let mut block = Block::new(12, 1_700_000_123, Hash::from_bytes(b"prev"), Seed([5u8; 33]));
        block.txs.push(Transaction::Standard(StandardFields {
            outputs: vec![commit_amount(100)],
        }));
        block.txs.push(Transaction::Stake(StakeFields {
            pk_bls: BlsPublicKey([7u8; 48]),
            pk_ed: EdPublicKey([8u8; 32]),
            lock_time: 250_000,
            outputs: vec![commit_amount(5_000), commit_amount(11)],
        }));
        block.txs.push(Transaction::Bid(BidFields {
            m: [9u8; 32],
            lock_time: 1_000,
            outputs: vec![commit_amount(77)],
        }));
        block.header.certificate = Certificate {
            step_one_batch: StepVotes {
                step: 2,
                bit_set: 0xdead,
                signature: BlsSignature([1u8; 96]),
            },
            step_two_batch: StepVotes {
                step: 3,
                bit_set: 0xbeef,
                signature: BlsSignature([2u8; 96]),
            },
            first_reduction_hash: Hash::from_bytes(b"h1"),
            second_reduction_hash: Hash::from_bytes(b"h1"),
        };
        block.set_root();
        block.set_hash();
        block
    }

    #[test]
    fn block_roundtrip_bit_for_bit() {
        let block = sample_block();
        let bytes = block_to_bytes(&block);
        let decoded = block_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(block_to_bytes(&decoded), bytes);
    }

    #[test]
    fn truncated_block_rejected() {
        let bytes = block_to_bytes(&sample_block());
        assert!(block_from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut bytes = block_to_bytes(&sample_block());
        bytes.push(0);
        assert_eq!(block_from_bytes(&bytes), Err(WireError::TrailingBytes));
    }

    #[test]
    fn unknown_tx_kind_rejected() {
        let mut r = Reader::new(&[9u8]);
        assert_eq!(
            unmarshal_transaction(&mut r),
            Err(WireError::UnknownTag {
                what: "transaction",
                tag: 9
            })
        );
    }

    #[test]
    fn inv_roundtrip() {
        let mut inv = Inv::default();
        inv.add(InvKind::Block, Hash::from_bytes(b"blk"));
        inv.add(InvKind::Tx, Hash::from_bytes(b"tx"));
        assert_eq!(Inv::from_bytes(&inv.to_bytes()).unwrap(), inv);
    }

    #[test]
    fn certificate_roundtrip() {
        let block = sample_block();
        let mut buf = Vec::new();
        marshal_certificate(&block.header.certificate, &mut buf);
        let mut r = Reader::new(&buf);
        let decoded = unmarshal_certificate(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(decoded, block.header.certificate);
    }
}
