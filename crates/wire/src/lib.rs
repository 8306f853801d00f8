//! Wire format for the SBA node.
//!
//! Frames are `[topic byte][payload]`; payloads use little-endian integers,
//! CompactSize varints (canonical form enforced on read) and raw 256/512-bit
//! fields.

mod block_codec;
mod encoding;
mod message;
mod topics;

pub use block_codec::{
    block_from_bytes, block_to_bytes, marshal_block, marshal_certificate, marshal_header,
    marshal_transaction, unmarshal_block, unmarshal_certificate, unmarshal_header,
    unmarshal_transaction, Inv, InvKind,
};
pub use encoding::{
    var_int_size, write_256, write_512, write_i64, write_u16, write_u32, write_u64, write_u8,
    write_var_bytes, write_var_int, Reader, WireError,
};
pub use message::{
    marshal_step_votes, open_envelope, seal_envelope, signable_vote_bytes, unmarshal_step_votes,
    AggregatedAgreement, Header, ReductionEvent, RoundUpdate, ScoreEvent,
};
pub use topics::{extract_topic, prepend_topic, Topic};
