//! Topic tags.
//!
//! Every wire frame is `[topic byte][payload]`. Internal consensus topics
//! share the same tag space but are never emitted to the network; the gossip
//! edge only ever streams frames whose topic survived a republisher.

use crate::{Reader, WireError};

/// Message kind tag, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Topic {
    // External-facing topics.
    Block = 0x01,
    Candidate = 0x02,
    Inv = 0x03,
    GetHeaders = 0x04,
    Headers = 0x05,
    GetData = 0x06,
    MemPool = 0x07,
    Tx = 0x08,
    Score = 0x09,
    Reduction = 0x0a,
    Agreement = 0x0b,
    Gossip = 0x0c,

    // Internal consensus topics, never on the network.
    AgreementEvent = 0x20,
    WinningBlockHash = 0x21,
    Restart = 0x22,
    Generation = 0x23,
    RoundUpdate = 0x24,
    BestScore = 0x25,
    AcceptedBlock = 0x26,
}

impl Topic {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, WireError> {
        Ok(match byte {
            0x01 => Topic::Block,
            0x02 => Topic::Candidate,
            0x03 => Topic::Inv,
            0x04 => Topic::GetHeaders,
            0x05 => Topic::Headers,
            0x06 => Topic::GetData,
            0x07 => Topic::MemPool,
            0x08 => Topic::Tx,
            0x09 => Topic::Score,
            0x0a => Topic::Reduction,
            0x0b => Topic::Agreement,
            0x0c => Topic::Gossip,
            0x20 => Topic::AgreementEvent,
            0x21 => Topic::WinningBlockHash,
            0x22 => Topic::Restart,
            0x23 => Topic::Generation,
            0x24 => Topic::RoundUpdate,
            0x25 => Topic::BestScore,
            0x26 => Topic::AcceptedBlock,
            other => return Err(WireError::UnknownTopic(other)),
        })
    }
}

/// Prepend the topic byte to a payload, producing a wire frame.
pub fn prepend_topic(topic: Topic, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(topic.as_byte());
    frame.extend_from_slice(payload);
    frame
}

/// Split a wire frame into its topic and payload.
pub fn extract_topic(frame: &[u8]) -> Result<(Topic, &[u8]), WireError> {
    let mut r = Reader::new(frame);
    let topic = Topic::from_byte(r.read_u8()?)?;
    Ok((topic, &frame[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip() {
        for topic in [
            Topic::Block,
            Topic::Score,
            Topic::Reduction,
            Topic::Agreement,
            Topic::Gossip,
            Topic::WinningBlockHash,
            Topic::RoundUpdate,
        ] {
            assert_eq!(Topic::from_byte(topic.as_byte()).unwrap(), topic);
        }
    }

    #[test]
    fn unknown_byte_rejected() {
        assert_eq!(Topic::from_byte(0xee), Err(WireError::UnknownTopic(0xee)));
    }

    #[test]
    fn frame_roundtrip() {
        let frame = prepend_topic(Topic::Reduction, b"vote");
        let (topic, payload) = extract_topic(&frame).unwrap();
        assert_eq!(topic, Topic::Reduction);
        assert_eq!(payload, b"vote");
    }

    #[test]
    fn empty_frame_is_eof() {
        assert_eq!(extract_topic(&[]), Err(WireError::UnexpectedEof));
    }
}
