//! Mesh fragment codec
//!
//! ESP-NOW frames carry at most 250 bytes, so the coordinator forwards long
//! mesh messages as a series of fragments on `.../tele/packet`:
//! ```text
//! [ 0..4: correlation id ][ 4: number ][ 5: total ][ 6..: payload, zero padded ]
//! ```
//!
//! Only the first three correlation bytes take part in matching fragments;
//! the fourth is sent but ignored. The first fragment's payload starts with
//! the original topic followed by a `0x01` separator.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

use crate::limits::{FRAGMENT_CHUNK_LEN, FRAGMENT_WIRE_LEN, MAX_FRAGMENTS};

/// Fixed header in front of every fragment payload
pub const HEADER_LEN: usize = 6;

/// Separates the topic from the payload in the first fragment
pub const TOPIC_SEPARATOR: u8 = 0x01;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Fragment too short: {0} bytes (header is {HEADER_LEN})")]
    TooShort(usize),

    #[error("Invalid fragment header: number {number} of {total}")]
    InvalidHeader { number: u8, total: u8 },

    #[error("Message too large: {0} bytes needs more than {MAX_FRAGMENTS} fragments")]
    MessageTooLarge(usize),
}

/// Groups the fragments of one logical message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub [u8; 3]);

impl CorrelationId {
    /// Correlator for a sender-chosen 32 bit id (big-endian on the wire)
    pub fn from_u32(id: u32) -> Self {
        let b = id.to_be_bytes();
        Self([b[0], b[1], b[2]])
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// One decoded fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub correlation: CorrelationId,
    /// 1-based position within the message
    pub number: u8,
    pub total: u8,
    /// Original topic; only fragment #1 carries one
    pub topic: Option<String>,
    pub payload: Bytes,
}

impl Fragment {
    /// First fragment that arrived without a topic separator
    pub fn is_missing_topic(&self) -> bool {
        self.number == 1 && self.topic.is_none()
    }
}

/// Decode a raw `tele/packet` payload into a fragment
pub fn decode_fragment(raw: &[u8]) -> Result<Fragment, CodecError> {
    if raw.len() < HEADER_LEN {
        return Err(CodecError::TooShort(raw.len()));
    }

    let correlation = CorrelationId([raw[0], raw[1], raw[2]]);
    let number = raw[4];
    let total = raw[5];

    if number == 0 || total == 0 {
        return Err(CodecError::InvalidHeader { number, total });
    }

    // Strip the zero padding of short frames
    let mut body = &raw[HEADER_LEN..];
    while let [rest @ .., 0x00] = body {
        body = rest;
    }

    let mut topic = None;
    if number == 1 {
        if let Some(pos) = body.iter().position(|b| *b == TOPIC_SEPARATOR) {
            topic = Some(String::from_utf8_lossy(&body[..pos]).into_owned());
            body = &body[pos + 1..];
        }
    }

    Ok(Fragment {
        correlation,
        number,
        total,
        topic,
        payload: Bytes::copy_from_slice(body),
    })
}

/// Split a message into zero padded wire fragments, the way a mesh node
/// hands it to the coordinator.
///
/// An empty `topic` sends the message without the topic header.
pub fn encode_fragments(
    topic: &str,
    message: &[u8],
    correlation: u32,
) -> Result<Vec<Bytes>, CodecError> {
    let mut body = Vec::with_capacity(topic.len() + 1 + message.len());
    if !topic.is_empty() {
        body.extend_from_slice(topic.as_bytes());
        body.push(TOPIC_SEPARATOR);
    }
    body.extend_from_slice(message);

    let total = body.len().div_ceil(FRAGMENT_CHUNK_LEN).max(1);
    if total > MAX_FRAGMENTS {
        return Err(CodecError::MessageTooLarge(body.len()));
    }

    let mut fragments = Vec::with_capacity(total);
    let mut chunks = body.chunks(FRAGMENT_CHUNK_LEN);

    for number in 1..=total {
        let chunk = chunks.next().unwrap_or_default();

        let mut buf = BytesMut::with_capacity(FRAGMENT_WIRE_LEN);
        buf.put_u32(correlation);
        buf.put_u8(number as u8);
        buf.put_u8(total as u8);
        buf.put_slice(chunk);
        buf.resize(FRAGMENT_WIRE_LEN, 0x00);

        fragments.push(buf.freeze());
    }

    Ok(fragments)
}
