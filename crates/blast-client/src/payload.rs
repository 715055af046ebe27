//! Payload layout for tracked load messages.
//!
//! Every message carries a 16-byte big-endian header (sequence number,
//! send timestamp in nanoseconds since the Unix epoch) followed by
//! deterministic filler bytes. The subscriber decodes the header to
//! compute end-to-end latency per message.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Bytes occupied by the tracking header.
pub const HEADER_LEN: usize = 16;

/// Deterministic filler bytes for a given seed. Same seed, same bytes.
pub fn filler(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}

/// Assemble a payload from the tracking header and the shared filler.
pub fn encode(seq: u64, sent_nanos: i64, filler: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + filler.len());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&sent_nanos.to_be_bytes());
    buf.extend_from_slice(filler);
    buf
}

/// Read `(sequence, sent_nanos)` back out of a payload.
///
/// Returns `None` for payloads too short to carry the header, such as
/// foreign traffic on a shared topic.
pub fn decode(payload: &[u8]) -> Option<(u64, i64)> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    let seq = u64::from_be_bytes(payload[..8].try_into().ok()?);
    let sent_nanos = i64::from_be_bytes(payload[8..HEADER_LEN].try_into().ok()?);
    Some((seq, sent_nanos))
}
