// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic binary framing for sync frames.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR-encoded [`Frame`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Delta, ResyncResponse};

/// Protocol magic constant "SKN!".
pub const MAGIC: [u8; 4] = [0x53, 0x4b, 0x4e, 0x21];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header length in bytes (magic + version + flags + length).
pub const HEADER_LEN: usize = 12;
/// Checksum length in bytes.
pub const CHECKSUM_LEN: usize = 32;

/// Top-level frames exchanged on a sync stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Client → server greeting for late join/reconnect.
    Hello(Hello),
    /// Incremental operation batch.
    Delta(Delta),
    /// Full state snapshot (resync response / initial load).
    Snapshot(ResyncResponse),
}

/// Client greeting carrying its last known position in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Last sequence the client applied, if any.
    pub last_applied: Option<u64>,
    /// Protocol version the client speaks.
    pub protocol_version: u16,
}

/// Framing/codec failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// Fewer bytes than a complete packet.
    #[error("packet truncated")]
    Truncated,
    /// Leading magic did not match.
    #[error("bad magic")]
    BadMagic,
    /// Version this build does not speak.
    #[error("unsupported version {0:#06x}")]
    UnsupportedVersion(u16),
    /// Integrity check failed.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// CBOR encode/decode failure.
    #[error("cbor: {0}")]
    Codec(String),
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Encodes a frame into a full packet.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, WireError> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(frame, &mut payload).map_err(|e| WireError::Codec(e.to_string()))?;

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
    header[8..12].copy_from_slice(&(payload.len() as u32).to_be_bytes());

    let sum = checksum(&header, &payload);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&header);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&sum);
    Ok(out)
}

/// Decodes one packet from the front of `bytes`, returning the frame and
/// the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), WireError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(WireError::Truncated);
    }
    if bytes[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let total = HEADER_LEN + len + CHECKSUM_LEN;
    if bytes.len() < total {
        return Err(WireError::Truncated);
    }
    let header = &bytes[0..HEADER_LEN];
    let payload = &bytes[HEADER_LEN..HEADER_LEN + len];
    let expect = &bytes[HEADER_LEN + len..total];
    if checksum(header, payload).as_slice() != expect {
        return Err(WireError::ChecksumMismatch);
    }
    let frame: Frame =
        ciborium::de::from_reader(payload).map_err(|e| WireError::Codec(e.to_string()))?;
    Ok((frame, total))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{DeltaOp, NodeId, NodeInput};

    fn sample_delta() -> Frame {
        Frame::Delta(Delta {
            sequence: 42,
            timestamp_ms: 1_000,
            ops: vec![
                DeltaOp::AddNode(NodeInput::new("a", "server")),
                DeltaOp::RemoveNode {
                    id: NodeId::from("b"),
                },
            ],
        })
    }

    #[test]
    fn frames_round_trip() {
        let frame = sample_delta();
        let bytes = encode_frame(&frame).unwrap();
        let (decoded, used) = decode_frame(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn corrupted_payload_fails_the_checksum() {
        let mut bytes = encode_frame(&sample_delta()).unwrap();
        bytes[HEADER_LEN + 2] ^= 0xff;
        assert!(matches!(
            decode_frame(&bytes),
            Err(WireError::ChecksumMismatch)
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = encode_frame(&sample_delta()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode_frame(&bytes), Err(WireError::BadMagic)));
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let bytes = encode_frame(&sample_delta()).unwrap();
        assert!(matches!(
            decode_frame(&bytes[..bytes.len() - 1]),
            Err(WireError::Truncated)
        ));
    }

    #[test]
    fn hello_carries_resume_position() {
        let frame = Frame::Hello(Hello {
            last_applied: Some(7),
            protocol_version: VERSION,
        });
        let bytes = encode_frame(&frame).unwrap();
        let (decoded, _) = decode_frame(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }
}
