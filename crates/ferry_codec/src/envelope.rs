//! Versioned, checksummed envelope around a CBOR payload.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! | magic "FRY1" | version u16 | kind u8 | len u32 | payload (CBOR) | checksum u64 |
//! ```
//!
//! The checksum is the first 8 bytes of SHA-256 over everything before it.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Magic bytes at the start of every envelope.
pub const ENVELOPE_MAGIC: [u8; 4] = *b"FRY1";

/// Current envelope version.
pub const ENVELOPE_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 1 + 4;
const CHECKSUM_LEN: usize = 8;

/// What kind of record an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordKind {
    /// A migration session checkpoint.
    Checkpoint = 1,
    /// A sync outbox entry.
    OutboxItem = 2,
    /// Coordinator metadata (active mode).
    ModeState = 3,
    /// A user record moved by the migration engine.
    UserRecord = 4,
}

impl RecordKind {
    /// Converts to the on-disk code.
    pub fn to_code(self) -> u8 {
        self as u8
    }

    /// Converts from the on-disk code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Checkpoint),
            2 => Some(Self::OutboxItem),
            3 => Some(Self::ModeState),
            4 => Some(Self::UserRecord),
            _ => None,
        }
    }
}

/// Encodes `value` into an envelope of the given kind.
pub fn encode<T: Serialize + ?Sized>(kind: RecordKind, value: &T) -> CodecResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| CodecError::encoding_failed("payload larger than 4 GiB"))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    buf.extend_from_slice(&ENVELOPE_MAGIC);
    buf.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
    buf.push(kind.to_code());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);

    let checksum = checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

/// Decodes an envelope, verifying magic, version, kind and checksum.
pub fn decode<T: DeserializeOwned>(expected: RecordKind, data: &[u8]) -> CodecResult<T> {
    let (kind, payload) = open(data)?;
    if kind != expected {
        return Err(CodecError::KindMismatch {
            expected,
            actual: kind,
        });
    }
    ciborium::from_reader(payload).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Returns the record kind of an envelope after verifying it.
pub fn peek_kind(data: &[u8]) -> CodecResult<RecordKind> {
    open(data).map(|(kind, _)| kind)
}

/// Verifies the framing and returns the kind and the raw payload.
fn open(data: &[u8]) -> CodecResult<(RecordKind, &[u8])> {
    if data.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN + CHECKSUM_LEN,
            available: data.len(),
        });
    }
    if data[0..4] != ENVELOPE_MAGIC {
        return Err(CodecError::InvalidMagic);
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > ENVELOPE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let kind = RecordKind::from_code(data[6]).ok_or(CodecError::UnknownKind(data[6]))?;
    let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;

    let body_end = HEADER_LEN + len;
    let needed = body_end + CHECKSUM_LEN;
    if data.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: data.len(),
        });
    }

    let mut stored = [0u8; CHECKSUM_LEN];
    stored.copy_from_slice(&data[body_end..needed]);
    let expected = u64::from_le_bytes(stored);
    let actual = checksum(&data[..body_end]);
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    Ok((kind, &data[HEADER_LEN..body_end]))
}

fn checksum(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; CHECKSUM_LEN];
    head.copy_from_slice(&digest[..CHECKSUM_LEN]);
    u64::from_le_bytes(head)
}
