//! Error types for the codec crate.

use crate::envelope::RecordKind;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The bytes do not start with the envelope magic.
    #[error("invalid envelope magic")]
    InvalidMagic,

    /// The envelope was written by a newer format.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u16),

    /// The kind byte is not a known record kind.
    #[error("unknown record kind: {0}")]
    UnknownKind(u8),

    /// The envelope holds a different kind of record than requested.
    #[error("record kind mismatch: expected {expected:?}, found {actual:?}")]
    KindMismatch {
        /// Kind the caller asked for.
        expected: RecordKind,
        /// Kind found in the envelope.
        actual: RecordKind,
    },

    /// Unexpected end of input.
    #[error("envelope truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        /// Checksum stored in the envelope.
        expected: u64,
        /// Checksum computed over the envelope contents.
        actual: u64,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Returns true if the bytes were damaged rather than merely unexpected.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic | Self::Truncated { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
