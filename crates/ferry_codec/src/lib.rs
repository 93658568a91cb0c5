//! # Ferry Codec
//!
//! Envelope encoding for every record Ferry persists.
//!
//! Values are serialized with serde into CBOR and wrapped in an envelope
//! that carries:
//! - A magic prefix and format version
//! - The record kind, so a checkpoint is never misread as an outbox item
//! - A truncated SHA-256 checksum, so damaged bytes fail loudly
//!
//! ## Usage
//!
//! ```
//! use ferry_codec::{Envelope, RecordKind};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Progress { done: u64 }
//!
//! impl Envelope for Progress {
//!     const KIND: RecordKind = RecordKind::Checkpoint;
//! }
//!
//! let bytes = Progress { done: 7 }.to_envelope().unwrap();
//! assert_eq!(Progress::from_envelope(&bytes).unwrap(), Progress { done: 7 });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;

pub use envelope::{decode, encode, peek_kind, RecordKind, ENVELOPE_MAGIC, ENVELOPE_VERSION};
pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types persisted inside an envelope.
pub trait Envelope: Serialize + DeserializeOwned {
    /// The record kind written into the envelope header.
    const KIND: RecordKind;

    /// Encode this value into envelope bytes.
    fn to_envelope(&self) -> CodecResult<Vec<u8>> {
        encode(Self::KIND, self)
    }

    /// Decode a value from envelope bytes.
    fn from_envelope(bytes: &[u8]) -> CodecResult<Self> {
        decode(Self::KIND, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        key: String,
        payload: Vec<u8>,
        attempts: u32,
    }

    impl Envelope for Item {
        const KIND: RecordKind = RecordKind::OutboxItem;
    }

    #[test]
    fn trait_uses_declared_kind() {
        let item = Item {
            key: "note:1".into(),
            payload: vec![1, 2, 3],
            attempts: 0,
        };
        let bytes = item.to_envelope().unwrap();
        assert_eq!(peek_kind(&bytes).unwrap(), RecordKind::OutboxItem);
    }

    proptest! {
        #[test]
        fn any_single_byte_flip_is_detected(
            payload in prop::collection::vec(any::<u8>(), 0..64),
            position in any::<prop::sample::Index>(),
        ) {
            let item = Item { key: "k".into(), payload, attempts: 1 };
            let mut bytes = item.to_envelope().unwrap();
            let at = position.index(bytes.len());
            bytes[at] ^= 0x80;
            prop_assert!(Item::from_envelope(&bytes).is_err());
        }
    }
}
