#![warn(missing_docs)]
//! Compact binary encodings used by scene replication: a self-describing run-length
//! codec for homogeneous arrays and the fixed layout of bulk instance records.

mod record;
mod rle;

use thiserror::Error;

pub use record::{InstanceBlob, RECORD_LEN};
pub use rle::{decode, encode, ElementError, RawElement, RleCodec, MAX_ELEMENTS, MIN_RUN_BYTES};

/// Errors raised while decoding binary payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Segment header with an unknown kind bit pattern.
    #[error("unknown segment kind in header {header:#04x} at byte {offset}")]
    UnknownSegment {
        /// Raw header byte.
        header: u8,
        /// Offset of the header.
        offset: usize,
    },
    /// A custom element decoder rejected its input.
    #[error("element decoder rejected input at byte {0}")]
    Rejected(usize),
    /// The stream declares more elements than the decoder accepts.
    #[error("decoded length {0} exceeds the element limit")]
    TooLarge(usize),
    /// A fixed-size record was shorter than its layout.
    #[error("record too short: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Required byte count.
        expected: usize,
        /// Provided byte count.
        actual: usize,
    },
}
