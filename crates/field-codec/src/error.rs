//! Error types for tagged-field scanning and construction.

use thiserror::Error;

/// Errors raised while walking or building an encoded message.
///
/// Every variant is fatal to the current operation: the codec never drops or
/// clamps bytes it cannot account for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A varint ran past five groups, overflowed 32 bits, or the stream ended mid-value.
    #[error("malformed varint at offset {offset}")]
    MalformedVarint {
        /// Offset of the first byte of the varint.
        offset: usize,
    },

    /// The tag carried a wire type other than VARINT, FIXED64, LENGTH_DELIMITED or FIXED32.
    #[error("unknown wire type {wire_type} at offset {offset}")]
    UnknownWireType {
        /// Raw wire type (`tag & 7`).
        wire_type: u8,
        /// Offset of the payload that could not be skipped.
        offset: usize,
    },

    /// A fixed-width or length-delimited payload extends past the end of the buffer.
    #[error("truncated field at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        /// Offset of the payload.
        offset: usize,
        /// Bytes the payload claims.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A payload is too large for a 32-bit length prefix.
    #[error("payload of {len} bytes exceeds the 32-bit length limit")]
    PayloadTooLarge {
        /// Payload length in bytes.
        len: usize,
    },

    /// The field number does not fit a 32-bit tag.
    #[error("field number {0} exceeds the maximum of {max}", max = crate::types::MAX_FIELD_NUMBER)]
    FieldNumberOutOfRange(u32),

    /// The expiry does not fit the unsigned 32-bit seconds field.
    #[error("expiry {0} ms is out of range for the credential field")]
    ExpiryOutOfRange(i64),

    /// A string sub-field of the credential message is not UTF-8.
    #[error("invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
