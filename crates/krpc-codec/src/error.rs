use std::fmt;

use bytes::Bytes;

/// Errors that can occur while encoding or decoding kRPC values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes do not parse as the expected shape.
    #[error("cannot decode {expected} from {} bytes: {reason}", .bytes.len())]
    Decode {
        expected: String,
        /// The offending input, kept for diagnostics.
        bytes: Bytes,
        reason: String,
    },

    /// A value or payload does not have the structure the shape declares.
    #[error("schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    /// The server described a type this codec has no representation for.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
}

impl CodecError {
    pub(crate) fn decode(
        expected: impl fmt::Display,
        bytes: &Bytes,
        reason: impl fmt::Display,
    ) -> Self {
        Self::Decode {
            expected: expected.to_string(),
            bytes: bytes.clone(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        Self::SchemaMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
