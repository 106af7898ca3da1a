use thiserror::Error;

/// Errors from [`Values::write_value`](crate::Values::write_value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The value does not fit the 2-byte length prefix.
    #[error("value of {len} bytes exceeds the maximum of {max}")]
    ValueTooLong {
        /// Length of the rejected value.
        len: usize,
        /// Largest encodable length.
        max: usize,
    },
}

/// Errors from [`Values::read_value`](crate::Values::read_value).
///
/// The read cursor does not move when an error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Every written value has already been read.
    #[error("no more values to read")]
    Exhausted,
    /// Fewer than two bytes remain where a length prefix should start.
    #[error("truncated length prefix at offset {offset}")]
    TruncatedLength {
        /// Offset of the incomplete prefix.
        offset: usize,
    },
    /// The prefix announces more bytes than remain.
    #[error("value at offset {offset} needs {len} bytes but only {available} remain")]
    TruncatedValue {
        /// Offset of the length prefix.
        offset: usize,
        /// Length announced by the prefix.
        len: usize,
        /// Bytes remaining after the prefix.
        available: usize,
    },
}
