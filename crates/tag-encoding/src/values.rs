use crate::error::{DecodeError, EncodeError};

/// Size of the length prefix written before every value.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest value [`Values::write_value`] accepts.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Growable buffer of length-prefixed values.
///
/// Each value is written as a 2-byte little-endian length followed by that
/// many bytes. A zero length marks a key with no value and carries no payload.
///
/// Writes append at `write_index`; reads consume from `read_index`. The
/// backing storage is zero-filled up to its allocated size, and only
/// `[0, write_index)` is meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Values {
    buffer: Vec<u8>,
    write_index: usize,
    read_index: usize,
}

impl Values {
    /// Creates an empty buffer. Nothing is allocated until the first write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer with `capacity` bytes preallocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            write_index: 0,
            read_index: 0,
        }
    }

    /// Wraps previously encoded bytes for reading.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let buffer = bytes.into();
        Self {
            write_index: buffer.len(),
            buffer,
            read_index: 0,
        }
    }

    /// Appends one value.
    ///
    /// An empty slice encodes "no value". On error the buffer is unchanged.
    pub fn write_value(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        let len = u16::try_from(value.len()).map_err(|_| EncodeError::ValueTooLong {
            len: value.len(),
            max: MAX_VALUE_LEN,
        })?;
        self.grow_if_required(LENGTH_PREFIX_SIZE + value.len());

        let start = self.write_index;
        self.buffer[start..start + LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_le_bytes());
        self.write_index += LENGTH_PREFIX_SIZE;

        if value.is_empty() {
            return Ok(());
        }

        let start = self.write_index;
        self.buffer[start..start + value.len()].copy_from_slice(value);
        self.write_index += value.len();
        Ok(())
    }

    /// Reads the next value. A zero-length value comes back as an empty `Vec`.
    pub fn read_value(&mut self) -> Result<Vec<u8>, DecodeError> {
        let offset = self.read_index;
        let remaining = self.remaining();
        if remaining == 0 {
            return Err(DecodeError::Exhausted);
        }
        if remaining < LENGTH_PREFIX_SIZE {
            return Err(DecodeError::TruncatedLength { offset });
        }

        let len = usize::from(u16::from_le_bytes([
            self.buffer[offset],
            self.buffer[offset + 1],
        ]));
        let start = offset + LENGTH_PREFIX_SIZE;
        let available = self.write_index - start;
        if len > available {
            return Err(DecodeError::TruncatedValue {
                offset,
                len,
                available,
            });
        }

        self.read_index = start + len;
        Ok(self.buffer[start..start + len].to_vec())
    }

    /// The encoded values written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.write_index]
    }

    /// Consumes the buffer, returning only the encoded bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buffer.truncate(self.write_index);
        self.buffer
    }

    /// Bytes written but not yet read.
    pub fn remaining(&self) -> usize {
        self.write_index - self.read_index
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Starts reading again from the first value.
    pub fn reset_read(&mut self) {
        self.read_index = 0;
    }

    /// Allocated size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn grow_if_required(&mut self, expected: usize) {
        if self.buffer.len() - self.write_index < expected {
            let new_len = 2 * (self.buffer.len() + 1) + expected;
            self.buffer.resize(new_len, 0);
        }
    }
}

/// Encodes a sequence of values into a fresh byte vector.
pub fn encode_values<I, V>(values: I) -> Result<Vec<u8>, EncodeError>
where
    I: IntoIterator<Item = V>,
    V: AsRef<[u8]>,
{
    let mut encoder = Values::new();
    for value in values {
        encoder.write_value(value.as_ref())?;
    }
    Ok(encoder.into_bytes())
}

/// Decodes every value in `bytes`.
pub fn decode_values(bytes: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    let mut decoder = Values::from_bytes(bytes);
    let mut values = Vec::new();
    while !decoder.is_exhausted() {
        values.push(decoder.read_value()?);
    }
    Ok(values)
}
