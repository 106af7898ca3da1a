//! Tag Value Encoding
//!
//! Serializes a sequence of tag values into one contiguous buffer, each value
//! preceded by its length as a 2-byte little-endian integer. Used to build
//! compact map keys from the values of a fixed, ordered list of tag keys; a
//! zero length stands for a key that has no value.
//!
//! # Example
//!
//! ```
//! use tag_encoding::Values;
//!
//! let mut values = Values::new();
//! values.write_value(b"GET").unwrap();
//! values.write_value(b"").unwrap(); // key without a value
//! values.write_value(b"/users").unwrap();
//!
//! let mut reader = Values::from_bytes(values.bytes());
//! assert_eq!(reader.read_value().unwrap(), b"GET");
//! assert!(reader.read_value().unwrap().is_empty());
//! assert_eq!(reader.read_value().unwrap(), b"/users");
//! assert!(reader.is_exhausted());
//! ```

mod error;
mod values;

pub use error::{DecodeError, EncodeError};
pub use values::{decode_values, encode_values, Values, LENGTH_PREFIX_SIZE, MAX_VALUE_LEN};
