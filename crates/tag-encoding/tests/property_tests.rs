//! Property-based tests for the value encoding.
//!
//! Coverage:
//! - Encoded size is the sum of prefixes and payloads
//! - Decoding returns exactly what was written, in order
//! - Any prefix of a valid encoding decodes cleanly or fails, never panics
//! - Storage grows by the documented policy and never shrinks

use proptest::prelude::*;
use tag_encoding::{decode_values, encode_values, DecodeError, Values, LENGTH_PREFIX_SIZE};

fn value_lists() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 0..20)
}

proptest! {
    #[test]
    fn prop_encoded_size(values in value_lists()) {
        let encoded = encode_values(&values).unwrap();
        let expected: usize = values.iter().map(|v| LENGTH_PREFIX_SIZE + v.len()).sum();
        prop_assert_eq!(encoded.len(), expected);
    }

    #[test]
    fn prop_decode_returns_written_values(values in value_lists()) {
        let mut buffer = Values::new();
        for value in &values {
            buffer.write_value(value).unwrap();
        }

        let mut reader = Values::from_bytes(buffer.bytes());
        for value in &values {
            prop_assert_eq!(&reader.read_value().unwrap(), value);
        }
        prop_assert!(reader.is_exhausted());
        prop_assert_eq!(reader.read_value(), Err(DecodeError::Exhausted));
    }

    #[test]
    fn prop_truncation_is_detected(values in value_lists(), cut in any::<prop::sample::Index>()) {
        let encoded = encode_values(&values).unwrap();
        prop_assume!(!encoded.is_empty());
        let cut = cut.index(encoded.len());

        // Either a whole number of values survived, or decoding reports an error
        if let Ok(decoded) = decode_values(&encoded[..cut]) {
            prop_assert!(decoded.len() <= values.len());
            prop_assert_eq!(&decoded[..], &values[..decoded.len()]);
        }
    }

    #[test]
    fn prop_growth_policy(values in value_lists()) {
        let mut buffer = Values::new();
        for value in &values {
            let before = buffer.capacity();
            let free = before - buffer.bytes().len();
            let needed = LENGTH_PREFIX_SIZE + value.len();

            buffer.write_value(value).unwrap();

            if free < needed {
                prop_assert_eq!(buffer.capacity(), 2 * (before + 1) + needed);
            } else {
                prop_assert_eq!(buffer.capacity(), before);
            }
            prop_assert!(buffer.bytes().len() <= buffer.capacity());
        }
    }
}
