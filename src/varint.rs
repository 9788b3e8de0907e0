//! Self-delimiting variable-length integer encoding.
//!
//! ```text
//! value 0..=252   -> 1 byte, the value itself
//! value > 252     -> 1 marker byte (253) + 4 bytes, big-endian
//! ```
//!
//! This is the convention used throughout the wire formats in this crate
//! wherever a length or line number needs to self-delimit inside a fixed-size
//! payload (`updfile`'s file-name length, a change record's `size` and
//! `line_num`, a `chain20` packet's `total_length`). Every call site reads
//! back exactly as many bytes as `encode_var_int` wrote.

pub const MARKER: u8 = 253;

/// Encode `value` as a var int. Returns 1 or 5 bytes.
pub fn encode_var_int(value: u32) -> Vec<u8> {
    if value < MARKER as u32 {
        vec![value as u8]
    } else {
        let mut out = Vec::with_capacity(5);
        out.push(MARKER);
        out.extend_from_slice(&value.to_be_bytes());
        out
    }
}

/// Decode a var int from the start of `buf`. Returns `(value, bytes_consumed)`.
pub fn decode_var_int(buf: &[u8]) -> Option<(u32, usize)> {
    let first = *buf.first()?;
    if first != MARKER {
        Some((first as u32, 1))
    } else {
        let rest = buf.get(1..5)?;
        let value = u32::from_be_bytes(rest.try_into().ok()?);
        Some((value, 5))
    }
}

/// Number of bytes `encode_var_int(value)` would produce, without allocating.
pub fn encoded_len(value: u32) -> usize {
    if value < MARKER as u32 {
        1
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_small_values() {
        for v in [0u32, 1, 100, 252] {
            let enc = encode_var_int(v);
            assert_eq!(enc.len(), 1);
            let (got, consumed) = decode_var_int(&enc).unwrap();
            assert_eq!(got, v);
            assert_eq!(consumed, 1);
        }
    }

    #[test]
    fn round_trips_large_values() {
        for v in [253u32, 254, 1000, u32::MAX] {
            let enc = encode_var_int(v);
            assert_eq!(enc.len(), 5);
            let (got, consumed) = decode_var_int(&enc).unwrap();
            assert_eq!(got, v);
            assert_eq!(consumed, 5);
        }
    }

    #[test]
    fn encoded_len_matches_actual_encoding() {
        for v in [0u32, 252, 253, 70000] {
            assert_eq!(encoded_len(v), encode_var_int(v).len());
        }
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(decode_var_int(&[]).is_none());
        assert!(decode_var_int(&[MARKER, 0, 0]).is_none());
    }

    proptest! {
        #[test]
        fn round_trips_any_u32(v in any::<u32>()) {
            let enc = encode_var_int(v);
            let (decoded, consumed) = decode_var_int(&enc).unwrap();
            prop_assert_eq!(decoded, v);
            prop_assert_eq!(consumed, enc.len());
        }
    }
}
