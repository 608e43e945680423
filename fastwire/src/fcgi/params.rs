//! Name-value pair encoding used in PARAMS payloads.
//!
//! Each pair is laid out as `name length, value length, name, value`.
//! A length up to 127 takes one byte; anything longer takes four bytes in
//! network order with the top bit of the first byte set.

use super::error::RecordError;

use bytes::{BufMut, BytesMut};
use log::debug;

/// Largest length the four-byte form can carry.
pub const MAX_PARAM_LEN: usize = 0x7fff_ffff;

/// Largest length the one-byte form can carry.
const SHORT_LEN_MAX: usize = 0x7f;

const LONG_LEN_FLAG: u32 = 0x8000_0000;

/// Output of [`encode_params`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedParams {
    pub bytes: BytesMut,

    /// Pairs that could not be represented and were left out.
    pub skipped: usize,
}

/// Writes `len` in the one- or four-byte form.
///
/// Returns `false` without writing anything if `len` does not fit.
pub fn put_length(buf: &mut impl BufMut, len: usize) -> bool {
    if len <= SHORT_LEN_MAX {
        buf.put_u8(len as u8);
        true
    } else if len <= MAX_PARAM_LEN {
        buf.put_u32(len as u32 | LONG_LEN_FLAG);
        true
    } else {
        false
    }
}

/// Number of bytes the length prefix of `len` occupies.
pub fn length_width(len: usize) -> Option<usize> {
    match len {
        0..=SHORT_LEN_MAX => Some(1),
        _ if len <= MAX_PARAM_LEN => Some(4),
        _ => None,
    }
}

/// Encodes `pairs` in order.
///
/// A pair whose name or value is too long for the length encoding is
/// skipped and counted in [`EncodedParams::skipped`]; the rest of the
/// pairs are still encoded.
pub fn encode_params<'a, I>(pairs: I) -> EncodedParams
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut bytes = BytesMut::new();
    let mut skipped = 0;

    for (name, value) in pairs {
        let (Some(name_width), Some(value_width)) =
            (length_width(name.len()), length_width(value.len()))
        else {
            debug!(
                "skipping parameter pair of {} + {} bytes: too long to encode",
                name.len(),
                value.len()
            );
            skipped += 1;
            continue;
        };

        bytes.reserve(name_width + value_width + name.len() + value.len());

        put_length(&mut bytes, name.len());
        put_length(&mut bytes, value.len());
        bytes.put_slice(name.as_bytes());
        bytes.put_slice(value.as_bytes());
    }

    EncodedParams { bytes, skipped }
}

fn take_length(input: &mut &[u8]) -> Result<usize, RecordError> {
    let Some(&first) = input.first() else {
        return Err(RecordError::MalformedParams("missing length"));
    };

    if first & 0x80 == 0 {
        *input = &input[1..];
        return Ok(first as usize);
    }

    if input.len() < 4 {
        return Err(RecordError::MalformedParams("truncated four-byte length"));
    }

    let len = u32::from_be_bytes([input[0], input[1], input[2], input[3]]) & !LONG_LEN_FLAG;
    *input = &input[4..];

    Ok(len as usize)
}

fn take_str(input: &mut &[u8], len: usize) -> Result<String, RecordError> {
    if input.len() < len {
        return Err(RecordError::MalformedParams("truncated name or value"));
    }

    let (head, rest) = input.split_at(len);
    *input = rest;

    String::from_utf8(head.to_vec()).map_err(|_| RecordError::MalformedParams("invalid utf-8"))
}

/// Decodes a complete PARAMS payload back into pairs.
pub fn decode_params(mut input: &[u8]) -> Result<Vec<(String, String)>, RecordError> {
    let mut pairs = Vec::new();

    while !input.is_empty() {
        let name_len = take_length(&mut input)?;
        let value_len = take_length(&mut input)?;

        let name = take_str(&mut input, name_len)?;
        let value = take_str(&mut input, value_len)?;

        pairs.push((name, value));
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_lengths_use_one_byte() {
        let encoded = encode_params([("SCRIPT_NAME", "/index.php")]);

        assert_eq!(encoded.skipped, 0);
        assert_eq!(encoded.bytes[0], 11);
        assert_eq!(encoded.bytes[1], 10);
        assert_eq!(&encoded.bytes[2..13], b"SCRIPT_NAME");
        assert_eq!(&encoded.bytes[13..], b"/index.php");
    }

    #[test]
    fn test_length_127_is_short_and_128_is_long() {
        let name = "n".repeat(127);
        let value = "v".repeat(128);

        let encoded = encode_params([(name.as_str(), value.as_str())]);
        let bytes = &encoded.bytes;

        assert_eq!(bytes[0], 127);
        assert_eq!(&bytes[1..5], &[0x80, 0x00, 0x00, 0x80]);
        assert_eq!(bytes.len(), 1 + 4 + 127 + 128);
    }

    #[test]
    fn test_put_length_rejects_unrepresentable_lengths() {
        let mut buf = BytesMut::new();

        assert!(!put_length(&mut buf, MAX_PARAM_LEN + 1));
        assert!(buf.is_empty());
        assert_eq!(length_width(MAX_PARAM_LEN + 1), None);

        assert!(put_length(&mut buf, MAX_PARAM_LEN));
        assert_eq!(&buf[..], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_decode_params_preserves_order() {
        let long = "x".repeat(300);
        let pairs = [("A", "1"), ("LONG", long.as_str()), ("", "empty-name")];

        let encoded = encode_params(pairs);
        let decoded = decode_params(&encoded.bytes).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], ("A".to_string(), "1".to_string()));
        assert_eq!(decoded[1].1.len(), 300);
        assert_eq!(decoded[2].1, "empty-name");
    }

    #[test]
    fn test_decode_params_rejects_truncation() {
        assert_eq!(
            decode_params(&[5, 1, b'a']),
            Err(RecordError::MalformedParams("truncated name or value"))
        );
        assert_eq!(
            decode_params(&[0x80, 0x00]),
            Err(RecordError::MalformedParams("truncated four-byte length"))
        );
        assert_eq!(
            decode_params(&[1]),
            Err(RecordError::MalformedParams("missing length"))
        );
    }

    #[test]
    fn test_decode_params_rejects_invalid_utf8() {
        assert_eq!(
            decode_params(&[1, 1, 0xff, b'a']),
            Err(RecordError::MalformedParams("invalid utf-8"))
        );
    }
}
