//! Variable-length integer encoding.
//!
//! Storage values pack their scaled integers as ZigZag varints so that the
//! small deltas produced by the points codec stay small on disk:
//! - each byte carries 7 payload bits plus a continuation flag,
//! - ZigZag maps signed to unsigned so small negative deltas also encode in
//!   one byte (0 → 0, -1 → 1, 1 → 2, -2 → 3, ...).
//!
//! Unlike an in-process buffer, stored bytes are untrusted: decoding a
//! truncated or oversized varint returns `Error::Storage` instead of
//! panicking.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Encode a signed integer as a varint (ZigZag encoding).
pub fn encode_varint(buf: &mut impl BufMut, value: i64) {
    let unsigned = ((value << 1) ^ (value >> 63)) as u64;
    encode_varint_u64(buf, unsigned);
}

/// Encode an unsigned integer as a varint.
pub fn encode_varint_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80; // Continuation bit.
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode a varint to a signed integer.
pub fn decode_varint(buf: &mut impl Buf) -> Result<i64> {
    let unsigned = decode_varint_u64(buf)?;

    // ZigZag decoding.
    let value = (unsigned >> 1) as i64;
    Ok(if (unsigned & 1) != 0 { !value } else { value })
}

/// Decode a varint to an unsigned integer.
pub fn decode_varint_u64(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::Storage("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            break;
        }

        shift += 7;

        if shift >= 64 {
            return Err(Error::Storage("varint too large".to_string()));
        }
    }

    Ok(value)
}
