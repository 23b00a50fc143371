//! Primitive encodings shared by the manifest and table formats.
//!
//! Variable-length integers use the LevelDB layout: 7 bits per byte, least
//! significant group first, high bit set on every byte except the last.
//! A length-prefixed slice is a varint32 length followed by that many bytes.
//!
//! Decoders take a cursor (`&mut &[u8]`) and advance it only on success, so a
//! failed read leaves the input where it was.

use bytes::BufMut;

/// Maximum encoded length of a varint32.
pub const MAX_VARINT32_LEN: usize = 5;

/// Maximum encoded length of a varint64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Appends `value` as a varint32.
pub fn put_varint32<B: BufMut>(dst: &mut B, value: u32) {
    put_varint64(dst, value as u64);
}

/// Appends `value` as a varint64.
pub fn put_varint64<B: BufMut>(dst: &mut B, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Appends `data` prefixed with its varint32 length.
pub fn put_length_prefixed_slice<B: BufMut>(dst: &mut B, data: &[u8]) {
    put_varint32(dst, data.len() as u32);
    dst.put_slice(data);
}

/// Number of bytes `value` occupies as a varint.
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Reads a varint32, rejecting values that overflow 32 bits.
pub fn get_varint32(input: &mut &[u8]) -> Option<u32> {
    let (value, len) = decode_varint(input, MAX_VARINT32_LEN)?;
    let value = u32::try_from(value).ok()?;
    *input = &input[len..];
    Some(value)
}

/// Reads a varint64.
pub fn get_varint64(input: &mut &[u8]) -> Option<u64> {
    let (value, len) = decode_varint(input, MAX_VARINT64_LEN)?;
    *input = &input[len..];
    Some(value)
}

/// Reads a length-prefixed slice, borrowing from the input.
pub fn get_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let mut cursor = *input;
    let len = get_varint32(&mut cursor)? as usize;
    if cursor.len() < len {
        return None;
    }
    let (slice, rest) = cursor.split_at(len);
    *input = rest;
    Some(slice)
}

fn decode_varint(input: &[u8], max_len: usize) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    for (i, &byte) in input.iter().take(max_len).enumerate() {
        let shift = 7 * i as u32;
        let bits = (byte & 0x7f) as u64;
        // The tenth byte of a varint64 may only carry the top bit of the value.
        if shift == 63 && bits > 1 {
            return None;
        }
        result |= bits << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}
