//! Primitive encodings shared by the dynamic and typed codecs.
//!
//! Every encoded value is a standalone byte string: integers are varints
//! (zigzag for the signed kinds), floats are little-endian fixed width, and
//! strings and byte arrays carry a varint length. Decoders consume the whole
//! input and reject trailing bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

use crate::error::{CodecError, Result};

pub fn put_uint32(value: u32, buf: &mut BytesMut) {
    encode_varint(u64::from(value), buf);
}

pub fn put_uint64(value: u64, buf: &mut BytesMut) {
    encode_varint(value, buf);
}

pub fn put_sint32(value: i32, buf: &mut BytesMut) {
    encode_varint(u64::from(((value << 1) ^ (value >> 31)) as u32), buf);
}

pub fn put_sint64(value: i64, buf: &mut BytesMut) {
    encode_varint(((value << 1) ^ (value >> 63)) as u64, buf);
}

pub fn put_float(value: f32, buf: &mut BytesMut) {
    buf.put_f32_le(value);
}

pub fn put_double(value: f64, buf: &mut BytesMut) {
    buf.put_f64_le(value);
}

pub fn put_bool(value: bool, buf: &mut BytesMut) {
    encode_varint(u64::from(value), buf);
}

pub fn put_string(value: &str, buf: &mut BytesMut) {
    put_bytes(value.as_bytes(), buf);
}

pub fn put_bytes(value: &[u8], buf: &mut BytesMut) {
    encode_varint(value.len() as u64, buf);
    buf.extend_from_slice(value);
}

pub fn decode_uint32(bytes: &Bytes) -> Result<u32> {
    whole(bytes, "uint32", |cursor| {
        let value = varint(cursor)?;
        u32::try_from(value).map_err(|_| format!("{value} out of range"))
    })
}

pub fn decode_uint64(bytes: &Bytes) -> Result<u64> {
    whole(bytes, "uint64", varint)
}

pub fn decode_sint32(bytes: &Bytes) -> Result<i32> {
    whole(bytes, "sint32", |cursor| {
        let value = varint(cursor)?;
        let value = u32::try_from(value).map_err(|_| format!("{value} out of range"))?;
        Ok(((value >> 1) as i32) ^ -((value & 1) as i32))
    })
}

pub fn decode_sint64(bytes: &Bytes) -> Result<i64> {
    whole(bytes, "sint64", |cursor| {
        let value = varint(cursor)?;
        Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
    })
}

pub fn decode_float(bytes: &Bytes) -> Result<f32> {
    whole(bytes, "float", |cursor| {
        need(cursor, 4)?;
        Ok(cursor.get_f32_le())
    })
}

pub fn decode_double(bytes: &Bytes) -> Result<f64> {
    whole(bytes, "double", |cursor| {
        need(cursor, 8)?;
        Ok(cursor.get_f64_le())
    })
}

/// Any nonzero varint reads as `true`.
pub fn decode_bool(bytes: &Bytes) -> Result<bool> {
    whole(bytes, "bool", |cursor| Ok(varint(cursor)? != 0))
}

pub fn decode_string(bytes: &Bytes) -> Result<String> {
    whole(bytes, "string", |cursor| {
        let raw = length_delimited(cursor)?;
        String::from_utf8(raw.to_vec()).map_err(|err| err.to_string())
    })
}

pub fn decode_bytes(bytes: &Bytes) -> Result<Bytes> {
    whole(bytes, "bytes", length_delimited)
}

fn whole<T>(
    bytes: &Bytes,
    expected: &str,
    read: impl FnOnce(&mut Bytes) -> std::result::Result<T, String>,
) -> Result<T> {
    let mut cursor = bytes.clone();
    let value = read(&mut cursor).map_err(|reason| CodecError::decode(expected, bytes, reason))?;
    if cursor.has_remaining() {
        return Err(CodecError::decode(
            expected,
            bytes,
            format!("{} trailing bytes", cursor.remaining()),
        ));
    }
    Ok(value)
}

fn varint(cursor: &mut Bytes) -> std::result::Result<u64, String> {
    decode_varint(cursor).map_err(|err| err.to_string())
}

fn need(cursor: &Bytes, len: usize) -> std::result::Result<(), String> {
    if cursor.remaining() < len {
        return Err(format!("need {len} bytes, have {}", cursor.remaining()));
    }
    Ok(())
}

fn length_delimited(cursor: &mut Bytes) -> std::result::Result<Bytes, String> {
    let len = varint(cursor)?;
    if (cursor.remaining() as u64) < len {
        return Err(format!(
            "declared length {len} exceeds {} available bytes",
            cursor.remaining()
        ));
    }
    Ok(cursor.split_to(len as usize))
}
