use bytes::{Buf, Bytes, BytesMut};
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Maximum number of bytes the length prefix may occupy before the stream is
/// considered malformed.
pub const MAX_LENGTH_PREFIX: usize = 16;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬─────────────────────┐
/// │ Length (varint, LEB) │ Payload             │
/// │ 1..=10 bytes         │ (Length bytes)      │
/// └──────────────────────┴─────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    let len = payload.len() as u64;
    dst.reserve(encoded_len_varint(len) + payload.len());
    encode_varint(len, dst);
    dst.extend_from_slice(payload);
}

/// Decode the varint length prefix at the start of `prefix`.
///
/// Returns `Ok(Some((length, prefix_len)))` once a terminating byte is seen,
/// `Ok(None)` if more bytes are needed, and `MalformedLength` if no valid
/// varint terminates within [`MAX_LENGTH_PREFIX`] bytes.
pub fn decode_length(prefix: &[u8]) -> Result<Option<(u64, usize)>> {
    let window = &prefix[..prefix.len().min(MAX_LENGTH_PREFIX)];
    match window.iter().position(|byte| byte & 0x80 == 0) {
        Some(end) => {
            let mut varint = &window[..=end];
            let len = decode_varint(&mut varint).map_err(|_| FrameError::MalformedLength {
                prefix: window[..=end].to_vec(),
            })?;
            Ok(Some((len, end + 1)))
        }
        None if window.len() == MAX_LENGTH_PREFIX => Err(FrameError::MalformedLength {
            prefix: window.to_vec(),
        }),
        None => Ok(None),
    }
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Bytes>> {
    let Some((len, prefix_len)) = decode_length(&src[..])? else {
        return Ok(None);
    };

    let available = (src.len() - prefix_len) as u64;
    if available < len {
        return Ok(None);
    }

    src.advance(prefix_len);
    Ok(Some(src.split_to(len as usize).freeze()))
}

/// `tokio_util` codec for length-prefixed frames.
///
/// Yields raw payloads; the message schema is the caller's concern.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match decode_frame(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, dst);
        Ok(())
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        encode_frame(item, dst);
        Ok(())
    }
}
