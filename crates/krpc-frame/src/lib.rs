//! Varint length-prefixed message framing for kRPC connections.
//!
//! Every message on both the RPC and the stream connection is framed as:
//! - An unsigned varint holding the payload length (at most 16 bytes are
//!   examined before the prefix is declared malformed)
//! - Exactly that many payload bytes
//!
//! The frame layer knows nothing about the protobuf messages it carries.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, decode_length, encode_frame, FrameCodec, MAX_LENGTH_PREFIX};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
