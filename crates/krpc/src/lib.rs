//! Async client for the kRPC protocol.
//!
//! kRPC exposes a game server's API over two TCP connections: one for
//! request/response calls and one for continuously updated streams.
//!
//! # Crate Structure
//!
//! - [`frame`]: varint length-prefixed framing
//! - [`codec`]: wire schema and value encoding
//! - [`client`]: handshakes, call client and stream multiplexer (behind the
//!   default `client` feature)

/// Re-export frame types.
pub mod frame {
    pub use krpc_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use krpc_codec::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use krpc_client::*;
}

pub use krpc_codec::{remote_class, remote_enum};

#[cfg(feature = "client")]
pub use krpc_client::{Client, ClientConfig, ClientError};
