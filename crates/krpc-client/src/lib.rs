//! kRPC client connections.
//!
//! A kRPC server listens on two TCP ports. The RPC port carries
//! request/response calls ([`CallClient`]); the stream port carries
//! unsolicited update batches ([`StreamMux`]). Both start with a handshake,
//! and the stream handshake presents the [`ClientIdentifier`] issued by the
//! RPC handshake.
//!
//! [`Client`] ties the two together.

pub mod call;
pub mod client;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod handshake;
pub mod service;
pub mod stream;

pub use call::CallClient;
pub use client::Client;
pub use config::ClientConfig;
pub use connection::Connection;
pub use connector::{connect_tcp, open_call_connection, open_stream_connection};
pub use error::{ClientError, RemoteError, Result};
pub use handshake::{handshake_rpc, handshake_stream, ClientIdentifier, IDENTIFIER_LEN};
pub use service::Krpc;
pub use stream::{MappedStream, StreamHandle, StreamMux};
