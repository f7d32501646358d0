use std::fmt;
use std::time::Duration;

use krpc_codec::schema::{self, ConnectionStatus};

/// An error reported by the server, either for one procedure call or for a
/// whole request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub service: String,
    pub name: String,
    pub description: String,
    pub stack_trace: String,
}

impl From<schema::Error> for RemoteError {
    fn from(err: schema::Error) -> Self {
        Self {
            service: err.service,
            name: err.name,
            description: err.description,
            stack_trace: err.stack_trace,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.service.is_empty() && self.name.is_empty() {
            return f.write_str(&self.description);
        }
        write!(f, "{}.{}: {}", self.service, self.name, self.description)
    }
}

impl std::error::Error for RemoteError {}

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Frame-level error. Fatal to the connection it occurred on.
    #[error("frame error: {0}")]
    Frame(#[from] krpc_frame::FrameError),

    /// A value did not match the shape it was decoded or encoded as.
    #[error("codec error: {0}")]
    Codec(#[from] krpc_codec::CodecError),

    /// A frame did not contain the protocol message expected at this point.
    #[error("protocol error: {0}")]
    Protocol(#[from] prost::DecodeError),

    /// The server answered the handshake with a non-OK status.
    #[error("handshake rejected ({status:?}): {message}")]
    HandshakeRejected {
        status: ConnectionStatus,
        message: String,
    },

    /// The handshake response was unusable.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A single procedure call failed on the server.
    #[error("remote call failed: {0}")]
    Remote(RemoteError),

    /// The server rejected the request as a whole.
    #[error("request failed: {0}")]
    Server(RemoteError),

    /// The response did not carry one result per call.
    #[error("response carried {received} results for {expected} calls")]
    ResponseMismatch { expected: usize, received: usize },

    /// An operation did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The client was configured without a stream connection.
    #[error("stream connection not enabled")]
    StreamsDisabled,

    /// The connection has been shut down.
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// Whether the connection the error occurred on can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Frame(_) | Self::Timeout(_) | Self::Closed | Self::Connect { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
