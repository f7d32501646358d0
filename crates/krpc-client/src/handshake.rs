use std::fmt;

use bytes::Bytes;
use krpc_codec::schema::{ConnectionRequest, ConnectionResponse, ConnectionStatus, ConnectionType};
use tracing::debug;

use crate::connection::Connection;
use crate::error::{ClientError, Result};

/// Length of the identity token issued by the RPC handshake.
pub const IDENTIFIER_LEN: usize = 16;

/// The 16-byte token that ties a stream connection to its RPC connection.
///
/// Treated as credential material and redacted in debug output.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentifier([u8; IDENTIFIER_LEN]);

impl ClientIdentifier {
    pub const fn new(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let token: [u8; IDENTIFIER_LEN] = bytes.try_into().map_err(|_| {
            ClientError::HandshakeFailed(format!(
                "client identifier must be {IDENTIFIER_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(token))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }
}

impl fmt::Debug for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientIdentifier")
            .field(&format_args!("<redacted:{IDENTIFIER_LEN} bytes>"))
            .finish()
    }
}

/// Perform the RPC handshake and return the identity the server issued.
pub async fn handshake_rpc(conn: &mut Connection, client_name: &str) -> Result<ClientIdentifier> {
    let request = ConnectionRequest {
        connection_type: ConnectionType::Rpc as i32,
        client_name: client_name.to_string(),
        client_identifier: Bytes::new(),
    };
    let response = exchange(conn, &request).await?;
    let identifier = ClientIdentifier::from_slice(&response.client_identifier)?;

    debug!(client_name, "rpc handshake complete");
    Ok(identifier)
}

/// Perform the STREAM handshake for the client identified by `identifier`.
pub async fn handshake_stream(conn: &mut Connection, identifier: &ClientIdentifier) -> Result<()> {
    let request = ConnectionRequest {
        connection_type: ConnectionType::Stream as i32,
        client_name: String::new(),
        client_identifier: Bytes::copy_from_slice(identifier.as_bytes()),
    };
    exchange(conn, &request).await?;

    debug!("stream handshake complete");
    Ok(())
}

async fn exchange(conn: &mut Connection, request: &ConnectionRequest) -> Result<ConnectionResponse> {
    conn.send(request).await?;
    let response: ConnectionResponse = conn.recv().await?;

    match ConnectionStatus::try_from(response.status) {
        Ok(ConnectionStatus::Ok) => Ok(response),
        Ok(status) => Err(ClientError::HandshakeRejected {
            status,
            message: response.message,
        }),
        Err(_) => Err(ClientError::HandshakeFailed(format!(
            "unknown connection status {}",
            response.status
        ))),
    }
}
