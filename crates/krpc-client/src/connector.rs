use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::handshake::{handshake_rpc, handshake_stream, ClientIdentifier};

/// Dial `host:port`.
pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;
    // Calls are small request/response pairs; batching them only adds latency.
    stream
        .set_nodelay(true)
        .map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;

    debug!(%addr, "connected");
    Ok(stream)
}

/// Dial the RPC endpoint and perform its handshake.
///
/// `timeout` bounds the dial and the handshake together.
pub async fn open_call_connection(
    host: &str,
    port: u16,
    client_name: &str,
    timeout: Duration,
) -> Result<(Connection, ClientIdentifier)> {
    with_timeout(timeout, async {
        let mut conn = Connection::from_tcp(connect_tcp(host, port).await?);
        let identifier = handshake_rpc(&mut conn, client_name).await?;
        Ok((conn, identifier))
    })
    .await
}

/// Dial the stream endpoint and bind it to `identifier`.
pub async fn open_stream_connection(
    host: &str,
    port: u16,
    identifier: &ClientIdentifier,
    timeout: Duration,
) -> Result<Connection> {
    with_timeout(timeout, async {
        let mut conn = Connection::from_tcp(connect_tcp(host, port).await?);
        handshake_stream(&mut conn, identifier).await?;
        Ok(conn)
    })
    .await
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ClientError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use krpc_codec::schema::{ConnectionRequest, ConnectionResponse};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn connect_refused_reports_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let port = listener.local_addr().expect("listener has an address").port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { ref addr, .. } if addr.ends_with(&port.to_string())));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let port = listener.local_addr().expect("listener has an address").port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept should succeed");
            // Hold the socket open without answering.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let limit = Duration::from_millis(100);
        let err = open_call_connection("127.0.0.1", port, "test-client", limit)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(d) if d == limit));
        server.abort();
    }

    #[tokio::test]
    async fn call_then_stream_handshake_over_tcp() {
        let rpc = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let stream = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let rpc_port = rpc.local_addr().expect("listener has an address").port();
        let stream_port = stream.local_addr().expect("listener has an address").port();

        let server = tokio::spawn(async move {
            let (socket, _) = rpc.accept().await.expect("accept should succeed");
            let mut conn = Connection::from_tcp(socket);
            let _: ConnectionRequest = conn.recv().await.expect("request should arrive");
            conn.send(&ConnectionResponse {
                client_identifier: vec![9u8; 16].into(),
                ..ConnectionResponse::default()
            })
            .await
            .expect("response should send");

            let (socket, _) = stream.accept().await.expect("accept should succeed");
            let mut streams = Connection::from_tcp(socket);
            let request: ConnectionRequest = streams.recv().await.expect("request should arrive");
            assert_eq!(request.client_identifier.as_ref(), &[9u8; 16]);
            streams
                .send(&ConnectionResponse::default())
                .await
                .expect("response should send");
            (conn, streams)
        });

        let timeout = Duration::from_secs(5);
        let (_calls, identifier) = open_call_connection("127.0.0.1", rpc_port, "test-client", timeout)
            .await
            .expect("call connection should open");
        let _streams = open_stream_connection("127.0.0.1", stream_port, &identifier, timeout)
            .await
            .expect("stream connection should open");
        server.await.expect("server should finish");
    }
}
