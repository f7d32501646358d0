use bytes::Bytes;
use krpc_codec::schema::{ProcedureCall, ProcedureResult};
use krpc_codec::Unmarshal;
use tracing::{debug, info};

use crate::call::CallClient;
use crate::config::ClientConfig;
use crate::connector::{open_call_connection, open_stream_connection};
use crate::error::{ClientError, Result};
use crate::handshake::ClientIdentifier;
use crate::service::Krpc;
use crate::stream::{StreamHandle, StreamMux};

/// A connected kRPC client: the call connection plus, unless disabled, the
/// stream connection and its multiplexer.
pub struct Client {
    identifier: ClientIdentifier,
    calls: CallClient,
    streams: Option<StreamMux>,
}

impl Client {
    /// Connect and handshake both endpoints described by `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let (conn, identifier) = open_call_connection(
            &config.host,
            config.rpc_port,
            &config.client_name,
            config.handshake_timeout,
        )
        .await?;
        let calls = CallClient::new(conn).with_timeout(config.call_timeout);

        let streams = if config.rpc_only {
            None
        } else {
            let conn = open_stream_connection(
                &config.host,
                config.stream_port,
                &identifier,
                config.handshake_timeout,
            )
            .await?;
            Some(StreamMux::spawn(conn))
        };

        info!(
            host = %config.host,
            rpc_port = config.rpc_port,
            streams = streams.is_some(),
            "connected to kRPC server"
        );
        Ok(Self::from_parts(identifier, calls, streams))
    }

    /// Assemble a client from connections that have already completed their
    /// handshakes.
    pub fn from_parts(
        identifier: ClientIdentifier,
        calls: CallClient,
        streams: Option<StreamMux>,
    ) -> Self {
        Self {
            identifier,
            calls,
            streams,
        }
    }

    pub fn identifier(&self) -> &ClientIdentifier {
        &self.identifier
    }

    pub fn calls(&self) -> &CallClient {
        &self.calls
    }

    pub fn krpc(&self) -> Krpc<'_> {
        Krpc::new(&self.calls)
    }

    pub async fn call(
        &self,
        calls: Vec<ProcedureCall>,
        expect_response: bool,
    ) -> Result<Vec<ProcedureResult>> {
        self.calls.call(calls, expect_response).await
    }

    pub async fn call_one(&self, call: ProcedureCall) -> Result<Bytes> {
        self.calls.call_one(call).await
    }

    pub async fn invoke<T: Unmarshal>(&self, call: ProcedureCall) -> Result<T> {
        self.calls.invoke(call).await
    }

    /// Register `call` as a stream on the server and return its id.
    pub async fn add_stream(&self, call: &ProcedureCall) -> Result<u64> {
        let streams = self.streams()?;
        let id = self.krpc().add_stream(call, true).await?;
        streams.register(id);
        debug!(id, service = %call.service, procedure = %call.procedure, "stream added");
        Ok(id)
    }

    /// A new handle on stream `id`.
    pub fn get_stream(&self, id: u64) -> Result<StreamHandle> {
        Ok(self.streams()?.open(id))
    }

    /// Stop stream `id` locally and on the server.
    pub async fn remove_stream(&self, id: u64) -> Result<()> {
        self.streams()?.remove(id);
        self.krpc().remove_stream(id).await?;
        debug!(id, "stream removed");
        Ok(())
    }

    /// Add a stream for `call` and open a handle on it.
    pub async fn subscribe(&self, call: &ProcedureCall) -> Result<StreamHandle> {
        let id = self.add_stream(call).await?;
        self.get_stream(id)
    }

    /// Close `handle`, removing its stream from the server when no other
    /// handle on it remains.
    pub async fn release(&self, mut handle: StreamHandle) -> Result<()> {
        let id = handle.id();
        handle.close();
        if self.streams()?.handle_count(id) == 0 {
            self.remove_stream(id).await?;
        }
        Ok(())
    }

    /// Shut down both connections. Stream handles resolve to
    /// [`ClientError::Closed`]; later calls fail the same way.
    pub async fn close(&self) {
        if let Some(streams) = &self.streams {
            streams.shutdown().await;
        }
        self.calls.close().await;
    }

    fn streams(&self) -> Result<&StreamMux> {
        self.streams.as_ref().ok_or(ClientError::StreamsDisabled)
    }
}
