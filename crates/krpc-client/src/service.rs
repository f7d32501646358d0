use bytes::Bytes;
use krpc_codec::marshal;
use krpc_codec::schema::{self, ProcedureCall, Services, Status};

use crate::call::CallClient;
use crate::error::Result;

const SERVICE: &str = "KRPC";

/// The server's built-in `KRPC` service.
#[derive(Clone, Copy)]
pub struct Krpc<'a> {
    client: &'a CallClient,
}

impl<'a> Krpc<'a> {
    pub fn new(client: &'a CallClient) -> Self {
        Self { client }
    }

    pub async fn get_status(&self) -> Result<Status> {
        self.client.invoke(procedure("GetStatus")).await
    }

    pub async fn get_services(&self) -> Result<Services> {
        self.client.invoke(procedure("GetServices")).await
    }

    pub async fn get_client_id(&self) -> Result<Bytes> {
        self.client.invoke(procedure("GetClientID")).await
    }

    pub async fn get_client_name(&self) -> Result<String> {
        self.client.invoke(procedure("GetClientName")).await
    }

    /// Ask the server to re-evaluate `call` continuously and return the id
    /// of the resulting stream. Identical calls share one id.
    pub async fn add_stream(&self, call: &ProcedureCall, start: bool) -> Result<u64> {
        let request = procedure("AddStream")
            .with_argument(marshal(call))
            .with_argument(marshal(&start));
        let stream: schema::Stream = self.client.invoke(request).await?;
        Ok(stream.id)
    }

    /// Start a stream added with `start = false`.
    pub async fn start_stream(&self, id: u64) -> Result<()> {
        self.client
            .invoke(procedure("StartStream").with_argument(marshal(&id)))
            .await
    }

    /// Limit how often the server sends updates for `id`, in Hz.
    pub async fn set_stream_rate(&self, id: u64, rate: f32) -> Result<()> {
        let request = procedure("SetStreamRate")
            .with_argument(marshal(&id))
            .with_argument(marshal(&rate));
        self.client.invoke(request).await
    }

    pub async fn remove_stream(&self, id: u64) -> Result<()> {
        self.client
            .invoke(procedure("RemoveStream").with_argument(marshal(&id)))
            .await
    }
}

fn procedure(name: &str) -> ProcedureCall {
    ProcedureCall::new(SERVICE, name)
}
