use std::time::Duration;

use bytes::Bytes;
use krpc_codec::schema::{ProcedureCall, ProcedureResult, Request, Response};
use krpc_codec::Unmarshal;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::{ClientError, Result};

/// Request/response client for the RPC connection.
///
/// The protocol has no request ids: a response belongs to whichever request
/// was sent before it. One lock therefore spans writing a request and
/// reading its response, so at most one round trip is in flight.
pub struct CallClient {
    state: Mutex<CallState>,
    timeout: Option<Duration>,
}

struct CallState {
    conn: Option<Connection>,
    /// Set while a round trip is between its write and its read.
    in_flight: bool,
}

impl CallState {
    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.shutdown().await {
                debug!(%err, "call connection shutdown failed");
            }
        }
    }
}

impl CallClient {
    pub fn new(conn: Connection) -> Self {
        Self {
            state: Mutex::new(CallState {
                conn: Some(conn),
                in_flight: false,
            }),
            timeout: None,
        }
    }

    /// Bound each round trip. On expiry the connection is closed, since a
    /// late response would be taken as the answer to the next request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `calls` as one request.
    ///
    /// With `expect_response` the matching response is read and its results
    /// returned in call order; per-call failures stay inside the results.
    /// Without it, the request is written and an empty list returned.
    pub async fn call(
        &self,
        calls: Vec<ProcedureCall>,
        expect_response: bool,
    ) -> Result<Vec<ProcedureResult>> {
        let mut state = self.state.lock().await;
        if state.in_flight {
            warn!("previous call was abandoned mid round trip; closing call connection");
            state.in_flight = false;
            state.close().await;
        }

        let CallState { conn, in_flight } = &mut *state;
        let Some(connection) = conn.as_mut() else {
            return Err(ClientError::Closed);
        };

        let request = Request { calls };
        let expected = request.calls.len();

        *in_flight = true;
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, round_trip(connection, &request, expect_response))
                .await
                .unwrap_or(Err(ClientError::Timeout(limit))),
            None => round_trip(connection, &request, expect_response).await,
        };
        *in_flight = false;

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                if err.is_fatal() {
                    warn!(%err, "call connection failed; closing");
                    state.close().await;
                }
                return Err(err);
            }
        };

        let Some(response) = response else {
            return Ok(Vec::new());
        };
        if let Some(error) = response.error {
            return Err(ClientError::Server(error.into()));
        }
        if response.results.len() != expected {
            return Err(ClientError::ResponseMismatch {
                expected,
                received: response.results.len(),
            });
        }
        Ok(response.results)
    }

    /// Make a single call and return its raw value, turning a per-call
    /// failure into [`ClientError::Remote`].
    pub async fn call_one(&self, call: ProcedureCall) -> Result<Bytes> {
        let mut results = self.call(vec![call], true).await?;
        let result = results.pop().ok_or(ClientError::ResponseMismatch {
            expected: 1,
            received: 0,
        })?;
        match result.error {
            Some(error) => Err(ClientError::Remote(error.into())),
            None => Ok(result.value),
        }
    }

    /// Make a single call and decode its value as `T`.
    pub async fn invoke<T: Unmarshal>(&self, call: ProcedureCall) -> Result<T> {
        let value = self.call_one(call).await?;
        Ok(T::unmarshal(&value)?)
    }

    /// Close the connection. Later calls fail with [`ClientError::Closed`].
    pub async fn close(&self) {
        self.state.lock().await.close().await;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.conn.is_none()
    }
}

async fn round_trip(
    conn: &mut Connection,
    request: &Request,
    expect_response: bool,
) -> Result<Option<Response>> {
    conn.send(request).await?;
    trace!(calls = request.calls.len(), expect_response, "sent request");
    if !expect_response {
        return Ok(None);
    }
    let response: Response = conn.recv().await?;
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use krpc_codec::schema::{self, Argument};
    use krpc_codec::{marshal, unmarshal};

    use super::*;

    fn client_and_server() -> (CallClient, Connection) {
        let (client, server) = tokio::io::duplex(4096);
        (
            CallClient::new(Connection::from_stream(client)),
            Connection::from_stream(server),
        )
    }

    fn value(bytes: Bytes) -> ProcedureResult {
        ProcedureResult { error: None, value: bytes }
    }

    fn failure(name: &str) -> ProcedureResult {
        ProcedureResult {
            error: Some(schema::Error {
                service: "S".into(),
                name: name.into(),
                description: "it broke".into(),
                stack_trace: String::new(),
            }),
            value: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn single_call_decodes_uint64() {
        let (client, mut server) = client_and_server();
        let server = tokio::spawn(async move {
            let request: Request = server.recv().await.expect("request should arrive");
            assert_eq!(request.calls.len(), 1);
            assert_eq!(request.calls[0].service, "S");
            assert_eq!(request.calls[0].procedure, "P");
            assert!(request.calls[0].arguments.is_empty());
            let response = Response {
                error: None,
                results: vec![value(marshal(&42u64))],
            };
            server.send(&response).await.expect("response should send");
        });

        let result: u64 = client
            .invoke(ProcedureCall::new("S", "P"))
            .await
            .expect("call should succeed");
        assert_eq!(result, 42);
        server.await.expect("server should finish");
    }

    #[tokio::test]
    async fn batch_keeps_order_and_isolates_failures() {
        let (client, mut server) = client_and_server();
        let server = tokio::spawn(async move {
            let request: Request = server.recv().await.expect("request should arrive");
            let procedures: Vec<&str> =
                request.calls.iter().map(|c| c.procedure.as_str()).collect();
            assert_eq!(procedures, ["A", "B", "C"]);
            let response = Response {
                error: None,
                results: vec![
                    value(marshal(&1i32)),
                    failure("Boom"),
                    value(marshal(&3i32)),
                ],
            };
            server.send(&response).await.expect("response should send");
        });

        let calls = ["A", "B", "C"]
            .into_iter()
            .map(|p| ProcedureCall::new("S", p))
            .collect();
        let results = client.call(calls, true).await.expect("batch should succeed");
        assert_eq!(results.len(), 3);
        assert_eq!(unmarshal::<i32>(&results[0].value).unwrap(), 1);
        assert_eq!(results[1].error.as_ref().map(|e| e.name.as_str()), Some("Boom"));
        assert_eq!(unmarshal::<i32>(&results[2].value).unwrap(), 3);
        server.await.expect("server should finish");
    }

    #[tokio::test]
    async fn call_one_surfaces_remote_error() {
        let (client, mut server) = client_and_server();
        let server = tokio::spawn(async move {
            let _: Request = server.recv().await.expect("request should arrive");
            let response = Response {
                error: None,
                results: vec![failure("InvalidOperationException")],
            };
            server.send(&response).await.expect("response should send");
        });

        let err = client.call_one(ProcedureCall::new("S", "P")).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref e) if e.name == "InvalidOperationException"));
        assert!(!client.is_closed().await);
        server.await.expect("server should finish");
    }

    #[tokio::test]
    async fn request_level_error_is_server_error() {
        let (client, mut server) = client_and_server();
        let server = tokio::spawn(async move {
            let _: Request = server.recv().await.expect("request should arrive");
            let response = Response {
                error: Some(schema::Error {
                    description: "Malformed request".into(),
                    ..schema::Error::default()
                }),
                results: vec![],
            };
            server.send(&response).await.expect("response should send");
        });

        let err = client.call(vec![ProcedureCall::new("S", "P")], true).await.unwrap_err();
        assert!(matches!(err, ClientError::Server(ref e) if e.description == "Malformed request"));
        server.await.expect("server should finish");
    }

    #[tokio::test]
    async fn result_count_mismatch() {
        let (client, mut server) = client_and_server();
        let server = tokio::spawn(async move {
            let _: Request = server.recv().await.expect("request should arrive");
            server
                .send(&Response::default())
                .await
                .expect("response should send");
        });

        let calls = vec![ProcedureCall::new("S", "A"), ProcedureCall::new("S", "B")];
        let err = client.call(calls, true).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ResponseMismatch { expected: 2, received: 0 }
        ));
        server.await.expect("server should finish");
    }

    #[tokio::test]
    async fn fire_and_forget_does_not_read() {
        let (client, mut server) = client_and_server();

        let call = ProcedureCall::new("S", "P").with_argument(marshal(&true));
        let results = client.call(vec![call], false).await.expect("send should succeed");
        assert!(results.is_empty());

        let request: Request = server.recv().await.expect("request should arrive");
        assert_eq!(
            request.calls[0].arguments,
            [Argument {
                position: 0,
                value: marshal(&true)
            }]
        );
    }

    #[tokio::test]
    async fn concurrent_calls_are_serialized() {
        let (client, mut server) = client_and_server();
        let client = std::sync::Arc::new(client);

        // Echo each request's argument back, one request at a time.
        let server = tokio::spawn(async move {
            for _ in 0..16 {
                let request: Request = server.recv().await.expect("request should arrive");
                let arg = request.calls[0].arguments[0].value.clone();
                tokio::task::yield_now().await;
                let response = Response {
                    error: None,
                    results: vec![value(arg)],
                };
                server.send(&response).await.expect("response should send");
            }
        });

        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let call = ProcedureCall::new("S", "Echo").with_argument(marshal(&i));
                let echoed: u32 = client.invoke(call).await.expect("call should succeed");
                assert_eq!(echoed, i);
            }));
        }
        for task in tasks {
            task.await.expect("caller should finish");
        }
        server.await.expect("server should finish");
    }

    #[tokio::test]
    async fn server_hangup_closes_connection() {
        let (client, server) = client_and_server();
        drop(server);

        let err = client.call_one(ProcedureCall::new("S", "P")).await.unwrap_err();
        assert!(matches!(err, ClientError::Frame(_)));
        assert!(client.is_closed().await);

        let err = client.call_one(ProcedureCall::new("S", "P")).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn timeout_tears_down_connection() {
        let (client, server) = client_and_server();
        let client = client.with_timeout(Some(Duration::from_millis(50)));

        let err = client.call_one(ProcedureCall::new("S", "P")).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        assert!(client.is_closed().await);
        drop(server);
    }

    #[tokio::test]
    async fn abandoned_call_poisons_connection() {
        let (client, _server): (CallClient, Connection) = client_and_server();

        // Drop the call while it waits for a response that never comes.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            client.call_one(ProcedureCall::new("S", "P")),
        )
        .await;
        assert!(abandoned.is_err());

        let err = client.call_one(ProcedureCall::new("S", "P")).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn explicit_close() {
        let (client, _server) = client_and_server();
        client.close().await;
        client.close().await;
        assert!(matches!(
            client.call(vec![], false).await,
            Err(ClientError::Closed)
        ));
    }

    #[allow(dead_code)]
    fn call_future_is_send(client: &CallClient) -> impl std::future::Future + Send + '_ {
        client.call_one(ProcedureCall::new("S", "P"))
    }
}
