//! Core-side IPC client.
//!
//! Requests carry their own ids; the response stream is demultiplexed
//! through a correlation table, so out-of-order delivery is fine. Each
//! call has a deadline (default 30 s) surfaced as a local timeout — the
//! gateway may still complete and audit the underlying work. Transport
//! errors retry a bounded number of times with exponential backoff.

use crate::frame::{write_frame, FrameReader};
use crate::{IpcError, IpcResult};
use parking_lot::Mutex;
use semblance_proto::{ActionRequest, ActionResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Retries for transport-class failures.
    pub max_retries: u32,
    /// First backoff; doubles per attempt.
    pub base_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
        }
    }
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<ActionResponse>>>>;

/// Handle to the gateway over one established stream.
#[derive(Clone)]
pub struct CoreClient {
    outgoing: mpsc::Sender<Vec<u8>>,
    pending: Pending,
    config: ClientConfig,
}

impl CoreClient {
    /// Connect over the per-user Unix socket.
    pub async fn connect_unix(path: &std::path::Path, config: ClientConfig) -> IpcResult<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::spawn(stream, config))
    }

    /// Drive an arbitrary byte stream — tests use in-memory pipes.
    pub fn spawn<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (outgoing, mut outgoing_rx) = mpsc::channel::<Vec<u8>>(32);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(bytes) = outgoing_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &bytes).await {
                    warn!(error = %e, "ipc write failed, writer stopping");
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut reader = FrameReader::new(read_half);
            loop {
                match reader.next_frame().await {
                    Ok(Some(frame)) => {
                        let response: ActionResponse = match serde_json::from_slice(&frame) {
                            Ok(response) => response,
                            Err(e) => {
                                warn!(error = %e, "discarding unparseable response frame");
                                continue;
                            }
                        };
                        let waiter = reader_pending.lock().remove(&response.request_id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                // Late response after a local timeout.
                                debug!(request_id = %response.request_id, "uncorrelated response");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("gateway closed the stream");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "ipc read failed, reader stopping");
                        break;
                    }
                }
            }
            // Wake every in-flight caller with a disconnect.
            reader_pending.lock().clear();
        });

        Self {
            outgoing,
            pending,
            config,
        }
    }

    /// Send one signed request and await its response.
    pub async fn call(&self, request: &ActionRequest) -> IpcResult<ActionResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request.id.clone(), tx);

        let bytes = serde_json::to_vec(request)?;
        if self.outgoing.send(bytes).await.is_err() {
            self.forget(&request.id);
            return Err(IpcError::Disconnected);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.forget(&request.id);
                Err(IpcError::Disconnected)
            }
            Err(_) => {
                self.forget(&request.id);
                Err(IpcError::Timeout)
            }
        }
    }

    /// [`call`](Self::call) with bounded retries on transport errors.
    pub async fn call_with_retry(&self, request: &ActionRequest) -> IpcResult<ActionResponse> {
        let mut backoff = self.config.base_backoff;
        let mut last = None;

        for attempt in 0..=self.config.max_retries {
            match self.call(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.code().is_retryable() && attempt < self.config.max_retries => {
                    warn!(
                        request_id = %request.id,
                        attempt = attempt + 1,
                        error = %e,
                        "transport error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(IpcError::Disconnected))
    }

    fn forget(&self, request_id: &str) {
        self.pending.lock().remove(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use semblance_proto::ActionType;
    use serde_json::json;

    fn request(id: &str) -> ActionRequest {
        ActionRequest {
            id: id.to_string(),
            timestamp: Utc::now(),
            action: ActionType::EmailFetch,
            payload: json!({}),
            source: "core".to_string(),
            signature: "sig".to_string(),
        }
    }

    /// A fake gateway that answers requests with a caller-provided order.
    async fn fake_gateway<S>(stream: S, reorder: bool)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let mut held: Vec<ActionResponse> = Vec::new();

        while let Ok(Some(frame)) = reader.next_frame().await {
            let raw: serde_json::Value = serde_json::from_slice(&frame).expect("json");
            let id = raw["id"].as_str().expect("id").to_string();
            let response = ActionResponse::success(&id, json!({"ok": true}), "audit-1");

            if reorder {
                held.push(response);
                if held.len() == 2 {
                    // Answer in reverse arrival order.
                    for response in held.drain(..).rev() {
                        let bytes = serde_json::to_vec(&response).expect("serialize");
                        write_frame(&mut write_half, &bytes).await.expect("write");
                    }
                }
            } else {
                let bytes = serde_json::to_vec(&response).expect("serialize");
                write_frame(&mut write_half, &bytes).await.expect("write");
            }
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (client_stream, server_stream) = tokio::io::duplex(4096);
        tokio::spawn(fake_gateway(server_stream, false));

        let client = CoreClient::spawn(client_stream, ClientConfig::default());
        let response = client.call(&request("req-1")).await.expect("call");
        assert_eq!(response.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_out_of_order_responses_correlate() {
        let (client_stream, server_stream) = tokio::io::duplex(4096);
        tokio::spawn(fake_gateway(server_stream, true));

        let client = CoreClient::spawn(client_stream, ClientConfig::default());
        let c1 = client.clone();
        let c2 = client.clone();
        let req_a = request("req-a");
        let req_b = request("req-b");
        let (r1, r2) = tokio::join!(c1.call(&req_a), c2.call(&req_b));
        assert_eq!(r1.expect("r1").request_id, "req-a");
        assert_eq!(r2.expect("r2").request_id, "req-b");
    }

    #[tokio::test]
    async fn test_timeout_surfaces_locally() {
        // A gateway that never answers.
        let (client_stream, server_stream) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (read_half, _write_half) = tokio::io::split(server_stream);
            let mut reader = FrameReader::new(read_half);
            while let Ok(Some(_)) = reader.next_frame().await {}
        });

        let client = CoreClient::spawn(
            client_stream,
            ClientConfig {
                request_timeout: Duration::from_millis(50),
                max_retries: 0,
                base_backoff: Duration::from_millis(1),
            },
        );
        let err = client.call(&request("req-slow")).await.unwrap_err();
        assert!(matches!(err, IpcError::Timeout));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_surfaces_last_error() {
        let (client_stream, server_stream) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (read_half, _write_half) = tokio::io::split(server_stream);
            let mut reader = FrameReader::new(read_half);
            while let Ok(Some(_)) = reader.next_frame().await {}
        });

        let client = CoreClient::spawn(
            client_stream,
            ClientConfig {
                request_timeout: Duration::from_millis(20),
                max_retries: 2,
                base_backoff: Duration::from_millis(1),
            },
        );

        let started = std::time::Instant::now();
        let err = client.call_with_retry(&request("req-retry")).await.unwrap_err();
        assert!(matches!(err, IpcError::Timeout));
        // Three attempts (initial + 2 retries) must have run.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_disconnect_wakes_callers() {
        let (client_stream, server_stream) = tokio::io::duplex(4096);
        let client = CoreClient::spawn(client_stream, ClientConfig::default());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call(&request("req-gone")).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(server_stream);

        let err = call.await.expect("join").unwrap_err();
        assert!(matches!(err, IpcError::Disconnected));
    }
}
