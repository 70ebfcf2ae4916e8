//! # Cloud Socket Transport
//!
//! Uplink through the cellular provider's cloud socket.
//!
//! Each send opens a short-lived TCP connection, writes a JSON envelope
//! `{"k": <device key>, "d": <payload>, "t": [<topic>]}` and reads the
//! acknowledgement `[0,0]`. Inbound messages arrive on the modem-side receive
//! socket, one message per connection.

use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Topic, Transport};
use crate::config::TransportConfig;
use crate::error::{Result, TrackerError};

/// Largest acknowledgement we bother reading
const MAX_ACK_BYTES: u64 = 256;

/// Inbound messages buffered before the accept loop applies backpressure
const INBOUND_QUEUE_DEPTH: usize = 16;

#[derive(Serialize)]
struct Envelope<'a> {
    k: &'a str,
    d: Cow<'a, str>,
    t: [&'a str; 1],
}

/// Cloud socket uplink
pub struct CloudTransport {
    config: TransportConfig,
}

impl std::fmt::Debug for CloudTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudTransport")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

impl CloudTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.config.send_timeout_ms)
    }

    async fn exchange(&self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        stream.write_all(body).await?;
        stream.shutdown().await?;

        let mut response = Vec::new();
        stream.take(MAX_ACK_BYTES).read_to_end(&mut response).await?;
        Ok(response)
    }
}

/// Build the JSON envelope for one payload
fn envelope(device_key: &str, payload: &[u8], topic: Topic) -> Result<Vec<u8>> {
    let envelope = Envelope {
        k: device_key,
        d: String::from_utf8_lossy(payload),
        t: [topic.as_str()],
    };
    serde_json::to_vec(&envelope)
        .map_err(|e| TrackerError::Transport(format!("Failed to build envelope: {}", e)))
}

/// Check the cloud acknowledgement; the first element is the result code
fn check_ack(response: &[u8]) -> Result<()> {
    let codes: Vec<serde_json::Value> = serde_json::from_slice(response).map_err(|_| {
        TrackerError::Transport(format!(
            "Unexpected acknowledgement: {}",
            String::from_utf8_lossy(response)
        ))
    })?;

    match codes.first().and_then(serde_json::Value::as_i64) {
        Some(0) => Ok(()),
        Some(code) => Err(TrackerError::Transport(format!("Cloud rejected message (code {})", code))),
        None => Err(TrackerError::Transport("Empty acknowledgement".to_string())),
    }
}

#[async_trait::async_trait]
impl Transport for CloudTransport {
    async fn send(&self, payload: &[u8], topic: Topic) -> Result<()> {
        let body = envelope(&self.config.device_key, payload, topic)?;

        let response = tokio::time::timeout(self.send_timeout(), self.exchange(&body))
            .await
            .map_err(|_| TrackerError::Transport(format!("Send timed out after {:?}", self.send_timeout())))?
            .map_err(|e| TrackerError::Transport(format!("Send failed: {}", e)))?;

        check_ack(&response)?;
        debug!("Sent {} bytes on topic {}", payload.len(), topic);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>> {
        if self.config.receive_bind.is_empty() {
            return Err(TrackerError::Transport("Receive socket disabled".to_string()));
        }

        let listener = TcpListener::bind(&self.config.receive_bind)
            .await
            .map_err(|e| TrackerError::Transport(format!("Failed to bind {}: {}", self.config.receive_bind, e)))?;
        info!("Listening for inbound messages on {}", self.config.receive_bind);

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let max_bytes = self.config.max_message_bytes;
        let read_timeout = self.send_timeout();
        tokio::spawn(accept_loop(listener, tx, max_bytes, read_timeout));

        Ok(rx)
    }
}

/// Accept inbound connections until the subscriber goes away
async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Vec<u8>>,
    max_bytes: usize,
    read_timeout: Duration,
) {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept inbound connection: {}", e);
                    continue;
                }
            },
            _ = tx.closed() => break,
        };

        let mut message = Vec::new();
        let mut limited = stream.take(max_bytes as u64);
        let read = limited.read_to_end(&mut message);
        match tokio::time::timeout(read_timeout, read).await {
            Ok(Ok(_)) if !message.is_empty() => {
                debug!("Received {} bytes from {}", message.len(), peer);
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(Ok(_)) => debug!("Empty inbound connection from {}", peer),
            Ok(Err(e)) => warn!("Failed to read inbound message from {}: {}", peer, e),
            Err(_) => warn!("Inbound message from {} timed out", peer),
        }
    }

    debug!("Inbound accept loop stopped");
}
