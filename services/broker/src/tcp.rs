//! Bridges `loadbus-core`'s connection/routing model to a real TCP socket:
//! the [`loadbus_core::FrameSink`] write side, and the accept-loop/read-loop
//! that feeds inbound bytes into [`Broker::process_message`].
//!
//! Mirrors the teacher's per-socket task shape (`handle_forwarder_socket`
//! spawned once per accepted WS upgrade) over a raw framed TCP stream
//! instead of a WebSocket.

use std::sync::Arc;

use async_trait::async_trait;
use loadbus_core::{Broker, FrameSink};
use loadbus_wire::{encode_frame, Frame, FrameDecoder, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

const READ_BUFFER_SIZE: usize = 4096;

pub struct TcpFrameSink {
    write_half: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send(&self, frame: Frame) -> Result<(), ProtocolError> {
        let bytes = encode_frame(&frame)?;
        self.write_half
            .lock()
            .await
            .write_all(&bytes)
            .await
            .map_err(|e| ProtocolError::ConnectionError(e.to_string()))
    }
}

/// Accepts connections forever, spawning one task per socket. Returns only
/// if the listener itself fails to accept repeatedly is not handled here —
/// individual accept errors are logged and the loop continues.
pub async fn accept_loop(broker: Arc<Broker>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move {
                    handle_connection(broker, stream, addr.to_string()).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept error");
            }
        }
    }
}

/// Owns one accepted socket for its whole lifetime: registers it with the
/// broker, feeds inbound frames to `process_message` until EOF or a codec
/// error, then marks the connection disconnected for the next cleanup tick.
pub async fn handle_connection(broker: Arc<Broker>, stream: TcpStream, peer_addr: String) {
    let (mut read_half, write_half) = stream.into_split();
    let sink = Arc::new(TcpFrameSink {
        write_half: Mutex::new(write_half),
    });
    let conn = broker.register_remote(peer_addr.clone(), sink).await;
    let agent_id = conn.agent_id;
    tracing::info!(%agent_id, endpoint = %peer_addr, "connection accepted");

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%agent_id, error = %e, "read error");
                break;
            }
        };
        let frames = match decoder.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(%agent_id, error = %e, "frame decode error, dropping connection");
                break;
            }
        };
        for frame in frames {
            broker.process_message(agent_id, frame).await;
        }
    }

    broker.disconnect(agent_id).await;
    tracing::info!(%agent_id, "connection closed");
}
