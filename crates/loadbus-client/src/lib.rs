//! The client runtime (spec §4.7): connect to a broker, perform the
//! `hello` handshake, and serve inbound commands while exposing
//! [`loadbus_rpc::CommandSink`] for outbound typed calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loadbus_rpc::{CommandSink, Interface};
use loadbus_wire::{encode_frame, error_codes, AgentId, AgentType, Frame, FrameDecoder, MsgId, ProtocolError};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

pub mod interfaces;
pub use interfaces::{RootInterface, RootProxy};

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection closed before the handshake completed")]
    HandshakeClosed,
    #[error("broker rejected the handshake: {0} (code {1})")]
    HandshakeRejected(String, u16),
}

/// Serves commands the broker routes to this client — through a
/// listener-flow or another agent's ACL-permitted call.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    async fn handle(&self, cmd: &str, args: Value) -> Result<Value, ProtocolError>;
}

/// A handler for clients that never expect to be called into.
pub struct NoCommands;

#[async_trait]
impl ClientHandler for NoCommands {
    async fn handle(&self, cmd: &str, _args: Value) -> Result<Value, ProtocolError> {
        Err(ProtocolError::CommandNotFound(cmd.to_owned()))
    }
}

type PendingReply = oneshot::Sender<Result<Value, (u16, String)>>;

/// One established connection to a broker. Implements
/// [`CommandSink`] so typed method proxies built on `loadbus-rpc` work
/// identically here and inside the broker's own local-agent loopback.
pub struct Client {
    agent_id: AgentId,
    write_half: Mutex<OwnedWriteHalf>,
    pending: Mutex<HashMap<MsgId, PendingReply>>,
    next_msg_id: AtomicU64,
}

impl Client {
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Builds a typed method-call proxy for `I`, addressed at `target`.
    /// The proxy shares this connection's `CommandSink`, so every call it
    /// makes goes through the same argument/result validation as a raw
    /// `call()` would.
    #[must_use]
    pub fn proxy<I: Interface>(self: &Arc<Self>, target: AgentId) -> I::Proxy {
        I::proxy(self.clone(), target)
    }

    /// Connects, sends `hello`, and waits for the broker to assign an
    /// agent-id before spawning the background reader task.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        agent_type: AgentType,
        agent_uuid: impl Into<String>,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<(Arc<Client>, JoinHandle<()>), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut read_half, mut write_half) = stream.into_split();

        let hello = Frame::Command {
            agent_id: AgentId::ROOT,
            id: MsgId(1),
            cmd: "hello".to_owned(),
            msg: json!({"agentType": agent_type.as_str(), "agentUuid": agent_uuid.into()}),
        };
        write_half.write_all(&encode_frame(&hello)?).await?;

        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let assigned_id = loop {
            let n = read_half.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::HandshakeClosed);
            }
            let frames = decoder.push(&buf[..n])?;
            let mut found = None;
            for frame in frames {
                match frame {
                    Frame::Response { response, .. } => {
                        let id = response.get("agentId").and_then(Value::as_u64).ok_or_else(|| {
                            ProtocolError::MessageFormat("hello response missing agentId".to_owned())
                        })?;
                        found = Some(AgentId(u32::try_from(id).unwrap_or(u32::MAX)));
                    }
                    Frame::Error { error, code, .. } => {
                        return Err(ClientError::HandshakeRejected(error, code));
                    }
                    Frame::Command { .. } => {}
                }
            }
            if let Some(id) = found {
                break id;
            }
        };

        let client = Arc::new(Client {
            agent_id: assigned_id,
            write_half: Mutex::new(write_half),
            pending: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU64::new(2),
        });

        let reader = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client.read_loop(read_half, decoder, handler).await;
            })
        };

        Ok((client, reader))
    }

    async fn read_loop(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        mut decoder: FrameDecoder,
        handler: Arc<dyn ClientHandler>,
    ) {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let frames = match decoder.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::warn!(error = %e, "connection buffer overflow, dropping connection");
                    break;
                }
            };
            for frame in frames {
                match frame {
                    Frame::Response { id, response, .. } => {
                        self.resolve(id, Ok(response)).await;
                    }
                    Frame::Error { id, error, code, .. } => {
                        self.resolve(id, Err((code, error))).await;
                    }
                    Frame::Command { id, cmd, msg, .. } => {
                        let this = Arc::clone(&self);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            let outcome = handler.handle(&cmd, msg).await;
                            this.reply(id, outcome).await;
                        });
                    }
                }
            }
        }
        tracing::info!(agent_id = %self.agent_id, "connection to broker closed");
    }

    async fn resolve(&self, id: MsgId, outcome: Result<Value, (u16, String)>) {
        if let Some(tx) = self.pending.lock().await.remove(&id) {
            let _ = tx.send(outcome);
        }
    }

    async fn reply(&self, id: MsgId, outcome: Result<Value, ProtocolError>) {
        let frame = match outcome {
            Ok(value) => Frame::Response {
                agent_id: self.agent_id,
                id,
                response: value,
            },
            Err(e) => Frame::Error {
                agent_id: self.agent_id,
                id,
                code: e.code(),
                error: e.to_string(),
            },
        };
        if let Err(e) = self.send_frame(&frame).await {
            tracing::warn!(error = %e, "failed to write reply frame");
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let bytes = encode_frame(frame)?;
        self.write_half.lock().await.write_all(&bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl CommandSink for Client {
    fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    async fn call(&self, target: AgentId, cmd: &str, args: Value) -> Result<Value, (u16, String)> {
        let id = MsgId(self.next_msg_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = Frame::Command {
            agent_id: target,
            id,
            cmd: cmd.to_owned(),
            msg: args,
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.pending.lock().await.remove(&id);
            return Err((error_codes::CONNECTION_ERROR, e.to_string()));
        }

        rx.await.unwrap_or_else(|_| {
            Err((
                error_codes::CONNECTION_ERROR,
                "connection closed before a reply arrived".to_owned(),
            ))
        })
    }
}
