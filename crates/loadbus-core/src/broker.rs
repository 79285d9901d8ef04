//! The broker routing engine (spec §4.5): the connection table, the
//! listener-flow/listener-agent lists, the shared rewrite-id generator,
//! and the command/response routing algorithm itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loadbus_rpc::{CallContext, CommandSink};
use loadbus_wire::{error_codes, AgentId, AgentType, Frame, MsgId, ProtocolError};
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};

use crate::agent::{LocalAgent, ListenerAgent};
use crate::connection::{Connection, Endpoint, FrameSink};
use crate::flow::{Flow, ListenerFlow};
use crate::state::{AuthLevel, ConnState};

pub struct ConnectionSnapshot {
    pub agent_id: AgentId,
    pub agent_type: Option<AgentType>,
    pub agent_uuid: Option<String>,
    pub state: ConnState,
    pub endpoint: String,
    pub auth_level: AuthLevel,
}

pub struct Broker {
    connections: RwLock<HashMap<AgentId, Arc<Connection>>>,
    listener_flows: RwLock<Vec<ListenerFlow>>,
    listener_agents: RwLock<Vec<ListenerAgent>>,
    msg_counter: AtomicU64,
    next_remote_agent_id: AtomicU32,
    master_key: String,
}

impl Broker {
    #[must_use]
    pub fn new(master_key: String) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            listener_flows: RwLock::new(Vec::new()),
            listener_agents: RwLock::new(Vec::new()),
            msg_counter: AtomicU64::new(1),
            next_remote_agent_id: AtomicU32::new(AgentId::FIRST_REMOTE.0),
            master_key,
        }
    }

    #[must_use]
    pub fn master_key(&self) -> &str {
        &self.master_key
    }

    fn next_msg_id(&self) -> MsgId {
        MsgId(self.msg_counter.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn register_local_agent(&self, agent: Arc<dyn LocalAgent>) -> Arc<Connection> {
        let conn = Arc::new(Connection::new_local(agent));
        self.connections.write().await.insert(conn.agent_id, conn.clone());
        conn
    }

    pub async fn register_remote(
        &self,
        endpoint_str: String,
        sink: Arc<dyn FrameSink>,
    ) -> Arc<Connection> {
        let id = AgentId(self.next_remote_agent_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new_remote(id, endpoint_str, sink));
        self.connections.write().await.insert(id, conn.clone());
        conn
    }

    pub async fn get(&self, agent_id: AgentId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&agent_id).cloned()
    }

    pub async fn add_listener_flow(&self, rule: ListenerFlow) {
        self.listener_flows.write().await.push(rule);
    }

    pub async fn add_listener_agent(&self, listener: ListenerAgent) {
        self.listener_agents.write().await.push(listener);
    }

    /// Called once a peer's `hello` has bound its type/uuid, firing any
    /// registration listeners subscribed to that peer type.
    pub async fn notify_register(&self, agent_id: AgentId) {
        let Some(conn) = self.get(agent_id).await else {
            return;
        };
        let Some(peer_type) = conn.peer_type().await else {
            return;
        };
        for listener in self.listener_agents.read().await.iter() {
            listener.notify_register(&peer_type, agent_id);
        }
    }

    async fn notify_disconnect_for(&self, agent_id: AgentId, peer_type: &AgentType) {
        for listener in self.listener_agents.read().await.iter() {
            listener.notify_disconnect(peer_type, agent_id);
        }
    }

    pub async fn disconnect(&self, agent_id: AgentId) {
        if let Some(conn) = self.get(agent_id).await {
            conn.set_state(ConnState::Disconnected).await;
        }
    }

    /// Periodic sweep (spec §4.5 Cleanup): removes DISCONNECTED entries
    /// from the connection table and fires disconnect listeners.
    /// Idempotent: a second run with no new disconnects is a no-op.
    pub async fn cleanup_tick(&self) {
        let mut dead = Vec::new();
        {
            let connections = self.connections.read().await;
            for (agent_id, conn) in connections.iter() {
                if conn.state().await == ConnState::Disconnected {
                    dead.push(*agent_id);
                }
            }
        }
        for agent_id in dead {
            let removed = self.connections.write().await.remove(&agent_id);
            if let Some(conn) = removed {
                if let Some(peer_type) = conn.peer_type().await {
                    self.notify_disconnect_for(agent_id, &peer_type).await;
                }
                tracing::info!(%agent_id, "cleaned up disconnected connection");
            }
        }
    }

    pub async fn snapshot_all(&self) -> Vec<ConnectionSnapshot> {
        let connections = self.connections.read().await;
        let mut out = Vec::with_capacity(connections.len());
        for conn in connections.values() {
            out.push(ConnectionSnapshot {
                agent_id: conn.agent_id,
                agent_type: conn.peer_type().await,
                agent_uuid: conn.peer_uuid().await,
                state: conn.state().await,
                endpoint: conn.endpoint_str.clone(),
                auth_level: conn.auth_level().await,
            });
        }
        out
    }

    /// Entry point for every inbound frame, whether it arrived over a real
    /// socket or was emitted by a local agent's own outbound call.
    pub async fn process_message(self: &Arc<Self>, src_agent_id: AgentId, frame: Frame) {
        let Some(src_conn) = self.get(src_agent_id).await else {
            tracing::warn!(%src_agent_id, "process_message from an unregistered connection");
            return;
        };

        let state = src_conn.state().await;
        if !state.can_exchange_frames() {
            if let Frame::Command { id, .. } = &frame {
                self.send_error(
                    &src_conn,
                    *id,
                    ProtocolError::InvalidState(format!("connection is {state}")),
                )
                .await;
            }
            return;
        }

        match frame {
            Frame::Command {
                agent_id: dst_agent_id,
                id: src_msg_id,
                cmd,
                msg,
            } => {
                self.route_command(src_conn, dst_agent_id, src_msg_id, cmd, msg)
                    .await;
            }
            Frame::Response { id, response, .. } => {
                self.resolve(&src_conn, id, Ok(response)).await;
            }
            Frame::Error { id, error, code, .. } => {
                self.resolve(&src_conn, id, Err((code, error))).await;
            }
        }
    }

    async fn route_command(
        self: &Arc<Self>,
        src_conn: Arc<Connection>,
        dst_agent_id: AgentId,
        src_msg_id: MsgId,
        cmd: String,
        msg: Value,
    ) {
        let Some(dst_conn) = self.get(dst_agent_id).await else {
            self.send_error(
                &src_conn,
                src_msg_id,
                ProtocolError::InvalidAgent(dst_agent_id),
            )
            .await;
            return;
        };

        let candidate = Flow {
            src_agent_id: src_conn.agent_id,
            dst_agent_id,
            command: cmd.clone(),
            src_msg_id,
            dst_msg_id: MsgId(0),
        };

        if src_conn.auth_level().await == AuthLevel::None {
            let listeners = self.listener_flows.read().await.clone();
            let mut matched = false;
            for listener in &listeners {
                if listener.matches(&candidate) {
                    matched = true;
                    let dst_msg_id = self.next_msg_id();
                    let flow = Flow {
                        dst_msg_id,
                        ..candidate.clone()
                    };
                    dst_conn.add_flow(flow.clone()).await;
                    self.deliver_command(dst_conn.clone(), flow, cmd.clone(), msg.clone())
                        .await;
                }
            }
            if !matched {
                self.send_error(&src_conn, src_msg_id, ProtocolError::AccessDenied)
                    .await;
            }
            return;
        }

        if !src_conn.check_acl(&candidate).await {
            self.send_error(&src_conn, src_msg_id, ProtocolError::AccessDenied)
                .await;
            return;
        }

        let dst_msg_id = self.next_msg_id();
        let flow = Flow {
            dst_msg_id,
            ..candidate
        };
        dst_conn.add_flow(flow.clone()).await;
        self.deliver_command(dst_conn, flow, cmd, msg).await;
    }

    async fn deliver_command(
        self: &Arc<Self>,
        dst_conn: Arc<Connection>,
        flow: Flow,
        cmd: String,
        msg: Value,
    ) {
        match &dst_conn.endpoint {
            Endpoint::Local(agent) => {
                let agent = Arc::clone(agent);
                let broker = Arc::clone(self);
                let dst_conn = Arc::clone(&dst_conn);
                tokio::spawn(async move {
                    let ctx = CallContext {
                        src_agent_id: flow.src_agent_id,
                        src_msg_id: flow.src_msg_id,
                    };
                    let result = agent.dispatch(ctx, &cmd, msg).await;
                    let outcome = result.map_err(|e| (e.code(), e.to_string()));
                    broker.resolve(&dst_conn, flow.dst_msg_id, outcome).await;
                });
            }
            Endpoint::Remote(sink) => {
                let sink = Arc::clone(sink);
                let frame = Frame::Command {
                    agent_id: flow.dst_agent_id,
                    id: flow.dst_msg_id,
                    cmd,
                    msg,
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "failed to deliver command to remote peer");
                    dst_conn.take_flow(flow.dst_agent_id, flow.dst_msg_id).await;
                }
            }
        }
    }

    /// Pops the flow the responder (`msg_id` in its own namespace) created
    /// and re-addresses the reply back to the original caller.
    pub async fn resolve(
        &self,
        responder: &Arc<Connection>,
        msg_id: MsgId,
        outcome: Result<Value, (u16, String)>,
    ) {
        let Some(flow) = responder.take_flow(responder.agent_id, msg_id).await else {
            tracing::debug!(agent_id = %responder.agent_id, %msg_id, "response with no matching flow, dropped");
            return;
        };

        let Some(target_conn) = self.get(flow.src_agent_id).await else {
            tracing::debug!(agent_id = %flow.src_agent_id, "flow's original caller is gone, dropping response");
            return;
        };

        match &target_conn.endpoint {
            Endpoint::Local(_) => {
                if let Some(pending) = target_conn.take_pending(flow.src_msg_id).await {
                    let _ = pending.send(outcome);
                }
            }
            Endpoint::Remote(sink) => {
                let frame = match outcome {
                    Ok(value) => Frame::Response {
                        agent_id: flow.src_agent_id,
                        id: flow.src_msg_id,
                        response: value,
                    },
                    Err((code, error)) => Frame::Error {
                        agent_id: flow.src_agent_id,
                        id: flow.src_msg_id,
                        error,
                        code,
                    },
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "failed to deliver response to remote peer");
                }
            }
        }
    }

    async fn send_error(&self, conn: &Arc<Connection>, msg_id: MsgId, err: ProtocolError) {
        let code = err.code();
        let message = err.to_string();
        tracing::debug!(agent_id = %conn.agent_id, %msg_id, code, %message, "routing error");
        match &conn.endpoint {
            Endpoint::Local(_) => {
                if let Some(pending) = conn.take_pending(msg_id).await {
                    let _ = pending.send(Err((code, message)));
                }
            }
            Endpoint::Remote(sink) => {
                let frame = Frame::Error {
                    agent_id: conn.agent_id,
                    id: msg_id,
                    error: message,
                    code,
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "failed to deliver routing error to remote peer");
                }
            }
        }
    }
}

/// The local-agent loopback call path: a local agent issuing an outbound
/// call re-enters `Broker::process_message` exactly like a remote peer
/// would, rather than bypassing routing.
pub struct LocalCommandSink {
    pub broker: Arc<Broker>,
    pub agent_id: AgentId,
}

#[async_trait]
impl CommandSink for LocalCommandSink {
    fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    async fn call(&self, target: AgentId, cmd: &str, args: Value) -> Result<Value, (u16, String)> {
        let conn = self
            .broker
            .get(self.agent_id)
            .await
            .expect("local agent's own connection record must exist");
        let msg_id = conn.next_outbound_msg_id();
        let (tx, rx) = oneshot::channel();
        conn.register_pending(msg_id, tx).await;

        self.broker
            .process_message(
                self.agent_id,
                Frame::Command {
                    agent_id: target,
                    id: msg_id,
                    cmd: cmd.to_owned(),
                    msg: args,
                },
            )
            .await;

        rx.await.unwrap_or_else(|_| {
            Err((
                error_codes::CONNECTION_ERROR,
                "broker dropped the pending call".to_owned(),
            ))
        })
    }
}
