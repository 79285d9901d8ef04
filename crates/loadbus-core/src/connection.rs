//! The per-peer connection record (spec §3 "Connection record") and the
//! endpoint split between an in-process local agent and a real remote
//! socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loadbus_wire::{AgentId, AgentType, Frame, MsgId, ProtocolError};
use tokio::sync::{oneshot, Mutex, RwLock};

use crate::agent::LocalAgent;
use crate::flow::{AclRule, Flow};
use crate::state::{AuthLevel, ConnState};

/// How a connection's send side is actually reached. Local agents are
/// dispatched into directly by the broker; remote peers get a frame
/// written to their socket by whatever owns the write half.
pub enum Endpoint {
    Local(Arc<dyn LocalAgent>),
    Remote(Arc<dyn FrameSink>),
}

/// Writes one frame to a remote peer's transport. Implemented by the
/// deployable broker binary over the real TCP socket; `loadbus-core`
/// itself has no I/O.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<(), ProtocolError>;
}

type PendingReply = oneshot::Sender<Result<serde_json::Value, (u16, String)>>;

pub struct Connection {
    pub agent_id: AgentId,
    pub endpoint: Endpoint,
    pub endpoint_str: String,
    state: RwLock<ConnState>,
    auth_level: RwLock<AuthLevel>,
    peer_type: RwLock<Option<AgentType>>,
    peer_uuid: RwLock<Option<String>>,
    pub acl: RwLock<Vec<AclRule>>,
    pub flows: Mutex<HashMap<(AgentId, MsgId), Flow>>,
    pending: Mutex<HashMap<MsgId, PendingReply>>,
    next_msg_id: AtomicU64,
}

impl Connection {
    #[must_use]
    pub fn new_remote(agent_id: AgentId, endpoint_str: String, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            agent_id,
            endpoint: Endpoint::Remote(sink),
            endpoint_str,
            state: RwLock::new(ConnState::Connected),
            auth_level: RwLock::new(AuthLevel::None),
            peer_type: RwLock::new(None),
            peer_uuid: RwLock::new(None),
            acl: RwLock::new(Vec::new()),
            flows: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU64::new(1),
        }
    }

    /// Local agents are granted MASTER authentication and treated as
    /// ESTABLISHED at construction; they never go through the handshake.
    #[must_use]
    pub fn new_local(agent: Arc<dyn LocalAgent>) -> Self {
        let agent_id = agent.agent_id();
        let agent_type = agent.agent_type();
        let agent_uuid = agent.agent_uuid().to_owned();
        Self {
            agent_id,
            endpoint: Endpoint::Local(agent),
            endpoint_str: "local".to_owned(),
            state: RwLock::new(ConnState::Established),
            auth_level: RwLock::new(AuthLevel::Master),
            peer_type: RwLock::new(Some(agent_type)),
            peer_uuid: RwLock::new(Some(agent_uuid)),
            acl: RwLock::new(Vec::new()),
            flows: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.endpoint, Endpoint::Local(_))
    }

    pub async fn state(&self) -> ConnState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: ConnState) {
        *self.state.write().await = state;
    }

    pub async fn auth_level(&self) -> AuthLevel {
        *self.auth_level.read().await
    }

    pub async fn set_auth_level(&self, level: AuthLevel) {
        *self.auth_level.write().await = level;
    }

    pub async fn peer_type(&self) -> Option<AgentType> {
        self.peer_type.read().await.clone()
    }

    pub async fn peer_uuid(&self) -> Option<String> {
        self.peer_uuid.read().await.clone()
    }

    pub async fn set_peer_info(&self, peer_type: AgentType, peer_uuid: String) {
        *self.peer_type.write().await = Some(peer_type);
        *self.peer_uuid.write().await = Some(peer_uuid);
    }

    /// Allocates the next outbound message-id this connection will use
    /// when it originates a command. Owned per-connection, never reused.
    pub fn next_outbound_msg_id(&self) -> MsgId {
        MsgId(self.next_msg_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn add_flow(&self, flow: Flow) {
        let key = (flow.dst_agent_id, flow.dst_msg_id);
        self.flows.lock().await.insert(key, flow);
    }

    /// Finds the flow keyed by `(agent_id, msg_id)` and removes it, for the
    /// response/error routing path (§4.5 invariant: a flow is consumed
    /// exactly once).
    pub async fn take_flow(&self, agent_id: AgentId, msg_id: MsgId) -> Option<Flow> {
        self.flows.lock().await.remove(&(agent_id, msg_id))
    }

    pub async fn register_pending(&self, msg_id: MsgId, reply: PendingReply) {
        self.pending.lock().await.insert(msg_id, reply);
    }

    pub async fn take_pending(&self, msg_id: MsgId) -> Option<PendingReply> {
        self.pending.lock().await.remove(&msg_id)
    }

    pub async fn check_acl(&self, flow: &Flow) -> bool {
        if self.auth_level().await.bypasses_acl() {
            return true;
        }
        self.acl.read().await.iter().any(|rule| rule.matches(flow))
    }

    pub async fn add_acl_rule(&self, rule: AclRule) {
        self.acl.write().await.push(rule);
    }
}
