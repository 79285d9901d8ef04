//! The local-agent runtime trait (spec §4.6) and the registration-listener
//! subscription (spec §3 "Listener agent").

use async_trait::async_trait;
use loadbus_rpc::CallContext;
use loadbus_wire::{AgentId, AgentType, ProtocolError};
use serde_json::Value;

/// An in-process service appearing on the bus at a reserved small
/// agent-id. Constructed once, granted MASTER authentication by the
/// broker, and dispatched into directly — no socket, no frame codec.
#[async_trait]
pub trait LocalAgent: Send + Sync {
    fn agent_id(&self) -> AgentId;
    fn agent_type(&self) -> AgentType;
    fn agent_uuid(&self) -> &str;

    async fn dispatch(
        &self,
        ctx: CallContext,
        cmd: &str,
        args: Value,
    ) -> Result<Value, ProtocolError>;
}

/// `{ peer-type, on-register, on-disconnect }`. Invoked whenever any peer
/// of the given type transitions to ESTABLISHED or DISCONNECTED.
pub struct ListenerAgent {
    pub peer_type: AgentType,
    pub on_register: Box<dyn Fn(AgentId) + Send + Sync>,
    pub on_disconnect: Box<dyn Fn(AgentId) + Send + Sync>,
}

impl ListenerAgent {
    pub fn notify_register(&self, peer_type: &AgentType, agent_id: AgentId) {
        if *peer_type == self.peer_type {
            (self.on_register)(agent_id);
        }
    }

    pub fn notify_disconnect(&self, peer_type: &AgentType, agent_id: AgentId) {
        if *peer_type == self.peer_type {
            (self.on_disconnect)(agent_id);
        }
    }
}
