//! Flow bookkeeping and the access-control rule shared by both the
//! per-connection ACL and the broker-global listener-flow list (spec §3).

use loadbus_wire::{AgentId, MsgId};

/// Pairs a forwarded command with everything needed to route its eventual
/// response back to the original caller. Created when a command is routed;
/// consumed when the matching response or error comes back.
#[derive(Debug, Clone)]
pub struct Flow {
    pub src_agent_id: AgentId,
    pub dst_agent_id: AgentId,
    pub command: String,
    pub src_msg_id: MsgId,
    pub dst_msg_id: MsgId,
}

/// `{ src-agent-id?, dst-agent-id?, command? }`; each unset field acts as a
/// wildcard. Used both for per-connection ACLs and for the broker-global
/// listener-flow list — a listener-flow is just an access rule consulted
/// for unauthenticated peers instead of an authenticated one's own ACL.
#[derive(Debug, Clone, Default)]
pub struct AclRule {
    pub src_agent_id: Option<AgentId>,
    pub dst_agent_id: Option<AgentId>,
    pub command: Option<String>,
}

impl AclRule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn src(mut self, agent_id: AgentId) -> Self {
        self.src_agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub fn dst(mut self, agent_id: AgentId) -> Self {
        self.dst_agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// A flow `F` matches rule `R` iff every set field in `R` equals the
    /// corresponding field in `F`.
    #[must_use]
    pub fn matches(&self, flow: &Flow) -> bool {
        if let Some(src) = self.src_agent_id {
            if src != flow.src_agent_id {
                return false;
            }
        }
        if let Some(dst) = self.dst_agent_id {
            if dst != flow.dst_agent_id {
                return false;
            }
        }
        if let Some(command) = &self.command {
            if command != &flow.command {
                return false;
            }
        }
        true
    }
}

/// A broker-global allow-rule scoped to unauthenticated peers.
pub type ListenerFlow = AclRule;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_flow() -> Flow {
        Flow {
            src_agent_id: AgentId(10),
            dst_agent_id: AgentId(1),
            command: "authUser".to_owned(),
            src_msg_id: MsgId(1),
            dst_msg_id: MsgId(2),
        }
    }

    #[test]
    fn wildcard_rule_matches_anything() {
        assert!(AclRule::new().matches(&sample_flow()));
    }

    #[test]
    fn rule_rejects_on_any_mismatched_field() {
        let rule = AclRule::new().dst(AgentId(1)).command("authUser");
        assert!(rule.matches(&sample_flow()));

        let rule = AclRule::new().dst(AgentId(2)).command("authUser");
        assert!(!rule.matches(&sample_flow()));

        let rule = AclRule::new().dst(AgentId(1)).command("hello");
        assert!(!rule.matches(&sample_flow()));
    }
}
