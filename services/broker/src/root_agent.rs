//! The always-present control agent at agent-id 0 (spec.md §4.6).
//! Grounded on `tsload.jsonts.root.TSRootAgent`/`tsload.jsonts.api.root`.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use loadbus_core::{AuthLevel, Broker, ConnState, ListenerFlow, LocalAgent};
use loadbus_rpc::{dispatch, CallContext, FieldSpec, Kind, MethodHandler, MethodSpec, ObjectDescriptor};
use loadbus_wire::{AgentId, AgentType, ProtocolError};
use serde_json::{json, Value};

fn hello_spec() -> MethodSpec {
    MethodSpec::new(
        "hello",
        vec![
            FieldSpec::required("agentType", Kind::String),
            FieldSpec::required("agentUuid", Kind::String),
        ],
        Kind::Object(ObjectDescriptor {
            name: "HelloResponse",
            fields: vec![FieldSpec::required("agentId", Kind::Int)],
        }),
    )
}

fn auth_master_key_spec() -> MethodSpec {
    MethodSpec::new(
        "authMasterKey",
        vec![FieldSpec::required("masterKey", Kind::String)],
        Kind::Null,
    )
}

fn client_descriptor_kind() -> Kind {
    Kind::Object(ObjectDescriptor {
        name: "ClientDescriptor",
        fields: vec![
            FieldSpec::required("id", Kind::Int),
            FieldSpec::required("type", Kind::String),
            FieldSpec::required("uuid", Kind::String),
            FieldSpec::required("authType", Kind::Int),
            FieldSpec::required("state", Kind::Int),
            FieldSpec::required("endpoint", Kind::String),
        ],
    })
}

fn list_clients_spec() -> MethodSpec {
    MethodSpec::new("listClients", vec![], Kind::array(client_descriptor_kind()))
}

fn method_specs() -> &'static [MethodSpec] {
    static SPECS: OnceLock<Vec<MethodSpec>> = OnceLock::new();
    SPECS.get_or_init(|| vec![hello_spec(), auth_master_key_spec(), list_clients_spec()])
}

struct HelloHandler {
    broker: Arc<Broker>,
}

#[async_trait]
impl MethodHandler for HelloHandler {
    async fn handle(&self, ctx: CallContext, args: Value) -> Result<Value, ProtocolError> {
        let agent_type = args["agentType"].as_str().unwrap_or_default();
        let agent_uuid = args["agentUuid"].as_str().unwrap_or_default();

        let conn = self.broker.get(ctx.src_agent_id).await.ok_or_else(|| {
            ProtocolError::InternalError(format!("no connection record for {}", ctx.src_agent_id))
        })?;
        conn.set_peer_info(AgentType::from(agent_type), agent_uuid.to_owned()).await;
        conn.set_state(ConnState::Established).await;
        self.broker.notify_register(ctx.src_agent_id).await;

        Ok(json!({ "agentId": ctx.src_agent_id.0 }))
    }
}

struct AuthMasterKeyHandler {
    broker: Arc<Broker>,
}

#[async_trait]
impl MethodHandler for AuthMasterKeyHandler {
    async fn handle(&self, ctx: CallContext, args: Value) -> Result<Value, ProtocolError> {
        let master_key = args["masterKey"].as_str().unwrap_or_default();

        if master_key != self.broker.master_key() {
            return Err(ProtocolError::InvalidData("master key invalid".to_owned()));
        }

        let conn = self.broker.get(ctx.src_agent_id).await.ok_or_else(|| {
            ProtocolError::InternalError(format!("no connection record for {}", ctx.src_agent_id))
        })?;
        conn.set_auth_level(AuthLevel::Master).await;
        Ok(Value::Null)
    }
}

struct ListClientsHandler {
    broker: Arc<Broker>,
}

#[async_trait]
impl MethodHandler for ListClientsHandler {
    async fn handle(&self, _ctx: CallContext, _args: Value) -> Result<Value, ProtocolError> {
        let snapshot = self.broker.snapshot_all().await;
        let clients: Vec<Value> = snapshot
            .into_iter()
            .map(|c| {
                json!({
                    "id": c.agent_id.0,
                    "type": c.agent_type.map(|t| t.as_str().to_owned()).unwrap_or_default(),
                    "uuid": c.agent_uuid.unwrap_or_default(),
                    "authType": c.auth_level.as_code(),
                    "state": c.state.as_code(),
                    "endpoint": c.endpoint,
                })
            })
            .collect();
        Ok(Value::Array(clients))
    }
}

/// Bound to agent-id 0 at startup. Registers itself as the only listener
/// flow destination new, unauthenticated connections may address.
pub struct RootAgent {
    broker: Arc<Broker>,
    hello: HelloHandler,
    auth_master_key: AuthMasterKeyHandler,
    list_clients: ListClientsHandler,
}

impl RootAgent {
    #[must_use]
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            hello: HelloHandler { broker: broker.clone() },
            auth_master_key: AuthMasterKeyHandler { broker: broker.clone() },
            list_clients: ListClientsHandler { broker: broker.clone() },
            broker,
        }
    }

    /// Opens the root agent up to unauthenticated callers for its three
    /// bootstrap commands, mirroring `TSRootAgent.__init__`'s
    /// `listenerFlows.append` calls.
    pub async fn register_listener_flows(&self) {
        for command in ["hello", "authMasterKey", "listClients"] {
            self.broker
                .add_listener_flow(ListenerFlow::new().dst(AgentId::ROOT).command(command))
                .await;
        }
    }
}

#[async_trait]
impl LocalAgent for RootAgent {
    fn agent_id(&self) -> AgentId {
        AgentId::ROOT
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Root
    }

    fn agent_uuid(&self) -> &str {
        "14f498da-a689-4341-8869-e4a292b143b6"
    }

    async fn dispatch(&self, ctx: CallContext, cmd: &str, args: Value) -> Result<Value, ProtocolError> {
        let specs = method_specs();
        match cmd {
            "hello" => dispatch(&specs[0], &self.hello, ctx, args).await,
            "authMasterKey" => dispatch(&specs[1], &self.auth_master_key, ctx, args).await,
            "listClients" => dispatch(&specs[2], &self.list_clients, ctx, args).await,
            other => Err(ProtocolError::CommandNotFound(other.to_owned())),
        }
    }
}
