//! Typed client-side proxy for the broker's always-present root agent
//! (spec.md §4.6). A concrete [`Interface`] implementor exercising
//! `Client::proxy`, grounded on the same `hello`/`authMasterKey`/
//! `listClients` method set `services/broker`'s `RootAgent` serves on the
//! other end.

use std::sync::{Arc, OnceLock};

use loadbus_rpc::{
    invoke, CommandSink, FieldSpec, Interface, Kind, MethodSpec, ObjectDescriptor, RpcError,
};
use loadbus_wire::AgentId;
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

/// The root agent's interface (agent-id 0): bootstrap handshake, master-key
/// auth, and the client-listing introspection call.
pub struct RootInterface;

impl Interface for RootInterface {
    type Proxy = RootProxy;

    fn methods() -> &'static [MethodSpec] {
        method_specs()
    }

    fn proxy(sink: Arc<dyn CommandSink>, target: AgentId) -> RootProxy {
        RootProxy { sink, target }
    }
}

/// Typed proxy handed back by `Client::proxy::<RootInterface>(AgentId::ROOT)`.
pub struct RootProxy {
    sink: Arc<dyn CommandSink>,
    target: AgentId,
}

impl RootProxy {
    pub async fn hello(&self, agent_type: &str, agent_uuid: &str) -> Result<AgentId, RpcError> {
        let result = invoke(
            self.sink.as_ref(),
            self.target,
            &method_specs()[0],
            json!({"agentType": agent_type, "agentUuid": agent_uuid}),
        )
        .await?;
        let id = result["agentId"].as_u64().unwrap_or_default();
        Ok(AgentId(u32::try_from(id).unwrap_or(u32::MAX)))
    }

    pub async fn auth_master_key(&self, master_key: &str) -> Result<(), RpcError> {
        invoke(
            self.sink.as_ref(),
            self.target,
            &method_specs()[1],
            json!({"masterKey": master_key}),
        )
        .await?;
        Ok(())
    }

    pub async fn list_clients(&self) -> Result<Vec<Value>, RpcError> {
        let result = invoke(self.sink.as_ref(), self.target, &method_specs()[2], json!({})).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }
}
