//! End-to-end wire scenarios: spins up a real broker on an ephemeral port
//! and drives it with `loadbus-client`, mirroring the teacher's
//! `services/server/tests/*.rs` convention of testing a running service's
//! wire behavior instead of mocking it.

use std::net::SocketAddr;
use std::sync::Arc;

use broker::user_agent::{hash_password, InMemoryUserStore, UserAgent, UserRecord, UserStore};
use broker::RootAgent;
use loadbus_client::{Client, NoCommands, RootInterface};
use loadbus_core::Broker;
use loadbus_rpc::CommandSink;
use loadbus_wire::{error_codes, AgentId, AgentType};
use serde_json::json;
use tokio::net::TcpListener;

async fn spawn_test_broker() -> (Arc<Broker>, SocketAddr) {
    let broker = Arc::new(Broker::new("TEST-MASTER-KEY".to_owned()));

    let root_agent = Arc::new(RootAgent::new(broker.clone()));
    root_agent.register_listener_flows().await;
    broker.register_local_agent(root_agent).await;

    let store = InMemoryUserStore::new();
    store
        .add_user(
            "alice",
            UserRecord {
                gecos_name: "Alice".to_owned(),
                auth_password: hash_password("secret", "abc123"),
                roles: vec!["operator".to_owned()],
            },
        )
        .await;
    let store: Arc<dyn UserStore> = Arc::new(store);
    let user_agent = UserAgent::new(broker.clone(), store);
    user_agent.register_listener_flows(&broker).await;
    broker.register_local_agent(Arc::new(user_agent)).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_broker = broker.clone();
    tokio::spawn(async move {
        broker::accept_loop(accept_broker, listener).await;
    });

    (broker, addr)
}

async fn connect(addr: SocketAddr) -> Arc<Client> {
    let (client, _reader) = Client::connect(addr, AgentType::Cli, "uuid-A", Arc::new(NoCommands))
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn handshake_assigns_a_remote_agent_id() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;
    assert!(client.agent_id().0 >= AgentId::FIRST_REMOTE.0);
}

#[tokio::test]
async fn unauthenticated_client_cannot_call_a_command_with_no_listener_flow() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;

    let err = client.call(AgentId::ROOT, "secretOp", json!({})).await.unwrap_err();
    assert_eq!(err.0, error_codes::ACCESS_DENIED);
}

#[tokio::test]
async fn unauthenticated_listener_flow_command_is_still_routed() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;

    let result = client.call(AgentId::ROOT, "listClients", json!({})).await.unwrap();
    assert!(result.as_array().unwrap().iter().any(|c| c["id"] == json!(client.agent_id().0)));
}

#[tokio::test]
async fn master_key_auth_bypasses_the_acl_for_subsequent_calls() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;

    client
        .call(AgentId::ROOT, "authMasterKey", json!({"masterKey": "TEST-MASTER-KEY"}))
        .await
        .unwrap();

    let result = client.call(AgentId::ROOT, "listClients", json!({})).await.unwrap();
    assert!(!result.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn wrong_master_key_is_rejected() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;

    let err = client
        .call(AgentId::ROOT, "authMasterKey", json!({"masterKey": "NOT-THE-KEY"}))
        .await
        .unwrap_err();
    assert_eq!(err.0, error_codes::INVALID_DATA);
}

#[tokio::test]
async fn auth_user_with_wrong_password_is_rejected() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;

    let err = client
        .call(AgentId::USER, "authUser", json!({"userName": "alice", "userPassword": "wrong"}))
        .await
        .unwrap_err();
    assert_eq!(err.0, error_codes::INVALID_DATA);
}

#[tokio::test]
async fn auth_user_with_correct_password_elevates_auth_level_but_does_not_bypass_the_acl() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;

    let result = client
        .call(AgentId::USER, "authUser", json!({"userName": "alice", "userPassword": "secret"}))
        .await
        .unwrap();
    assert_eq!(result["name"], json!("Alice"));
    assert_eq!(result["role"], json!(3));

    let err = client.call(AgentId::ROOT, "secretOp", json!({})).await.unwrap_err();
    assert_eq!(err.0, error_codes::ACCESS_DENIED);
}

#[tokio::test]
async fn invalid_destination_agent_is_reported_without_hanging() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;
    client
        .call(AgentId::ROOT, "authMasterKey", json!({"masterKey": "TEST-MASTER-KEY"}))
        .await
        .unwrap();

    let err = client.call(AgentId(12345), "whatever", json!({})).await.unwrap_err();
    assert_eq!(err.0, error_codes::INVALID_AGENT);
}

#[tokio::test]
async fn typed_proxy_authenticates_and_lists_clients() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;

    let root = client.proxy::<RootInterface>(AgentId::ROOT);
    root.auth_master_key("TEST-MASTER-KEY").await.unwrap();

    let clients = root.list_clients().await.unwrap();
    assert!(clients.iter().any(|c| c["id"] == json!(client.agent_id().0)));
}

#[tokio::test]
async fn unknown_command_on_a_real_agent_is_reported_as_command_not_found() {
    let (_broker, addr) = spawn_test_broker().await;
    let client = connect(addr).await;
    client
        .call(AgentId::ROOT, "authMasterKey", json!({"masterKey": "TEST-MASTER-KEY"}))
        .await
        .unwrap();

    let err = client.call(AgentId::ROOT, "doesNotExist", json!({})).await.unwrap_err();
    assert_eq!(err.0, error_codes::COMMAND_NOT_FOUND);
}
