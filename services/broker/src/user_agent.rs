//! The always-present user-authentication agent at agent-id 1 (spec.md
//! §4.6). Grounded on `tsload.user.agent.TSUserAgent` and
//! `tsload.user.localauth.LocalAuth`; role elevation is carried over from
//! `TSUserAgent._setupRoles`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use loadbus_core::{AuthLevel, Broker, ListenerFlow, LocalAgent};
use loadbus_rpc::{dispatch, CallContext, FieldSpec, Kind, MethodHandler, MethodSpec, ObjectDescriptor};
use loadbus_wire::{AgentId, AgentType, ProtocolError};
use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// A user's stored credentials and role assignments. The real account
/// database is out of scope (spec.md §1's "SQL persistence" collaborator)
/// — this crate only needs [`UserStore`]'s seam.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub gecos_name: String,
    pub auth_password: String,
    pub roles: Vec<String>,
}

/// Abstracts the out-of-scope SQL-backed account store.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Option<UserRecord>;
}

/// Default store used by tests and by `services/broker` until a real
/// persistence layer is wired in.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, name: impl Into<String>, record: UserRecord) {
        self.users.write().await.insert(name.into(), record);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_name(&self, name: &str) -> Option<UserRecord> {
        self.users.read().await.get(name).cloned()
    }
}

/// Salted SHA-256, in the `"sha256$salt$hash"` layout `LocalAuth.authentificate`
/// used for its `crypt(3)`-formatted `"method$salt$hash"` entries — swapped for
/// a pure-Rust hash since `crypt(3)` is not portable off the host libc.
#[must_use]
pub fn hash_password(password: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{salt}{password}").as_bytes());
    format!("sha256${salt}${}", hex::encode(digest))
}

#[must_use]
pub fn new_salt() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(method), Some(salt), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if method != "sha256" {
        return false;
    }
    hash_password(password, salt) == stored
}

/// `_setupRoles`: admin dominates operator dominates user. Carried over
/// with cleaned-up precedence — the original's per-iteration `if/elif/else`
/// could demote a previously-seen `admin`/`operator` role back down to
/// `user` depending on iteration order; this computes the mapping as a
/// true maximum over role rank instead.
#[must_use]
pub fn setup_roles(roles: &[String]) -> AuthLevel {
    fn rank(level: AuthLevel) -> u8 {
        match level {
            AuthLevel::Admin => 3,
            AuthLevel::Operator => 2,
            AuthLevel::User => 1,
            AuthLevel::None | AuthLevel::Master => 0,
        }
    }

    let mut max_role = AuthLevel::None;
    for role in roles {
        let candidate = match role.as_str() {
            "admin" => AuthLevel::Admin,
            "operator" => AuthLevel::Operator,
            _ => AuthLevel::User,
        };
        if rank(candidate) > rank(max_role) {
            max_role = candidate;
        }
    }
    max_role
}

fn auth_user_spec() -> MethodSpec {
    MethodSpec::new(
        "authUser",
        vec![
            FieldSpec::required("userName", Kind::String),
            FieldSpec::required("userPassword", Kind::String),
        ],
        Kind::Object(ObjectDescriptor {
            name: "UserDescriptor",
            fields: vec![
                FieldSpec::required("name", Kind::String),
                FieldSpec::required("role", Kind::Int),
            ],
        }),
    )
}

fn method_specs() -> &'static [MethodSpec] {
    static SPECS: OnceLock<Vec<MethodSpec>> = OnceLock::new();
    SPECS.get_or_init(|| vec![auth_user_spec()])
}

struct AuthUserHandler {
    broker: Arc<Broker>,
    store: Arc<dyn UserStore>,
}

#[async_trait]
impl MethodHandler for AuthUserHandler {
    async fn handle(&self, ctx: CallContext, args: Value) -> Result<Value, ProtocolError> {
        let user_name = args["userName"].as_str().unwrap_or_default();
        let user_password = args["userPassword"].as_str().unwrap_or_default();

        let Some(user) = self.store.find_by_name(user_name).await else {
            return Err(ProtocolError::InvalidData(format!("no such user: {user_name}")));
        };

        if !verify_password(&user.auth_password, user_password) {
            return Err(ProtocolError::InvalidData("incorrect password".to_owned()));
        }

        let role = setup_roles(&user.roles);
        let conn = self.broker.get(ctx.src_agent_id).await.ok_or_else(|| {
            ProtocolError::InternalError(format!("no connection record for {}", ctx.src_agent_id))
        })?;
        conn.set_auth_level(role).await;

        Ok(json!({ "name": user.gecos_name, "role": role.as_code() }))
    }
}

/// Bound to agent-id 1 at startup.
pub struct UserAgent {
    auth_user: AuthUserHandler,
}

impl UserAgent {
    #[must_use]
    pub fn new(broker: Arc<Broker>, store: Arc<dyn UserStore>) -> Self {
        Self {
            auth_user: AuthUserHandler { broker, store },
        }
    }

    /// Mirrors `TSUserAgent.__init__`'s `listenerFlows.append` call: a
    /// fresh connection may call `authUser` before it has any auth level.
    pub async fn register_listener_flows(&self, broker: &Broker) {
        broker
            .add_listener_flow(ListenerFlow::new().dst(AgentId::USER).command("authUser"))
            .await;
    }
}

#[async_trait]
impl LocalAgent for UserAgent {
    fn agent_id(&self) -> AgentId {
        AgentId::USER
    }

    fn agent_type(&self) -> AgentType {
        AgentType::User
    }

    fn agent_uuid(&self) -> &str {
        "2701b3b1-cd8f-457e-9bdd-2323153f16e5"
    }

    async fn dispatch(&self, ctx: CallContext, cmd: &str, args: Value) -> Result<Value, ProtocolError> {
        match cmd {
            "authUser" => dispatch(&method_specs()[0], &self.auth_user, ctx, args).await,
            other => Err(ProtocolError::CommandNotFound(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trips_through_verify() {
        let salt = new_salt();
        let hash = hash_password("hunter2", &salt);
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "wrong"));
    }

    #[test]
    fn setup_roles_lets_admin_dominate_regardless_of_order() {
        assert_eq!(
            setup_roles(&["user".to_owned(), "operator".to_owned(), "admin".to_owned()]),
            AuthLevel::Admin
        );
        assert_eq!(
            setup_roles(&["operator".to_owned(), "user".to_owned()]),
            AuthLevel::Operator
        );
        assert_eq!(setup_roles(&["user".to_owned()]), AuthLevel::User);
        assert_eq!(setup_roles(&[]), AuthLevel::None);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_a_user() {
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
        let found = store.find_by_name("alice").await.unwrap();
        assert!(verify_password(&found.auth_password, "secret"));
    }
}
