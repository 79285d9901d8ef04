pub mod config;
pub mod master_key;
pub mod root_agent;
pub mod tcp;
pub mod user_agent;

pub use config::BrokerConfig;
pub use root_agent::RootAgent;
pub use tcp::{accept_loop, handle_connection, TcpFrameSink};
pub use user_agent::{hash_password, new_salt, setup_roles, InMemoryUserStore, UserAgent, UserRecord, UserStore};
