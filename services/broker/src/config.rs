//! Environment-driven configuration, loaded the way the teacher's
//! `main.rs` reads `DATABASE_URL`/`BIND_ADDR`: `env::var(..).unwrap_or_else`
//! with no config file format.

use std::env;
use std::time::Duration;

pub struct BrokerConfig {
    pub bind_addr: String,
    pub cleanup_interval: Duration,
    pub master_key_path: String,
}

impl BrokerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = env::var("LOADBUS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:7654".to_owned());
        let cleanup_interval_secs = env::var("LOADBUS_CLEANUP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);
        let master_key_path =
            env::var("LOADBUS_MASTER_KEY_PATH").unwrap_or_else(|_| "master.key".to_owned());

        Self {
            bind_addr,
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
            master_key_path,
        }
    }
}
