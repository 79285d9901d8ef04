use std::sync::Arc;

use broker::user_agent::{InMemoryUserStore, UserAgent, UserStore};
use broker::{master_key, tcp, BrokerConfig, RootAgent};
use loadbus_core::Broker;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOADBUS_LOG").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = BrokerConfig::from_env();
    let master_key = master_key::load_or_generate(&config.master_key_path)
        .expect("failed to load or generate the master key");

    let broker = Arc::new(Broker::new(master_key));

    let root_agent = Arc::new(RootAgent::new(broker.clone()));
    root_agent.register_listener_flows().await;
    broker.register_local_agent(root_agent).await;

    let user_store: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let user_agent = UserAgent::new(broker.clone(), user_store);
    user_agent.register_listener_flows(&broker).await;
    broker.register_local_agent(Arc::new(user_agent)).await;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %config.bind_addr, "broker listening");

    let cleanup_broker = broker.clone();
    let cleanup_interval = config.cleanup_interval;
    let cleanup_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            cleanup_broker.cleanup_tick().await;
        }
    });

    tokio::select! {
        _ = tcp::accept_loop(broker.clone(), listener) => {},
        _ = shutdown_signal() => { info!("received shutdown signal"); },
    }

    cleanup_task.abort();
    info!("broker shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C"); },
        _ = terminate => { info!("received SIGTERM"); },
    }
}
