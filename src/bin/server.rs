use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use redchat::broker::{MemoryBroker, RedisBroker, SharedBroker};
use redchat::config::{BrokerKind, ServerConfig};
use redchat::core::session::create_session_manager;
use redchat::handlers::routes;

#[tokio::main]
async fn main() {
    // Initialize env before logging so RUST_LOG can come from .env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Load config from env
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, max_message_size={}",
        config.host, config.port, config.max_message_size
    );

    // Connect the broker
    let broker: SharedBroker = match &config.broker {
        BrokerKind::Memory => {
            warn!("Using in-process memory broker, rooms are not shared with other servers");
            Arc::new(MemoryBroker::standalone())
        }
        BrokerKind::Redis { url } => match RedisBroker::connect(url).await {
            Ok(broker) => Arc::new(broker),
            Err(e) => {
                error!("Failed to initialize Redis broker: {}", e);
                std::process::exit(1);
            }
        },
    };

    // Create session manager and routes
    let manager = create_session_manager(broker);
    let routes = routes(manager, config.max_message_size);

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let (bound, server) = match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown) {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Starting Redchat server on {}", bound);
    server.await;
    info!("Server stopped");
}
