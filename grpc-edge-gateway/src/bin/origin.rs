use clap::Parser;
use grpc_edge_gateway::config::{OriginArgs, OriginConfig};
use grpc_edge_gateway::logging::init_logging;
use grpc_edge_gateway::OriginServer;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = OriginArgs::parse();

    let config = match OriginConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Use --help for usage information");
            process::exit(1);
        }
    };

    if let Err(e) = init_logging("grpc_edge_gateway", &config.logging.level) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Starting origin on {}:{}", config.listen.address, config.listen.port);

    let server = match OriginServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(category = e.category().as_str(), "Failed to create origin: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.start().await {
        error!(category = e.category().as_str(), "Origin error: {}", e);
        process::exit(1);
    }
}
