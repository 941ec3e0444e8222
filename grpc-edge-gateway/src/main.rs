use clap::Parser;
use grpc_edge_gateway::config::Args;
use grpc_edge_gateway::logging::init_logging;
use grpc_edge_gateway::{GatewayConfig, GatewayServer};
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match GatewayConfig::from_args(args) {
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

    display_startup_info(&config);

    let server = match GatewayServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(category = e.category().as_str(), "Failed to create gateway: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.start().await {
        error!(category = e.category().as_str(), "Server error: {}", e);
        process::exit(1);
    }
}

fn display_startup_info(config: &GatewayConfig) {
    info!("=== gRPC Edge Gateway ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Listen Address: {}:{}", config.listen.address, config.listen.port);
    info!("TLS Certificate: {}", config.tls.cert_file.display());
    match (&config.tls.client_ca_file, config.insecure) {
        (_, true) => info!("Mode: insecure (no peer verification)"),
        (Some(ca), false) => info!("Mode: mutual TLS, client CA {}", ca.display()),
        (None, false) => info!("Mode: TLS without client CA"),
    }
    info!("Origin: {} (server name {})", config.origin.address, config.origin.server_name);

    info!("Routes:");
    for (i, rule) in config.routing.rules.iter().enumerate() {
        info!("  {}. {} -> {:?}", i + 1, rule.prefix, rule.target);
    }
    info!("  /  -> index / not found");
}
