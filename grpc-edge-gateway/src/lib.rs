//! gRPC Edge Gateway
//!
//! Terminates mutually-authenticated TLS from callers and either forwards each
//! call to a single origin over a persistent HTTP/2 TLS session, or answers
//! it locally (health, reflection). Also ships the origin backend and a small
//! client built on the same RPC exchange engine.

pub mod body;
pub mod components;
pub mod config;
pub mod error;
pub mod logging;
pub mod origin;
pub mod rpc;
pub mod server;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use origin::OriginServer;

use body::GatewayBody;
use components::router::{RoutingStats, INDEX_BODY, NOT_FOUND_BODY};
use components::{build_identity, Dispatch, Http2Forwarder, LocalHandlers, RouteTable, TlsHandler};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use rpc::engine::plain_response;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Everything a request needs, shared read-only across connections
struct GatewayState {
    routes: RouteTable,
    local: LocalHandlers,
    forwarder: Http2Forwarder,
}

/// Main gateway server struct
pub struct GatewayServer {
    config: GatewayConfig,
    tls_handler: Arc<TlsHandler>,
    state: Arc<GatewayState>,
    shutdown_tx: broadcast::Sender<()>,
    connection_count: Arc<AtomicUsize>,
}

impl GatewayServer {
    /// Create a new gateway with the given configuration
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        if config.insecure {
            warn!(
                event = "insecure_mode",
                "Running with --insecure: peer certificates are not verified in either direction"
            );
        }

        let (role, material) = config.tls.server_identity(config.insecure)?;
        let tls_handler = Arc::new(TlsHandler::new(role, &material)?);
        info!("Caller-facing TLS initialized ({})", role.as_str());

        let (role, material) = config.origin.client_identity(config.insecure)?;
        let identity = build_identity(role, &material)?.into_client()?;
        info!("Origin-facing TLS initialized ({}) for {}", role.as_str(), config.origin.address);

        let routes = RouteTable::new(config.routing.clone())?;
        info!("Route table built with {} rules", routes.rules().len());
        if !routes.has_forward_routes() {
            warn!("No forward routes configured - the origin will never be contacted");
        }

        let local = LocalHandlers::new(&routes);
        let forwarder = Http2Forwarder::new(config.origin.clone(), identity);

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(GatewayServer {
            config,
            tls_handler,
            state: Arc::new(GatewayState { routes, local, forwarder }),
            shutdown_tx,
            connection_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Sender that stops the server and its background tasks
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured address, install signal handlers and serve
    pub async fn start(self) -> Result<(), GatewayError> {
        let listener = server::bind(self.config.socket_addr()?).await?;
        server::spawn_signal_handler(self.shutdown_tx.clone());
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<(), GatewayError> {
        let local_addr = listener.local_addr()?;

        let cleanup_state = Arc::clone(&self.state);
        let mut cleanup_shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut cleanup_interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = cleanup_interval.tick() => {
                        debug!("Running periodic connection pool cleanup");
                        cleanup_state.forwarder.cleanup_connections().await;
                    }
                    _ = cleanup_shutdown_rx.recv() => {
                        debug!("Cleanup task shutting down");
                        break;
                    }
                }
            }
        });

        tokio::spawn(log_server_stats(
            Arc::clone(&self.state),
            Arc::clone(&self.connection_count),
            self.shutdown_tx.subscribe(),
        ));

        info!(
            event = "gateway_ready",
            listen_addr = %local_addr,
            origin = %self.config.origin.address,
            "gRPC edge gateway is ready and accepting connections"
        );

        let state = Arc::clone(&self.state);
        let handler = move |request: Request<Incoming>, peer_addr: SocketAddr| {
            let state = Arc::clone(&state);
            async move { handle_request(&state, request, peer_addr).await }
        };

        server::accept_loop(
            listener,
            self.tls_handler,
            handler,
            self.shutdown_tx,
            self.connection_count,
        )
        .await?;

        info!("Gateway shutdown complete");
        Ok(())
    }

    /// Get server statistics for monitoring
    pub async fn get_stats(&self) -> ServerStats {
        self.stats_handle().get_stats().await
    }

    /// Handle that keeps reporting statistics after `serve` takes the server
    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle {
            state: Arc::clone(&self.state),
            connection_count: Arc::clone(&self.connection_count),
        }
    }
}

#[derive(Clone)]
pub struct StatsHandle {
    state: Arc<GatewayState>,
    connection_count: Arc<AtomicUsize>,
}

impl StatsHandle {
    pub async fn get_stats(&self) -> ServerStats {
        ServerStats {
            origin_sessions: self.state.forwarder.pool_stats().await,
            routing_stats: self.state.routes.get_routing_stats(),
            active_connections: self.connection_count.load(Ordering::Relaxed),
        }
    }
}

/// Dispatch one request by path
async fn handle_request(state: &GatewayState, request: Request<Incoming>, peer_addr: SocketAddr) -> Response<GatewayBody> {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let dispatch = state.routes.match_path(&path);

    debug!(
        event = "request_received",
        peer_addr = %peer_addr,
        method = %method,
        path = %path,
        dispatch = ?dispatch,
        "Processing request"
    );

    let response = match dispatch {
        Dispatch::Forward => state.forwarder.forward(request).await,
        Dispatch::Local(handler) => state.local.serve(handler, request),
        Dispatch::Index => plain_response(StatusCode::OK, INDEX_BODY),
        Dispatch::NotFound => {
            let error = GatewayError::no_route(path.as_str());
            info!(
                event = "route_not_found",
                peer_addr = %peer_addr,
                path = %path,
                category = error.category().as_str(),
                "No route for request"
            );
            plain_response(error.to_status_code(), NOT_FOUND_BODY)
        }
    };

    info!(
        event = "request_dispatched",
        peer_addr = %peer_addr,
        method = %method,
        path = %path,
        status = %response.status(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Response headers sent"
    );
    response
}

/// Log server statistics periodically for monitoring
async fn log_server_stats(
    state: Arc<GatewayState>,
    connection_count: Arc<AtomicUsize>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut stats_interval = tokio::time::interval(Duration::from_secs(300));

    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                let routing_stats = state.routes.get_routing_stats();
                info!(
                    event = "server_stats",
                    active_connections = connection_count.load(Ordering::Relaxed),
                    forward_rules = routing_stats.forward_rules,
                    local_rules = routing_stats.local_rules,
                    "Server statistics"
                );
                for (origin, requests) in state.forwarder.pool_stats().await {
                    info!("  Origin session {}: {} requests", origin, requests);
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Statistics logging task shutting down");
                break;
            }
        }
    }
}

/// Server statistics for monitoring
#[derive(Debug, Clone)]
pub struct ServerStats {
    /// Requests served per cached origin session
    pub origin_sessions: HashMap<String, u64>,
    pub routing_stats: RoutingStats,
    /// Number of active client connections
    pub active_connections: usize,
}
