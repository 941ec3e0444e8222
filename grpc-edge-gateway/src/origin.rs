//! Origin backend: the chat services behind the gateway

use crate::components::TlsHandler;
use crate::config::OriginConfig;
use crate::error::GatewayError;
use crate::rpc::service::ChatService;
use crate::rpc::Engine;
use crate::server;
use hyper::body::Incoming;
use hyper::Request;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Serves `chat.Greeter`, `chat.Echo` and reflection over TLS
pub struct OriginServer {
    config: OriginConfig,
    tls_handler: Arc<TlsHandler>,
    engine: Engine<ChatService>,
    shutdown_tx: broadcast::Sender<()>,
}

impl OriginServer {
    pub fn new(config: OriginConfig) -> Result<Self, GatewayError> {
        if config.insecure {
            warn!(
                event = "insecure_mode",
                "Running with --insecure: client certificates are not required"
            );
        }
        let (role, material) = config.server_identity()?;
        let tls_handler = Arc::new(TlsHandler::new(role, &material)?);
        info!("Origin TLS initialized ({})", role.as_str());

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            tls_handler,
            engine: Engine::new(ChatService::new()),
            shutdown_tx,
        })
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn start(self) -> Result<(), GatewayError> {
        let listener = server::bind(self.config.socket_addr()?).await?;
        server::spawn_signal_handler(self.shutdown_tx.clone());
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), GatewayError> {
        info!(
            event = "origin_ready",
            listen_addr = %listener.local_addr()?,
            "Origin backend is ready and accepting connections"
        );

        let engine = self.engine;
        let handler = move |request: Request<Incoming>, peer_addr: SocketAddr| {
            let engine = engine.clone();
            async move {
                debug!(peer_addr = %peer_addr, path = %request.uri().path(), "Origin call");
                engine.serve(request)
            }
        };

        server::accept_loop(
            listener,
            self.tls_handler,
            handler,
            self.shutdown_tx,
            Arc::new(AtomicUsize::new(0)),
        )
        .await?;

        info!("Origin shutdown complete");
        Ok(())
    }
}
