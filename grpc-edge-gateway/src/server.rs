//! TLS accept loop and HTTP/2 connection serving shared by the gateway and
//! the origin backend

use crate::body::GatewayBody;
use crate::components::TlsHandler;
use crate::error::GatewayError;
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Accept connections until a shutdown is broadcast, handing every request
/// to `handler`
pub async fn accept_loop<H, Fut>(
    listener: TcpListener,
    tls_handler: Arc<TlsHandler>,
    handler: H,
    shutdown_tx: broadcast::Sender<()>,
    connection_count: Arc<AtomicUsize>,
) -> Result<(), GatewayError>
where
    H: Fn(Request<Incoming>, SocketAddr) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<GatewayBody>> + Send + 'static,
{
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let current_connections = connection_count.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!("Accepted connection from {} (total connections: {})", peer_addr, current_connections);

                        let tls_handler = Arc::clone(&tls_handler);
                        let handler = handler.clone();
                        let connection_count = Arc::clone(&connection_count);
                        let mut shutdown_rx = shutdown_tx.subscribe();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, tls_handler, handler, &mut shutdown_rx).await {
                                debug!(
                                    event = "connection_failed",
                                    peer_addr = %peer_addr,
                                    category = e.category().as_str(),
                                    error = %e,
                                    "Connection ended with error"
                                );
                            }

                            let remaining_connections = connection_count.fetch_sub(1, Ordering::Relaxed) - 1;
                            debug!("Connection from {} closed (remaining connections: {})", peer_addr, remaining_connections);
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutting down accept loop");
                break;
            }
        }
    }

    Ok(())
}

/// Handle a single connection: TLS handshake, ALPN check, then HTTP/2
async fn handle_connection<H, Fut>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_handler: Arc<TlsHandler>,
    handler: H,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<(), GatewayError>
where
    H: Fn(Request<Incoming>, SocketAddr) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<GatewayBody>> + Send + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
    }

    let tls_stream = tokio::select! {
        result = tls_handler.accept_connection(stream) => result?,
        _ = shutdown_rx.recv() => {
            debug!("Connection from {} interrupted by shutdown during TLS handshake", peer_addr);
            return Ok(());
        }
    };

    if !tls_handler.is_http2_negotiated(&tls_stream) {
        warn!("HTTP/2 not negotiated for connection from {}, closing", peer_addr);
        return Err(GatewayError::protocol("HTTP/2 required for gRPC"));
    }

    let service = hyper::service::service_fn(move |request| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler(request, peer_addr).await) }
    });

    let conn = http2::Builder::new(TokioExecutor::new())
        .initial_stream_window_size(Some(1024 * 1024))
        .initial_connection_window_size(Some(1024 * 1024))
        .max_frame_size(Some(16384))
        .serve_connection(TokioIo::new(tls_stream), service);

    tokio::select! {
        result = conn => {
            match result {
                Ok(()) => debug!("HTTP/2 connection from {} completed normally", peer_addr),
                Err(e) if e.is_timeout() => warn!("HTTP/2 connection timeout from {}: {}", peer_addr, e),
                Err(e) if e.is_closed() => debug!("HTTP/2 connection closed by client {}: {}", peer_addr, e),
                Err(e) => error!("HTTP/2 connection error from {}: {}", peer_addr, e),
            }
        }
        _ = shutdown_rx.recv() => {
            info!("HTTP/2 connection from {} interrupted by graceful shutdown", peer_addr);
        }
    }

    Ok(())
}

/// Bind `addr`, reporting failures as configuration errors
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::config(format!("Failed to bind to {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| GatewayError::config(format!("Failed to get local address: {}", e)))?;
    info!("Bound to {}", local_addr);
    Ok(listener)
}

/// Broadcast a shutdown when SIGINT or SIGTERM arrives
pub fn spawn_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, initiating graceful shutdown");
        let _ = shutdown_tx.send(());
    });
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
