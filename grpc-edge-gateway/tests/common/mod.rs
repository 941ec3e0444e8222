//! Shared fixtures: a throwaway PKI on disk, and helpers that start the
//! origin, the gateway and scripted fake origins on ephemeral ports

#![allow(dead_code)]

use grpc_edge_gateway::body::GatewayBody;
use grpc_edge_gateway::components::tls::{ClientIdentity, PeerVerification, TlsMaterial};
use grpc_edge_gateway::components::{build_identity, TlsHandler, TlsRole};
use grpc_edge_gateway::config::{
    GatewayConfig, ListenConfig, LoggingConfig, OriginConfig, OriginEndpoint, RoutingConfig, TlsConfig,
    VerificationMode,
};
use grpc_edge_gateway::rpc::client::ChatClient;
use grpc_edge_gateway::{server, GatewayServer, OriginServer, StatsHandle};
use hyper::body::Incoming;
use hyper::{Request, Response};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const SERVER_NAME: &str = "localhost";

/// PEM files for one CA and the leaves it signed
pub struct Pki {
    _dir: TempDir,
    pub ca: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

fn authority() -> Authority {
    let mut params = CertificateParams::new(vec![]).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Authority { cert, key }
}

fn leaf(ca: &Authority, purpose: ExtendedKeyUsagePurpose) -> (String, String) {
    let mut params = CertificateParams::new(vec![SERVER_NAME.to_string()]).unwrap();
    params.extended_key_usages = vec![purpose];
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    (cert.pem(), key.serialize_pem())
}

impl Pki {
    pub fn generate() -> Self {
        let dir = TempDir::new().unwrap();
        let ca = authority();
        let (server_cert, server_key) = leaf(&ca, ExtendedKeyUsagePurpose::ServerAuth);
        let (client_cert, client_key) = leaf(&ca, ExtendedKeyUsagePurpose::ClientAuth);

        let write = |name: &str, contents: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        };

        Pki {
            ca: write("ca.pem", &ca.cert.pem()),
            server_cert: write("server.pem", &server_cert),
            server_key: write("server-key.pem", &server_key),
            client_cert: write("client.pem", &client_cert),
            client_key: write("client-key.pem", &client_key),
            _dir: dir,
        }
    }

    /// Identity of a well-behaved caller: verifies the server, presents a client cert
    pub fn client_identity(&self) -> ClientIdentity {
        let material = TlsMaterial::from_files(Some(&self.client_cert), Some(&self.client_key), Some(&self.ca))
            .unwrap()
            .with_peer_name(SERVER_NAME);
        build_identity(TlsRole::OriginClient, &material).unwrap().into_client().unwrap()
    }

    /// Verifies the server but presents no certificate
    pub fn anonymous_identity(&self) -> ClientIdentity {
        let material = TlsMaterial::from_files(None, None, Some(&self.ca))
            .unwrap()
            .with_peer_name(SERVER_NAME);
        build_identity(TlsRole::OriginClient, &material).unwrap().into_client().unwrap()
    }

    pub fn origin_config(&self) -> OriginConfig {
        OriginConfig {
            listen: ListenConfig {
                address: "127.0.0.1".to_string(),
                port: 0,
            },
            cert_file: self.server_cert.clone(),
            key_file: self.server_key.clone(),
            client_ca_file: Some(self.ca.clone()),
            insecure: false,
            logging: LoggingConfig::default(),
        }
    }

    pub fn gateway_config(&self, origin: SocketAddr) -> GatewayConfig {
        GatewayConfig {
            listen: ListenConfig {
                address: "127.0.0.1".to_string(),
                port: 0,
            },
            tls: TlsConfig {
                cert_file: self.server_cert.clone(),
                key_file: self.server_key.clone(),
                client_ca_file: Some(self.ca.clone()),
                verification: VerificationMode::RequireAndVerify,
            },
            origin: OriginEndpoint {
                address: origin.to_string(),
                server_name: SERVER_NAME.to_string(),
                ca_file: Some(self.ca.clone()),
                cert_file: Some(self.client_cert.clone()),
                key_file: Some(self.client_key.clone()),
                timeout: Duration::from_secs(5),
            },
            routing: RoutingConfig::default(),
            insecure: false,
            logging: LoggingConfig::default(),
        }
    }
}

/// A running server; dropping it does not stop it, `stop` does
pub struct Running {
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl Running {
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn ephemeral_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub async fn spawn_origin(config: OriginConfig) -> Running {
    let server = OriginServer::new(config).unwrap();
    let shutdown_tx = server.shutdown_handle();
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(server.serve(listener));
    Running { addr, shutdown_tx }
}

pub async fn spawn_gateway(config: GatewayConfig) -> Running {
    spawn_gateway_with_stats(config).await.0
}

/// Gateway plus a handle onto its session statistics
pub async fn spawn_gateway_with_stats(config: GatewayConfig) -> (Running, StatsHandle) {
    let server = GatewayServer::new(config).unwrap();
    let shutdown_tx = server.shutdown_handle();
    let stats = server.stats_handle();
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(server.serve(listener));
    (Running { addr, shutdown_tx }, stats)
}

/// An mTLS origin whose every call is answered by `handler`
pub async fn spawn_fake_origin<H, Fut>(pki: &Pki, handler: H) -> Running
where
    H: Fn(Request<Incoming>, SocketAddr) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<GatewayBody>> + Send + 'static,
{
    let material = TlsMaterial::from_files(Some(&pki.server_cert), Some(&pki.server_key), Some(&pki.ca))
        .unwrap()
        .with_verification(PeerVerification::RequireAndVerify);
    let tls_handler = Arc::new(TlsHandler::new(TlsRole::OriginServer, &material).unwrap());
    let (shutdown_tx, _) = broadcast::channel(1);
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(server::accept_loop(
        listener,
        tls_handler,
        handler,
        shutdown_tx.clone(),
        Arc::new(AtomicUsize::new(0)),
    ));
    Running { addr, shutdown_tx }
}

/// Origin plus gateway in front of it, both with default settings
pub async fn spawn_stack(pki: &Pki) -> (Running, Running) {
    let origin = spawn_origin(pki.origin_config()).await;
    let gateway = spawn_gateway(pki.gateway_config(origin.addr)).await;
    (origin, gateway)
}

pub async fn connect(addr: SocketAddr, identity: &ClientIdentity) -> ChatClient {
    ChatClient::connect(&addr.to_string(), identity, Duration::from_secs(5))
        .await
        .unwrap()
}

/// A port nothing listens on
pub async fn closed_port() -> SocketAddr {
    let (listener, addr) = ephemeral_listener().await;
    drop(listener);
    addr
}
