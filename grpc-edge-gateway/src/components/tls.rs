//! TLS Identity Builder
//!
//! One parameterized builder for every TLS role in the system, plus the
//! accept/dial helpers used by the gateway, the origin and the client.

use crate::error::GatewayError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use rustls_pemfile::{certs, private_key};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};

const ALPN_H2: &[u8] = b"h2";

/// How a server treats client certificates (or a client the server's)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerification {
    None,
    VerifyIfPresent,
    RequireAndVerify,
}

impl Default for PeerVerification {
    fn default() -> Self {
        PeerVerification::RequireAndVerify
    }
}

/// The roles a TLS configuration can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    /// Server accepting callers; client verification follows the material
    CallerServer,
    /// Client dialing a server it verifies, optionally presenting a certificate
    OriginClient,
    /// Server that only accepts verified clients (the gateway)
    OriginServer,
    /// Client that skips server verification
    InsecureClient,
    /// Server that never asks for a client certificate
    InsecureServer,
}

impl TlsRole {
    pub fn is_insecure(&self) -> bool {
        matches!(self, TlsRole::InsecureClient | TlsRole::InsecureServer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsRole::CallerServer => "caller-server",
            TlsRole::OriginClient => "origin-client",
            TlsRole::OriginServer => "origin-server",
            TlsRole::InsecureClient => "insecure-client",
            TlsRole::InsecureServer => "insecure-server",
        }
    }
}

/// Certificate, key and trust material for one role
#[derive(Debug, Default)]
pub struct TlsMaterial {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: Option<PrivateKeyDer<'static>>,
    pub trust_roots: Vec<CertificateDer<'static>>,
    pub verification: PeerVerification,
    /// Expected server identity, used by client roles
    pub peer_name: Option<String>,
}

impl TlsMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read material from PEM files. Missing paths leave the field empty.
    pub fn from_files(cert: Option<&Path>, key: Option<&Path>, trust_roots: Option<&Path>) -> Result<Self, GatewayError> {
        let mut material = Self::new();
        if let Some(path) = cert {
            material.cert_chain = parse_certs(&read_pem(path, "certificate")?, &path.display().to_string())?;
        }
        if let Some(path) = key {
            material.private_key = Some(parse_private_key(&read_pem(path, "private key")?, &path.display().to_string())?);
        }
        if let Some(path) = trust_roots {
            material.trust_roots = parse_certs(&read_pem(path, "trust bundle")?, &path.display().to_string())?;
        }
        Ok(material)
    }

    pub fn with_cert_chain_pem(mut self, pem: &[u8]) -> Result<Self, GatewayError> {
        self.cert_chain = parse_certs(pem, "certificate")?;
        Ok(self)
    }

    pub fn with_private_key_pem(mut self, pem: &[u8]) -> Result<Self, GatewayError> {
        self.private_key = Some(parse_private_key(pem, "private key")?);
        Ok(self)
    }

    pub fn with_trust_roots_pem(mut self, pem: &[u8]) -> Result<Self, GatewayError> {
        self.trust_roots = parse_certs(pem, "trust bundle")?;
        Ok(self)
    }

    pub fn with_verification(mut self, verification: PeerVerification) -> Self {
        self.verification = verification;
        self
    }

    pub fn with_peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = Some(name.into());
        self
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, GatewayError> {
    std::fs::read(path)
        .map_err(|e| GatewayError::config(format!("Failed to read {} file {}: {}", what, path.display(), e)))
}

/// Parse every certificate in a PEM bundle
pub fn parse_certs(pem: &[u8], source: &str) -> Result<Vec<CertificateDer<'static>>, GatewayError> {
    let mut reader = pem;
    let certs: Result<Vec<_>, _> = certs(&mut reader).collect();
    let certs = certs.map_err(|e| GatewayError::config(format!("Failed to parse certificates from {}: {}", source, e)))?;

    if certs.is_empty() {
        return Err(GatewayError::config(format!("No certificates found in {}", source)));
    }

    Ok(certs)
}

/// Parse the first private key in a PEM document
pub fn parse_private_key(pem: &[u8], source: &str) -> Result<PrivateKeyDer<'static>, GatewayError> {
    let mut reader = pem;
    private_key(&mut reader)
        .map_err(|e| GatewayError::config(format!("Failed to parse private key from {}: {}", source, e)))?
        .ok_or_else(|| GatewayError::config(format!("No private key found in {}", source)))
}

/// A built configuration for one role
#[derive(Clone)]
pub enum TlsIdentity {
    Server(Arc<ServerConfig>),
    Client(ClientIdentity),
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsIdentity::Server(_) => f.write_str("TlsIdentity::Server"),
            TlsIdentity::Client(client) => write!(f, "TlsIdentity::Client({:?})", client.server_name),
        }
    }
}

impl TlsIdentity {
    pub fn into_server(self) -> Result<Arc<ServerConfig>, GatewayError> {
        match self {
            TlsIdentity::Server(config) => Ok(config),
            TlsIdentity::Client(_) => Err(GatewayError::config("expected a server TLS role")),
        }
    }

    pub fn into_client(self) -> Result<ClientIdentity, GatewayError> {
        match self {
            TlsIdentity::Client(client) => Ok(client),
            TlsIdentity::Server(_) => Err(GatewayError::config("expected a client TLS role")),
        }
    }
}

/// Client configuration plus the name the server must present
#[derive(Clone)]
pub struct ClientIdentity {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the TLS configuration for `role` from `material`
pub fn build_identity(role: TlsRole, material: &TlsMaterial) -> Result<TlsIdentity, GatewayError> {
    if role.is_insecure() {
        tracing::warn!(
            event = "tls_insecure_mode",
            role = role.as_str(),
            "Peer verification disabled: running in degraded security mode"
        );
    }

    let identity = match role {
        TlsRole::CallerServer => TlsIdentity::Server(Arc::new(server_config(material, material.verification)?)),
        TlsRole::OriginServer => {
            TlsIdentity::Server(Arc::new(server_config(material, PeerVerification::RequireAndVerify)?))
        }
        TlsRole::InsecureServer => TlsIdentity::Server(Arc::new(server_config(material, PeerVerification::None)?)),
        TlsRole::OriginClient => TlsIdentity::Client(client_identity(material, true)?),
        TlsRole::InsecureClient => TlsIdentity::Client(client_identity(material, false)?),
    };

    tracing::info!(event = "tls_identity_built", role = role.as_str(), "TLS configuration ready");
    Ok(identity)
}

fn root_store(roots: &[CertificateDer<'static>]) -> Result<RootCertStore, GatewayError> {
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(roots.iter().cloned());
    if added == 0 {
        return Err(GatewayError::config("Trust bundle contains no usable certificate"));
    }
    if ignored > 0 {
        tracing::warn!("Ignored {} unparseable certificate(s) in trust bundle", ignored);
    }
    Ok(store)
}

fn server_config(material: &TlsMaterial, verification: PeerVerification) -> Result<ServerConfig, GatewayError> {
    if material.cert_chain.is_empty() {
        return Err(GatewayError::config("Server role requires a certificate"));
    }
    let key = material
        .private_key
        .as_ref()
        .ok_or_else(|| GatewayError::config("Server role requires a private key"))?
        .clone_key();

    let provider = crypto_provider();
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::config(format!("Unsupported TLS protocol versions: {}", e)))?;

    let builder = match verification {
        PeerVerification::None => {
            tracing::info!("Configuring TLS without client authentication");
            builder.with_no_client_auth()
        }
        PeerVerification::VerifyIfPresent | PeerVerification::RequireAndVerify => {
            if material.trust_roots.is_empty() {
                return Err(GatewayError::config(
                    "Client certificate verification requires at least one trust root",
                ));
            }
            let store = root_store(&material.trust_roots)?;
            let mut verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(store), provider);
            if verification == PeerVerification::VerifyIfPresent {
                verifier = verifier.allow_unauthenticated();
            }
            let verifier = verifier
                .build()
                .map_err(|e| GatewayError::config(format!("Failed to build client certificate verifier: {}", e)))?;
            tracing::info!("Configuring mutual TLS ({:?})", verification);
            builder.with_client_cert_verifier(verifier)
        }
    };

    let mut config = builder
        .with_single_cert(material.cert_chain.clone(), key)
        .map_err(|e| GatewayError::config(format!("Certificate and key do not form a usable pair: {}", e)))?;

    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(config)
}

fn client_identity(material: &TlsMaterial, verify_server: bool) -> Result<ClientIdentity, GatewayError> {
    let name = material
        .peer_name
        .clone()
        .ok_or_else(|| GatewayError::config("Client role requires an expected server name"))?;
    let server_name = ServerName::try_from(name.clone())
        .map_err(|e| GatewayError::config(format!("Invalid server name {:?}: {}", name, e)))?;

    let provider = crypto_provider();
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::config(format!("Unsupported TLS protocol versions: {}", e)))?;

    let builder = if verify_server {
        if material.trust_roots.is_empty() {
            return Err(GatewayError::config("Server verification requires at least one trust root"));
        }
        builder.with_root_certificates(root_store(&material.trust_roots)?)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoServerVerification(provider)))
    };

    let mut config = match (&material.private_key, material.cert_chain.is_empty()) {
        (Some(key), false) => builder
            .with_client_auth_cert(material.cert_chain.clone(), key.clone_key())
            .map_err(|e| GatewayError::config(format!("Client certificate and key do not form a usable pair: {}", e)))?,
        (None, false) => return Err(GatewayError::config("Client certificate given without a private key")),
        (_, true) => builder.with_no_client_auth(),
    };

    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(ClientIdentity {
        config: Arc::new(config),
        server_name,
    })
}

/// Accepts any server certificate; handshake signatures are still checked
#[derive(Debug)]
struct NoServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Accepts inbound TLS connections for one server role
pub struct TlsHandler {
    acceptor: TlsAcceptor,
    role: TlsRole,
}

impl TlsHandler {
    pub fn new(role: TlsRole, material: &TlsMaterial) -> Result<Self, GatewayError> {
        let config = build_identity(role, material)?.into_server()?;
        Ok(Self::from_config(role, config))
    }

    pub fn from_config(role: TlsRole, config: Arc<ServerConfig>) -> Self {
        TlsHandler {
            acceptor: TlsAcceptor::from(config),
            role,
        }
    }

    pub fn role(&self) -> TlsRole {
        self.role
    }

    /// Get the negotiated ALPN protocol from a TLS connection
    pub fn get_negotiated_protocol(&self, stream: &server::TlsStream<TcpStream>) -> Option<String> {
        stream
            .get_ref()
            .1
            .alpn_protocol()
            .map(|protocol| String::from_utf8_lossy(protocol).to_string())
    }

    pub fn is_http2_negotiated(&self, stream: &server::TlsStream<TcpStream>) -> bool {
        self.get_negotiated_protocol(stream).as_deref() == Some("h2")
    }

    /// Accept a TLS connection and perform the handshake
    pub async fn accept_connection(&self, stream: TcpStream) -> Result<server::TlsStream<TcpStream>, GatewayError> {
        let peer_addr = stream.peer_addr().ok();
        tracing::debug!("Accepting TLS connection from {:?}", peer_addr);

        match self.acceptor.accept(stream).await {
            Ok(tls_stream) => {
                let conn_info = self.get_connection_info(&tls_stream);
                tracing::info!(
                    event = "tls_connection_established",
                    role = self.role.as_str(),
                    peer_addr = ?peer_addr,
                    protocol = ?conn_info.negotiated_protocol,
                    cipher_suite = ?conn_info.cipher_suite,
                    tls_version = ?conn_info.protocol_version,
                    peer_certificates = conn_info.peer_certificates,
                    "TLS connection established"
                );
                Ok(tls_stream)
            }
            Err(e) => {
                tracing::warn!(
                    event = "tls_handshake_failed",
                    role = self.role.as_str(),
                    peer_addr = ?peer_addr,
                    error = %e,
                    "TLS handshake failed"
                );
                Err(GatewayError::Tls(format!("TLS handshake failed: {}", e)))
            }
        }
    }

    /// Get connection state information
    pub fn get_connection_info(&self, stream: &server::TlsStream<TcpStream>) -> ConnectionInfo {
        let (_, session) = stream.get_ref();

        ConnectionInfo {
            negotiated_protocol: session.alpn_protocol().map(|p| String::from_utf8_lossy(p).to_string()),
            cipher_suite: session.negotiated_cipher_suite().map(|cs| format!("{:?}", cs.suite())),
            protocol_version: session.protocol_version().map(|v| format!("{:?}", v)),
            peer_certificates: session.peer_certificates().map(|certs| certs.len()).unwrap_or(0),
        }
    }
}

/// Information about an established TLS connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub negotiated_protocol: Option<String>,
    pub cipher_suite: Option<String>,
    pub protocol_version: Option<String>,
    pub peer_certificates: usize,
}

/// Open a TCP connection and complete a client handshake
pub async fn dial(
    address: &str,
    identity: &ClientIdentity,
    connect_timeout: Duration,
) -> Result<client::TlsStream<TcpStream>, GatewayError> {
    let tcp_stream = timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| GatewayError::transport(format!("Connection timeout to {}", address)))?
        .map_err(|e| GatewayError::transport(format!("Failed to connect to {}: {}", address, e)))?;

    if let Err(e) = tcp_stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", address, e);
    }

    let connector = TlsConnector::from(Arc::clone(&identity.config));
    let tls_stream = timeout(connect_timeout, connector.connect(identity.server_name.clone(), tcp_stream))
        .await
        .map_err(|_| GatewayError::transport(format!("TLS handshake timeout with {}", address)))?
        .map_err(|e| GatewayError::transport(format!("TLS handshake with {} failed: {}", address, e)))?;

    let negotiated_h2 = tls_stream.get_ref().1.alpn_protocol() == Some(ALPN_H2);
    if !negotiated_h2 {
        return Err(GatewayError::transport(format!("{} did not negotiate HTTP/2", address)));
    }

    tracing::debug!(event = "tls_dial_completed", address = address, "Outbound TLS session established");
    Ok(tls_stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    struct Pki {
        ca_pem: String,
        leaf_pem: String,
        leaf_key_pem: String,
    }

    fn pki() -> Pki {
        let mut ca_params = CertificateParams::new(vec![]).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&leaf_key, &ca, &ca_key)
            .unwrap();

        Pki {
            ca_pem: ca.pem(),
            leaf_pem: leaf.pem(),
            leaf_key_pem: leaf_key.serialize_pem(),
        }
    }

    fn server_material(pki: &Pki) -> TlsMaterial {
        TlsMaterial::new()
            .with_cert_chain_pem(pki.leaf_pem.as_bytes())
            .unwrap()
            .with_private_key_pem(pki.leaf_key_pem.as_bytes())
            .unwrap()
    }

    #[test]
    fn test_caller_server_with_client_verification() {
        let pki = pki();
        let material = server_material(&pki).with_trust_roots_pem(pki.ca_pem.as_bytes()).unwrap();
        let config = build_identity(TlsRole::CallerServer, &material).unwrap().into_server().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_require_and_verify_without_roots_fails() {
        let pki = pki();
        let material = server_material(&pki).with_verification(PeerVerification::RequireAndVerify);
        let err = build_identity(TlsRole::CallerServer, &material).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigError(_)));

        // Origin servers always require verified clients
        let material = server_material(&pki).with_verification(PeerVerification::None);
        assert!(build_identity(TlsRole::OriginServer, &material).is_err());
    }

    #[test]
    fn test_server_without_key_fails() {
        let pki = pki();
        let material = TlsMaterial::new()
            .with_cert_chain_pem(pki.leaf_pem.as_bytes())
            .unwrap()
            .with_verification(PeerVerification::None);
        assert!(build_identity(TlsRole::CallerServer, &material).is_err());
    }

    #[test]
    fn test_mismatched_key_fails() {
        let pki = pki();
        let other = KeyPair::generate().unwrap();
        let material = TlsMaterial::new()
            .with_cert_chain_pem(pki.leaf_pem.as_bytes())
            .unwrap()
            .with_private_key_pem(other.serialize_pem().as_bytes())
            .unwrap()
            .with_verification(PeerVerification::None);
        let err = build_identity(TlsRole::CallerServer, &material).unwrap_err();
        assert!(err.to_string().contains("usable pair"));
    }

    #[test]
    fn test_unparseable_pem_is_config_error() {
        assert!(matches!(
            parse_certs(b"not a certificate", "inline"),
            Err(GatewayError::ConfigError(_))
        ));
        assert!(parse_private_key(b"", "inline").is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = TlsMaterial::from_files(Some(Path::new("/nonexistent/cert.pem")), None, None).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigError(_)));
    }

    #[test]
    fn test_origin_client_roles() {
        let pki = pki();
        let material = TlsMaterial::new()
            .with_trust_roots_pem(pki.ca_pem.as_bytes())
            .unwrap()
            .with_peer_name("localhost");
        let client = build_identity(TlsRole::OriginClient, &material).unwrap().into_client().unwrap();
        assert_eq!(client.config.alpn_protocols, vec![b"h2".to_vec()]);

        // With a client certificate for origins that demand mutual auth
        let material = server_material(&pki)
            .with_trust_roots_pem(pki.ca_pem.as_bytes())
            .unwrap()
            .with_peer_name("localhost");
        assert!(build_identity(TlsRole::OriginClient, &material).is_ok());
    }

    #[test]
    fn test_client_requires_roots_and_name() {
        let pki = pki();
        let no_roots = TlsMaterial::new().with_peer_name("localhost");
        assert!(build_identity(TlsRole::OriginClient, &no_roots).is_err());

        let no_name = TlsMaterial::new().with_trust_roots_pem(pki.ca_pem.as_bytes()).unwrap();
        assert!(build_identity(TlsRole::OriginClient, &no_name).is_err());
    }

    #[test]
    fn test_insecure_pair_needs_no_trust_roots() {
        let pki = pki();
        let client = TlsMaterial::new().with_peer_name("localhost");
        assert!(build_identity(TlsRole::InsecureClient, &client).is_ok());
        assert!(build_identity(TlsRole::InsecureServer, &server_material(&pki)).is_ok());
    }

    #[test]
    fn test_role_kind_mismatch() {
        let pki = pki();
        let identity = build_identity(TlsRole::InsecureServer, &server_material(&pki)).unwrap();
        assert!(identity.into_client().is_err());
    }
}
