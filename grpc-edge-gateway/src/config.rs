//! Configuration module
//!
//! Handles loading and parsing of gateway and origin configuration

use crate::components::tls::{PeerVerification, TlsMaterial, TlsRole};
use crate::error::GatewayError;
use crate::rpc::catalog::{ECHO_SERVICE, GREETER_SERVICE, HEALTH_SERVICE, REFLECTION_SERVICE};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_GATEWAY_PORT: u16 = 50050;
pub const DEFAULT_ORIGIN_PORT: u16 = 50051;
pub const DEFAULT_SERVER_NAME: &str = "localhost";

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Listening address and port
    #[serde(default)]
    pub listen: ListenConfig,
    /// Caller-facing TLS material
    pub tls: TlsConfig,
    /// The single origin forwarded calls go to
    #[serde(default)]
    pub origin: OriginEndpoint,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Disable peer verification on both sides
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listen configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub address: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: DEFAULT_GATEWAY_PORT,
        }
    }
}

/// Caller-facing TLS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Trust bundle for client certificates
    #[serde(default)]
    pub client_ca_file: Option<PathBuf>,
    #[serde(default)]
    pub verification: VerificationMode,
}

/// Serialized form of [`PeerVerification`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationMode {
    None,
    VerifyIfPresent,
    #[default]
    RequireAndVerify,
}

impl From<VerificationMode> for PeerVerification {
    fn from(mode: VerificationMode) -> Self {
        match mode {
            VerificationMode::None => PeerVerification::None,
            VerificationMode::VerifyIfPresent => PeerVerification::VerifyIfPresent,
            VerificationMode::RequireAndVerify => PeerVerification::RequireAndVerify,
        }
    }
}

impl TlsConfig {
    /// Validate TLS configuration
    pub fn validate(&self) -> Result<(), GatewayError> {
        require_file(&self.cert_file, "TLS certificate")?;
        require_file(&self.key_file, "TLS key")?;
        if let Some(ref ca) = self.client_ca_file {
            require_file(ca, "client CA certificate")?;
        }
        if self.verification != VerificationMode::None && self.client_ca_file.is_none() {
            return Err(GatewayError::config(format!(
                "Client verification '{:?}' requires client_ca_file",
                self.verification
            )));
        }
        Ok(())
    }

    /// Role and material for the caller-facing listener
    pub fn server_identity(&self, insecure: bool) -> Result<(TlsRole, TlsMaterial), GatewayError> {
        let role = if insecure { TlsRole::InsecureServer } else { TlsRole::CallerServer };
        let ca = if insecure { None } else { self.client_ca_file.as_deref() };
        let material = TlsMaterial::from_files(Some(&self.cert_file), Some(&self.key_file), ca)?
            .with_verification(self.verification.into());
        Ok((role, material))
    }
}

/// Origin the forwarder talks to. Immutable after startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginEndpoint {
    #[serde(default = "default_origin_address")]
    pub address: String,
    /// Identity the origin certificate must carry
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Trust bundle for the origin certificate
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Client certificate presented to origins that require one
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for OriginEndpoint {
    fn default() -> Self {
        Self {
            address: default_origin_address(),
            server_name: default_server_name(),
            ca_file: None,
            cert_file: None,
            key_file: None,
            timeout: default_timeout(),
        }
    }
}

impl OriginEndpoint {
    /// Validate origin configuration
    pub fn validate(&self, insecure: bool) -> Result<(), GatewayError> {
        if self.address.rsplit_once(':').and_then(|(_, port)| port.parse::<u16>().ok()).is_none() {
            return Err(GatewayError::config(format!(
                "Invalid origin address '{}': expected host:port",
                self.address
            )));
        }
        if self.server_name.is_empty() {
            return Err(GatewayError::config("Origin server_name cannot be empty"));
        }
        if self.timeout.is_zero() {
            return Err(GatewayError::config("Origin timeout must be greater than 0"));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(GatewayError::config(
                "Origin client certificate and key must be provided together",
            ));
        }
        match (&self.ca_file, insecure) {
            (Some(ca), _) => require_file(ca, "origin CA certificate")?,
            (None, false) => {
                return Err(GatewayError::config(
                    "Origin ca_file is required unless running with --insecure",
                ))
            }
            (None, true) => {}
        }
        if let (Some(cert), Some(key)) = (&self.cert_file, &self.key_file) {
            require_file(cert, "origin client certificate")?;
            require_file(key, "origin client key")?;
        }
        Ok(())
    }

    /// Role and material for dialing the origin
    pub fn client_identity(&self, insecure: bool) -> Result<(TlsRole, TlsMaterial), GatewayError> {
        let role = if insecure { TlsRole::InsecureClient } else { TlsRole::OriginClient };
        let ca = if insecure { None } else { self.ca_file.as_deref() };
        let material = TlsMaterial::from_files(self.cert_file.as_deref(), self.key_file.as_deref(), ca)?
            .with_peer_name(self.server_name.clone());
        Ok((role, material))
    }
}

/// Routing configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoutingConfig {
    pub rules: Vec<RouteRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let rule = |service: &str, target| RouteRule {
            prefix: format!("/{}/", service),
            target,
        };
        Self {
            rules: vec![
                rule(GREETER_SERVICE, RouteTarget::Forward),
                rule(ECHO_SERVICE, RouteTarget::Forward),
                rule(HEALTH_SERVICE, RouteTarget::Health),
                rule(REFLECTION_SERVICE, RouteTarget::Reflection),
            ],
        }
    }
}

/// Path prefix and what serves it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteRule {
    pub prefix: String,
    pub target: RouteTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTarget {
    Forward,
    Health,
    Reflection,
}

/// Handlers answered in-process by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalHandler {
    Health,
    Reflection,
}

impl LocalHandler {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalHandler::Health => "health",
            LocalHandler::Reflection => "reflection",
        }
    }
}

impl RouteTarget {
    pub fn local_handler(&self) -> Option<LocalHandler> {
        match self {
            RouteTarget::Forward => None,
            RouteTarget::Health => Some(LocalHandler::Health),
            RouteTarget::Reflection => Some(LocalHandler::Reflection),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(GatewayError::config(format!(
                "Invalid log level '{}'. Valid levels: trace, debug, info, warn, error",
                self.level
            ))),
        }
    }
}

// Default value functions
fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_origin_address() -> String {
    format!("localhost:{}", DEFAULT_ORIGIN_PORT)
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn require_file(path: &Path, what: &str) -> Result<(), GatewayError> {
    if path.as_os_str().is_empty() {
        return Err(GatewayError::config(format!("{} file path is empty", what)));
    }
    if !path.exists() {
        return Err(GatewayError::config(format!("{} file not found: {}", what, path.display())));
    }
    Ok(())
}

/// Command-line arguments for the gateway
#[derive(Parser, Debug, Default)]
#[command(name = "grpc-edge-gateway")]
#[command(about = "mTLS edge gateway that forwards or locally answers gRPC calls")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override listen address
    #[arg(long)]
    pub listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Gateway certificate file
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Gateway key file
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// CA bundle used to verify caller certificates
    #[arg(long)]
    pub client_ca: Option<PathBuf>,

    /// Origin address (host:port)
    #[arg(long)]
    pub origin: Option<String>,

    /// Expected origin server name
    #[arg(long)]
    pub origin_server_name: Option<String>,

    /// CA bundle used to verify the origin certificate
    #[arg(long)]
    pub origin_ca: Option<PathBuf>,

    /// Client certificate presented to the origin
    #[arg(long)]
    pub origin_cert: Option<PathBuf>,

    /// Client key presented to the origin
    #[arg(long)]
    pub origin_key: Option<PathBuf>,

    /// Disable peer verification in both directions
    #[arg(long)]
    pub insecure: bool,

    /// Override log level
    #[arg(long)]
    pub log_level: Option<String>,
}

// Custom serde module for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl GatewayConfig {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config file {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, GatewayError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load configuration from command-line arguments
    pub fn from_args(args: Args) -> Result<Self, GatewayError> {
        let mut config = match args.config {
            Some(ref path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&content)?
            }
            None => {
                let (cert_file, key_file) = match (&args.tls_cert, &args.tls_key) {
                    (Some(cert), Some(key)) => (cert.clone(), key.clone()),
                    _ => {
                        return Err(GatewayError::config(
                            "Either --config or both --tls-cert and --tls-key must be provided",
                        ))
                    }
                };
                Self {
                    listen: ListenConfig::default(),
                    tls: TlsConfig {
                        cert_file,
                        key_file,
                        client_ca_file: None,
                        verification: VerificationMode::RequireAndVerify,
                    },
                    origin: OriginEndpoint::default(),
                    routing: RoutingConfig::default(),
                    insecure: false,
                    logging: LoggingConfig::default(),
                }
            }
        };

        if let Some(address) = args.listen_address {
            config.listen.address = address;
        }
        if let Some(port) = args.listen_port {
            config.listen.port = port;
        }
        if let Some(cert) = args.tls_cert {
            config.tls.cert_file = cert;
        }
        if let Some(key) = args.tls_key {
            config.tls.key_file = key;
        }
        if let Some(ca) = args.client_ca {
            config.tls.client_ca_file = Some(ca);
        }
        if let Some(origin) = args.origin {
            config.origin.address = origin;
        }
        if let Some(name) = args.origin_server_name {
            config.origin.server_name = name;
        }
        if let Some(ca) = args.origin_ca {
            config.origin.ca_file = Some(ca);
        }
        if let Some(cert) = args.origin_cert {
            config.origin.cert_file = Some(cert);
        }
        if let Some(key) = args.origin_key {
            config.origin.key_file = Some(key);
        }
        if args.insecure {
            config.insecure = true;
            config.tls.verification = VerificationMode::None;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration for testing
    pub fn default_for_testing() -> Self {
        Self {
            listen: ListenConfig {
                address: "127.0.0.1".to_string(),
                port: 0,
            },
            tls: TlsConfig {
                cert_file: PathBuf::from("test-cert.pem"),
                key_file: PathBuf::from("test-key.pem"),
                client_ca_file: Some(PathBuf::from("test-ca.pem")),
                verification: VerificationMode::RequireAndVerify,
            },
            origin: OriginEndpoint {
                ca_file: Some(PathBuf::from("test-ca.pem")),
                ..OriginEndpoint::default()
            },
            routing: RoutingConfig::default(),
            insecure: false,
            logging: LoggingConfig::default(),
        }
    }

    /// Get socket address for listening
    pub fn socket_addr(&self) -> Result<SocketAddr, GatewayError> {
        let addr = format!("{}:{}", self.listen.address, self.listen.port);
        addr.parse()
            .map_err(|e| GatewayError::config(format!("Invalid address: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.listen.address.is_empty() {
            return Err(GatewayError::config("Listen address cannot be empty"));
        }
        self.socket_addr()?;
        if self.insecure {
            require_file(&self.tls.cert_file, "TLS certificate")?;
            require_file(&self.tls.key_file, "TLS key")?;
        } else {
            self.tls.validate()?;
        }
        self.origin.validate(self.insecure)?;
        crate::components::router::RouteTable::validate_routing_config(&self.routing)?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Command-line arguments for the origin backend
#[derive(Parser, Debug)]
#[command(name = "grpc-origin")]
#[command(about = "Chat backend serving greeter, echo and reflection over TLS")]
#[command(version)]
pub struct OriginArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_address: String,

    #[arg(long, default_value_t = DEFAULT_ORIGIN_PORT)]
    pub listen_port: u16,

    #[arg(long)]
    pub tls_cert: PathBuf,

    #[arg(long)]
    pub tls_key: PathBuf,

    /// CA bundle used to verify the gateway's client certificate
    #[arg(long)]
    pub client_ca: Option<PathBuf>,

    /// Accept clients without a verified certificate
    #[arg(long)]
    pub insecure: bool,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Origin backend configuration
#[derive(Debug, Clone)]
pub struct OriginConfig {
    pub listen: ListenConfig,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub client_ca_file: Option<PathBuf>,
    pub insecure: bool,
    pub logging: LoggingConfig,
}

impl OriginConfig {
    pub fn from_args(args: OriginArgs) -> Result<Self, GatewayError> {
        let config = Self {
            listen: ListenConfig {
                address: args.listen_address,
                port: args.listen_port,
            },
            cert_file: args.tls_cert,
            key_file: args.tls_key,
            client_ca_file: args.client_ca,
            insecure: args.insecure,
            logging: LoggingConfig { level: args.log_level },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        require_file(&self.cert_file, "TLS certificate")?;
        require_file(&self.key_file, "TLS key")?;
        match (&self.client_ca_file, self.insecure) {
            (Some(ca), _) => require_file(ca, "client CA certificate")?,
            (None, false) => {
                return Err(GatewayError::config(
                    "--client-ca is required unless running with --insecure",
                ))
            }
            (None, true) => {}
        }
        self.socket_addr()?;
        self.logging.validate()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, GatewayError> {
        format!("{}:{}", self.listen.address, self.listen.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid address: {}", e)))
    }

    /// Role and material for the origin listener
    pub fn server_identity(&self) -> Result<(TlsRole, TlsMaterial), GatewayError> {
        if self.insecure {
            let material = TlsMaterial::from_files(Some(&self.cert_file), Some(&self.key_file), None)?;
            return Ok((TlsRole::InsecureServer, material));
        }
        let material = TlsMaterial::from_files(
            Some(&self.cert_file),
            Some(&self.key_file),
            self.client_ca_file.as_deref(),
        )?;
        Ok((TlsRole::OriginServer, material))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    struct Files {
        _dir: TempDir,
        cert: PathBuf,
        key: PathBuf,
        ca: PathBuf,
    }

    fn files() -> Files {
        let dir = TempDir::new().unwrap();
        let touch = |name: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, "placeholder").unwrap();
            path
        };
        let cert = touch("cert.pem");
        let key = touch("key.pem");
        let ca = touch("ca.pem");
        Files { _dir: dir, cert, key, ca }
    }

    fn yaml(files: &Files, extra: &str) -> String {
        format!(
            r#"
listen:
  address: "127.0.0.1"
  port: 50050
tls:
  cert_file: "{}"
  key_file: "{}"
  client_ca_file: "{}"
origin:
  address: "origin.internal:50051"
  ca_file: "{}"
{}
"#,
            files.cert.display(),
            files.key.display(),
            files.ca.display(),
            files.ca.display(),
            extra
        )
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_yaml_config() {
        let files = files();
        let file = write_config(&yaml(&files, "logging:\n  level: debug\n"));
        let config = GatewayConfig::from_file(file.path()).unwrap();

        assert_eq!(config.listen.port, 50050);
        assert_eq!(config.origin.address, "origin.internal:50051");
        assert_eq!(config.origin.server_name, "localhost");
        assert_eq!(config.origin.timeout, Duration::from_secs(30));
        assert_eq!(config.tls.verification, VerificationMode::RequireAndVerify);
        assert_eq!(config.routing.rules.len(), 4);
        assert!(!config.insecure);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_custom_routes() {
        let files = files();
        let extra = r#"
routing:
  rules:
    - prefix: /svcA/
      target: forward
    - prefix: /svcB/
      target: health
"#;
        let file = write_config(&yaml(&files, extra));
        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.routing.rules,
            vec![
                RouteRule { prefix: "/svcA/".into(), target: RouteTarget::Forward },
                RouteRule { prefix: "/svcB/".into(), target: RouteTarget::Health },
            ]
        );
    }

    #[test]
    fn test_invalid_routes_rejected() {
        let files = files();
        let extra = "routing:\n  rules:\n    - prefix: /\n      target: forward\n";
        let file = write_config(&yaml(&files, extra));
        assert!(matches!(
            GatewayConfig::from_file(file.path()),
            Err(GatewayError::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let result = GatewayConfig::from_file(Path::new("/nonexistent/gateway.yaml"));
        assert!(matches!(result, Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_yaml_config() {
        let file = write_config("listen: [not, a, map");
        assert!(GatewayConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_verification_requires_client_ca() {
        let files = files();
        let mut config = GatewayConfig::default_for_testing();
        config.tls.cert_file = files.cert.clone();
        config.tls.key_file = files.key.clone();
        config.tls.client_ca_file = None;
        config.origin.ca_file = Some(files.ca.clone());
        assert!(config.validate().is_err());

        config.tls.client_ca_file = Some(files.ca.clone());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_origin_requires_ca_unless_insecure() {
        let files = files();
        let mut config = GatewayConfig::default_for_testing();
        config.tls.cert_file = files.cert.clone();
        config.tls.key_file = files.key.clone();
        config.tls.client_ca_file = Some(files.ca.clone());
        config.origin.ca_file = None;
        assert!(config.validate().is_err());

        config.insecure = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_origin_cert_and_key_together() {
        let files = files();
        let origin = OriginEndpoint {
            ca_file: Some(files.ca.clone()),
            cert_file: Some(files.cert.clone()),
            ..OriginEndpoint::default()
        };
        assert!(origin.validate(false).is_err());
    }

    #[test]
    fn test_origin_address_validation() {
        let origin = OriginEndpoint {
            address: "no-port".into(),
            ..OriginEndpoint::default()
        };
        assert!(origin.validate(true).is_err());
    }

    #[test]
    fn test_args_without_config() {
        let files = files();
        let args = Args {
            tls_cert: Some(files.cert.clone()),
            tls_key: Some(files.key.clone()),
            client_ca: Some(files.ca.clone()),
            origin: Some("127.0.0.1:6000".into()),
            origin_ca: Some(files.ca.clone()),
            listen_port: Some(7000),
            ..Args::default()
        };
        let config = GatewayConfig::from_args(args).unwrap();
        assert_eq!(config.listen.port, 7000);
        assert_eq!(config.origin.address, "127.0.0.1:6000");
        assert_eq!(config.routing, RoutingConfig::default());
    }

    #[test]
    fn test_args_require_config_or_tls() {
        assert!(matches!(
            GatewayConfig::from_args(Args::default()),
            Err(GatewayError::ConfigError(_))
        ));
    }

    #[test]
    fn test_insecure_flag() {
        let files = files();
        let args = Args {
            tls_cert: Some(files.cert.clone()),
            tls_key: Some(files.key.clone()),
            insecure: true,
            ..Args::default()
        };
        let config = GatewayConfig::from_args(args).unwrap();
        assert!(config.insecure);
        assert_eq!(config.tls.verification, VerificationMode::None);
    }

    #[test]
    fn test_log_level_validation() {
        let files = files();
        let file = write_config(&yaml(&files, "logging:\n  level: loud\n"));
        assert!(GatewayConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_origin_config_requires_client_ca() {
        let files = files();
        let args = OriginArgs {
            listen_address: "127.0.0.1".into(),
            listen_port: 0,
            tls_cert: files.cert.clone(),
            tls_key: files.key.clone(),
            client_ca: None,
            insecure: false,
            log_level: "info".into(),
        };
        assert!(OriginConfig::from_args(args).is_err());
    }

    #[test]
    fn test_socket_addr_conversion() {
        let config = GatewayConfig::default_for_testing();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:0");
    }
}
