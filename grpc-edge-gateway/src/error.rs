//! Error handling module
//!
//! Defines the gateway error taxonomy with HTTP and gRPC status mapping

use crate::rpc::status::{Code, Status};
use hyper::StatusCode;
use thiserror::Error;

/// Main error type for the gateway and the origin backend
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Bad or missing configuration or credential material. Fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No route matched the request path
    #[error("No route found for path: {path}")]
    RouteError { path: String },

    /// Origin unreachable or the outbound handshake failed
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The origin connection died after the response had started
    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    /// Malformed or out-of-sequence message on a stream
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The caller-supplied deadline elapsed
    #[error("Deadline exceeded after {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("YAML parsing error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

impl GatewayError {
    /// Convert to the HTTP status used for non-gRPC replies
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteError { .. } => StatusCode::NOT_FOUND,
            GatewayError::ProtocolError(_) => StatusCode::BAD_REQUEST,
            GatewayError::TransportError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::StreamAborted(_) => StatusCode::BAD_GATEWAY,
            GatewayError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ConfigError(_)
            | GatewayError::Tls(_)
            | GatewayError::Io(_)
            | GatewayError::Http(_)
            | GatewayError::Serialization(_)
            | GatewayError::AddrParse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// gRPC status code reported to callers for this error
    pub fn grpc_code(&self) -> Code {
        match self {
            GatewayError::RouteError { .. } => Code::NotFound,
            GatewayError::TransportError(_) => Code::Unavailable,
            GatewayError::StreamAborted(_) => Code::Aborted,
            GatewayError::ProtocolError(_) => Code::Internal,
            GatewayError::DeadlineExceeded { .. } => Code::DeadlineExceeded,
            GatewayError::Io(_) | GatewayError::Http(_) => Code::Unavailable,
            GatewayError::ConfigError(_)
            | GatewayError::Tls(_)
            | GatewayError::Serialization(_)
            | GatewayError::AddrParse(_) => Code::Internal,
        }
    }

    /// Terminal status carrying the error kind and a readable reason
    pub fn to_status(&self) -> Status {
        Status::new(self.grpc_code(), self.to_string())
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::ConfigError(_) | GatewayError::Serialization(_) | GatewayError::AddrParse(_) => {
                ErrorCategory::Configuration
            }
            GatewayError::RouteError { .. } => ErrorCategory::Routing,
            GatewayError::TransportError(_) | GatewayError::StreamAborted(_) => ErrorCategory::Transport,
            GatewayError::ProtocolError(_) | GatewayError::Http(_) => ErrorCategory::Protocol,
            GatewayError::DeadlineExceeded { .. } => ErrorCategory::Deadline,
            GatewayError::Tls(_) => ErrorCategory::Tls,
            GatewayError::Io(_) => ErrorCategory::Network,
        }
    }

    /// Only configuration failures are allowed to terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Configuration)
    }
}

/// Error categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Routing,
    Transport,
    Protocol,
    Deadline,
    Tls,
    Network,
}

impl ErrorCategory {
    /// Get string representation for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Routing => "routing",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Deadline => "deadline",
            ErrorCategory::Tls => "tls",
            ErrorCategory::Network => "network",
        }
    }
}

/// Helper functions for creating specific error types
impl GatewayError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        GatewayError::ConfigError(message.into())
    }

    pub fn no_route<S: Into<String>>(path: S) -> Self {
        GatewayError::RouteError { path: path.into() }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        GatewayError::TransportError(message.into())
    }

    pub fn stream_aborted<S: Into<String>>(message: S) -> Self {
        GatewayError::StreamAborted(message.into())
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        GatewayError::ProtocolError(message.into())
    }

    pub fn deadline(timeout: std::time::Duration) -> Self {
        GatewayError::DeadlineExceeded { timeout_ms: timeout.as_millis() as u64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(GatewayError::no_route("/x").to_status_code(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::transport("refused").to_status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            GatewayError::deadline(Duration::from_millis(5)).to_status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::config("bad cert").to_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_stream_aborted_status() {
        let status = GatewayError::stream_aborted("origin stream failed: reset").to_status();
        assert_eq!(status.code(), Code::Aborted);
        assert!(status.message().contains("origin stream failed: reset"));
        assert_eq!(
            GatewayError::stream_aborted("reset").category(),
            ErrorCategory::Transport
        );
    }

    #[test]
    fn test_taxonomy_grpc_codes() {
        assert_eq!(GatewayError::transport("down").grpc_code(), Code::Unavailable);
        assert_eq!(GatewayError::StreamAborted("reset".into()).grpc_code(), Code::Aborted);
        assert_eq!(GatewayError::protocol("bad frame").grpc_code(), Code::Internal);
        assert_eq!(
            GatewayError::deadline(Duration::from_secs(1)).grpc_code(),
            Code::DeadlineExceeded
        );
        assert_eq!(GatewayError::no_route("/nope").grpc_code(), Code::NotFound);
    }

    #[test]
    fn test_deadline_is_distinct_from_transport() {
        let deadline = GatewayError::deadline(Duration::from_millis(250));
        let transport = GatewayError::transport("connection refused");
        assert_ne!(deadline.category(), transport.category());
        assert_ne!(deadline.grpc_code(), transport.grpc_code());
        assert_eq!(deadline.to_string(), "Deadline exceeded after 250ms");
    }

    #[test]
    fn test_status_carries_reason() {
        let status = GatewayError::protocol("truncated message").to_status();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("truncated message"));
    }

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(GatewayError::config("missing key").is_fatal());
        assert!(!GatewayError::transport("down").is_fatal());
        assert!(!GatewayError::no_route("/x").is_fatal());
        assert_eq!(GatewayError::config("x").category().as_str(), "configuration");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: GatewayError = io.into();
        assert!(matches!(err, GatewayError::Io(_)));
        assert_eq!(err.category(), ErrorCategory::Network);
    }
}
