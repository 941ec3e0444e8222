//! Gateway components module
//!
//! Contains the main components of the gateway:
//! - TLS identity builder and connection acceptor
//! - Route table mapping paths to forward or local handling
//! - Local health and reflection handlers
//! - Forwarder relaying calls to the origin

pub mod forwarder;
pub mod local;
pub mod router;
pub mod tls;

pub use forwarder::Http2Forwarder;
pub use local::LocalHandlers;
pub use router::{Dispatch, RouteTable};
pub use tls::{build_identity, TlsHandler, TlsMaterial, TlsRole};
