//! gRPC-over-HTTP/2 primitives: framing, status, streams, the exchange
//! engine and a small client

pub mod catalog;
pub mod client;
pub mod codec;
pub mod engine;
pub mod join;
pub mod messages;
pub mod service;
pub mod status;
pub mod stream;

pub use catalog::{Method, Shape};
pub use engine::Engine;
pub use status::{Code, Status};

use crate::body::GatewayBody;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::Response;

pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// `content-type` is `application/grpc` or one of its `+proto` style variants
pub fn is_grpc_request(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|ct| ct.starts_with(GRPC_CONTENT_TYPE))
        .unwrap_or(false)
}

/// A response with no body whose status travels in the headers
pub fn trailers_only(status: Status) -> Response<GatewayBody> {
    let mut response = Response::new(GatewayBody::empty());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    status.add_to(headers);
    response
}
