//! HTTP/2 Forwarder Component
//!
//! Relays calls to the origin over a persistent HTTP/2 TLS session, keeping
//! framing and trailers intact

use crate::body::GatewayBody;
use crate::components::tls::{dial, ClientIdentity};
use crate::config::OriginEndpoint;
use crate::error::GatewayError;
use crate::rpc::status::{parse_timeout, Status, GRPC_TIMEOUT};
use crate::rpc::trailers_only;
use hyper::body::Incoming;
use hyper::client::conn::http2;
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{HeaderMap, Request, Response, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_ORIGIN_HOST: &str = "x-origin-host";

const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "upgrade",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "trailer",
];

/// Connection pool entry
#[derive(Debug)]
struct PooledSession {
    sender: http2::SendRequest<Incoming>,
    created_at: Instant,
    last_used: Instant,
    requests: u64,
}

/// One multiplexed HTTP/2 session per origin authority
#[derive(Debug)]
pub struct ConnectionPool {
    sessions: Arc<Mutex<HashMap<String, PooledSession>>>,
    max_idle_duration: Duration,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// Create a new connection pool
    pub fn new() -> Self {
        Self::with_idle_limit(Duration::from_secs(300))
    }

    pub fn with_idle_limit(max_idle_duration: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            max_idle_duration,
        }
    }

    /// Get the cached session for `address` or dial a new one
    pub async fn get_session(
        &self,
        address: &str,
        identity: &ClientIdentity,
        connect_timeout: Duration,
    ) -> Result<http2::SendRequest<Incoming>, GatewayError> {
        // Held across the dial so concurrent callers share one session
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get_mut(address) {
            if !session.sender.is_closed() {
                let mut sender = session.sender.clone();
                if sender.ready().await.is_ok() {
                    session.last_used = Instant::now();
                    session.requests += 1;
                    debug!("Reusing HTTP/2 session to {} (request #{})", address, session.requests);
                    return Ok(sender);
                }
            }
            info!(event = "origin_session_discarded", origin = address, "Cached origin session is closed");
            sessions.remove(address);
        }

        let sender = Self::connect(address, identity, connect_timeout).await?;
        let now = Instant::now();
        sessions.insert(
            address.to_string(),
            PooledSession {
                sender: sender.clone(),
                created_at: now,
                last_used: now,
                requests: 1,
            },
        );
        Ok(sender)
    }

    async fn connect(
        address: &str,
        identity: &ClientIdentity,
        connect_timeout: Duration,
    ) -> Result<http2::SendRequest<Incoming>, GatewayError> {
        debug!("Creating new HTTP/2 session to {}", address);
        let tls_stream = dial(address, identity, connect_timeout).await?;

        let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(tls_stream))
            .await
            .map_err(|e| GatewayError::transport(format!("HTTP/2 handshake failed with {}: {}", address, e)))?;

        let origin = address.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                error!("HTTP/2 session to {} failed: {}", origin, e);
            } else {
                debug!("HTTP/2 session to {} closed", origin);
            }
        });

        info!(event = "origin_session_established", origin = address, "Created new origin session");
        Ok(sender)
    }

    /// Clean up idle and closed sessions
    pub async fn cleanup_expired(&self) {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let before = sessions.len();

        sessions.retain(|key, session| {
            let expired = now.duration_since(session.last_used) >= self.max_idle_duration;
            let closed = session.sender.is_closed();
            if expired || closed {
                debug!(
                    "Removing session for {} (expired: {}, closed: {}, age: {:?})",
                    key,
                    expired,
                    closed,
                    now.duration_since(session.created_at)
                );
            }
            !expired && !closed
        });

        let removed = before - sessions.len();
        if removed > 0 {
            debug!("Cleaned up {} origin sessions", removed);
        }
    }

    /// Requests served per cached session
    pub async fn stats(&self) -> HashMap<String, u64> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .map(|(key, session)| (key.clone(), session.requests))
            .collect()
    }
}

/// HTTP/2 forwarder for the configured origin
pub struct Http2Forwarder {
    connection_pool: ConnectionPool,
    origin: OriginEndpoint,
    identity: ClientIdentity,
}

impl Http2Forwarder {
    pub fn new(origin: OriginEndpoint, identity: ClientIdentity) -> Self {
        Self::with_pool(origin, identity, ConnectionPool::new())
    }

    pub fn with_pool(origin: OriginEndpoint, identity: ClientIdentity, connection_pool: ConnectionPool) -> Self {
        Http2Forwarder {
            connection_pool,
            origin,
            identity,
        }
    }

    pub fn origin(&self) -> &OriginEndpoint {
        &self.origin
    }

    /// Forward a call to the origin and stream its response back.
    ///
    /// Failures before the origin answers become a trailers-only response;
    /// failures after that are reported by the relayed body.
    pub async fn forward(&self, mut request: Request<Incoming>) -> Response<GatewayBody> {
        let started = Instant::now();
        info!(
            event = "forward_request",
            origin = %self.origin.address,
            request = %request_dump(&request),
            "Forwarding request"
        );

        let caller_deadline = caller_timeout(request.headers());
        let budget = self.call_timeout(request.headers());
        if let Err(e) = self.prepare_request_for_forwarding(&mut request) {
            warn!("Cannot forward {}: {}", request.uri(), e);
            return trailers_only(e.to_status());
        }
        let path = request.uri().path().to_string();

        let sender = timeout(
            budget,
            self.connection_pool.get_session(&self.origin.address, &self.identity, budget),
        )
        .await;
        let mut sender = match sender {
            Ok(Ok(sender)) => sender,
            Ok(Err(e)) => return self.gateway_failure(&path, e),
            Err(_) => return self.gateway_failure(&path, GatewayError::deadline(budget)),
        };

        let remaining = budget.saturating_sub(started.elapsed());
        match timeout(remaining, sender.send_request(request)).await {
            Ok(Ok(response)) => {
                debug!(
                    event = "origin_response",
                    path = %path,
                    status = %response.status(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Origin response headers received"
                );
                // Only a caller-set deadline bounds the relayed body
                let body_deadline = caller_deadline.map(|deadline| deadline.saturating_sub(started.elapsed()));
                GatewayBody::relay(response, self.origin.address.clone(), body_deadline)
            }
            Ok(Err(e)) => self.gateway_failure(
                &path,
                GatewayError::transport(format!("Failed to send request to {}: {}", self.origin.address, e)),
            ),
            Err(_) => self.gateway_failure(&path, GatewayError::deadline(budget)),
        }
    }

    /// Limit on reaching the origin and receiving its response headers:
    /// the shorter of the configured origin timeout and the caller's `grpc-timeout`
    pub fn call_timeout(&self, headers: &HeaderMap) -> Duration {
        caller_timeout(headers)
            .map(|caller| caller.min(self.origin.timeout))
            .unwrap_or(self.origin.timeout)
    }

    fn gateway_failure(&self, path: &str, error: GatewayError) -> Response<GatewayBody> {
        let status: Status = error.to_status();
        warn!(
            event = "forward_failed",
            origin = %self.origin.address,
            path = path,
            category = error.category().as_str(),
            grpc_status = %status.code(),
            error = %error,
            "Origin call failed before any response"
        );
        trailers_only(status)
    }

    /// Point the request at the origin and add provenance headers
    pub fn prepare_request_for_forwarding<B>(&self, request: &mut Request<B>) -> Result<(), GatewayError> {
        let inbound_proto = format!("{:?}", request.version());
        let inbound_host = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| {
                request
                    .headers()
                    .get(HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let new_uri = format!("https://{}{}", self.origin.address, path_and_query)
            .parse::<Uri>()
            .map_err(|e| GatewayError::protocol(format!("Invalid origin URI: {}", e)))?;
        *request.uri_mut() = new_uri;

        let headers = request.headers_mut();

        let preserve_te_trailers = headers
            .get_all("te")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("trailers"));
        for name in HOP_BY_HOP {
            headers.remove(name);
        }
        headers.remove("te");
        headers.remove(HOST);
        if preserve_te_trailers {
            headers.insert("te", HeaderValue::from_static("trailers"));
        }

        append_header(headers, X_FORWARDED_PROTO, &inbound_proto)?;
        append_header(headers, X_FORWARDED_HOST, &inbound_host)?;
        append_header(headers, X_ORIGIN_HOST, &self.origin.address)?;

        debug!("Prepared request for forwarding to {}", request.uri());
        Ok(())
    }

    /// Get connection pool statistics
    pub async fn pool_stats(&self) -> HashMap<String, u64> {
        self.connection_pool.stats().await
    }

    /// Clean up expired connections in the pool
    pub async fn cleanup_connections(&self) {
        self.connection_pool.cleanup_expired().await;
    }
}

fn append_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), GatewayError> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| GatewayError::protocol(format!("Invalid {} value {:?}: {}", name, value, e)))?;
    headers.append(HeaderName::from_static(name), value);
    Ok(())
}

/// Deadline the caller set with `grpc-timeout`, if any
fn caller_timeout(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(GRPC_TIMEOUT)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_timeout)
}

/// Request line followed by one `name: value` line per header
pub fn request_dump<B>(request: &Request<B>) -> String {
    let mut dump = format!("{} {} {:?}", request.method(), request.uri(), request.version());
    for (name, value) in request.headers() {
        let _ = write!(dump, "\n{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
    }
    dump
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tls::{build_identity, TlsMaterial, TlsRole};
    use hyper::{Method, Version};

    fn forwarder(timeout: Duration) -> Http2Forwarder {
        let identity = build_identity(TlsRole::InsecureClient, &TlsMaterial::new().with_peer_name("localhost"))
            .unwrap()
            .into_client()
            .unwrap();
        let origin = OriginEndpoint {
            address: "origin.internal:50051".to_string(),
            timeout,
            ..OriginEndpoint::default()
        };
        Http2Forwarder::new(origin, identity)
    }

    fn grpc_request() -> Request<()> {
        Request::builder()
            .method(Method::POST)
            .version(Version::HTTP_2)
            .uri("https://gateway.example:50050/chat.Greeter/SayHello")
            .header("content-type", "application/grpc")
            .header("te", "trailers")
            .header("connection", "keep-alive")
            .header("upgrade", "websocket")
            .header("grpc-timeout", "30S")
            .body(())
            .unwrap()
    }

    #[test]
    fn test_request_preparation() {
        let forwarder = forwarder(Duration::from_secs(30));
        let mut request = grpc_request();
        forwarder.prepare_request_for_forwarding(&mut request).unwrap();

        assert_eq!(request.uri().scheme_str(), Some("https"));
        assert_eq!(request.uri().authority().unwrap().as_str(), "origin.internal:50051");
        assert_eq!(request.uri().path(), "/chat.Greeter/SayHello");

        let headers = request.headers();
        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("upgrade"));
        assert_eq!(headers.get("te").unwrap(), "trailers");
        assert_eq!(headers.get("content-type").unwrap(), "application/grpc");
        assert_eq!(headers.get("grpc-timeout").unwrap(), "30S");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "HTTP/2.0");
        assert_eq!(headers.get(X_FORWARDED_HOST).unwrap(), "gateway.example:50050");
        assert_eq!(headers.get(X_ORIGIN_HOST).unwrap(), "origin.internal:50051");
    }

    #[test]
    fn test_provenance_headers_are_appended() {
        let forwarder = forwarder(Duration::from_secs(30));
        let mut request = grpc_request();
        request
            .headers_mut()
            .insert(X_FORWARDED_HOST, HeaderValue::from_static("edge-1.example"));
        forwarder.prepare_request_for_forwarding(&mut request).unwrap();

        let hosts: Vec<_> = request.headers().get_all(X_FORWARDED_HOST).iter().collect();
        assert_eq!(hosts, vec!["edge-1.example", "gateway.example:50050"]);
    }

    #[test]
    fn test_te_without_trailers_is_dropped() {
        let forwarder = forwarder(Duration::from_secs(30));
        let mut request = grpc_request();
        request.headers_mut().insert("te", HeaderValue::from_static("gzip"));
        forwarder.prepare_request_for_forwarding(&mut request).unwrap();
        assert!(!request.headers().contains_key("te"));
    }

    #[test]
    fn test_call_timeout_takes_shorter() {
        let forwarder = forwarder(Duration::from_secs(10));
        let mut headers = HeaderMap::new();
        assert_eq!(forwarder.call_timeout(&headers), Duration::from_secs(10));

        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("250m"));
        assert_eq!(forwarder.call_timeout(&headers), Duration::from_millis(250));

        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("1M"));
        assert_eq!(forwarder.call_timeout(&headers), Duration::from_secs(10));

        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("soon"));
        assert_eq!(forwarder.call_timeout(&headers), Duration::from_secs(10));
    }

    #[test]
    fn test_caller_timeout_only_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_timeout(&headers), None);

        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("1M"));
        assert_eq!(caller_timeout(&headers), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_request_dump() {
        let request = grpc_request();
        let dump = request_dump(&request);
        let mut lines = dump.lines();
        assert_eq!(
            lines.next().unwrap(),
            "POST https://gateway.example:50050/chat.Greeter/SayHello HTTP/2.0"
        );
        assert!(dump.contains("\ncontent-type: application/grpc"));
        assert!(dump.contains("\nte: trailers"));
    }

    #[tokio::test]
    async fn test_connection_pool_creation_and_cleanup() {
        let pool = ConnectionPool::with_idle_limit(Duration::from_millis(1));
        pool.cleanup_expired().await;
        assert!(pool.stats().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_transport_error() {
        let identity = build_identity(TlsRole::InsecureClient, &TlsMaterial::new().with_peer_name("localhost"))
            .unwrap()
            .into_client()
            .unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let pool = ConnectionPool::new();
        let result = pool.get_session(&address, &identity, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GatewayError::TransportError(_))));
        assert!(pool.stats().await.is_empty());
    }
}
