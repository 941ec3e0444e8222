//! Response and request bodies
//!
//! [`GatewayBody`] is the single body type served by the gateway and the
//! origin. It either relays an upstream body (preserving trailers and turning
//! transport failures into an explicit status), drains a channel fed by the
//! RPC engine, or carries a small fixed payload.

use crate::error::GatewayError;
use crate::rpc::status::Status;
use bytes::Bytes;
use http::HeaderMap;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::Response;
use pin_project::pin_project;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

#[pin_project]
pub struct GatewayBody {
    #[pin]
    kind: Kind,
}

#[pin_project(project = KindProj)]
enum Kind {
    Relay(#[pin] RelayBody),
    Channel {
        data_rx: mpsc::Receiver<Bytes>,
        trailers_rx: Option<oneshot::Receiver<HeaderMap>>,
        data_done: bool,
    },
    Full {
        data: Option<Bytes>,
        trailers: Option<HeaderMap>,
    },
    Empty,
}

impl GatewayBody {
    /// Relay an origin response, ending it with DEADLINE_EXCEEDED if
    /// `timeout` elapses first. A trailers-only response is passed through as is.
    pub fn relay(response: Response<Incoming>, origin: impl Into<String>, timeout: Option<Duration>) -> Response<Self> {
        let status_in_headers = Status::from_header_map(response.headers()).is_some();
        response.map(|inner| Self {
            kind: Kind::Relay(RelayBody {
                inner,
                deadline: timeout.map(|t| Box::pin(tokio::time::sleep(t))),
                timeout,
                origin: origin.into(),
                saw_trailers: status_in_headers,
                done: false,
                started_at: Instant::now(),
            }),
        })
    }

    /// Body fed by a message channel. When `trailers_rx` is present the body
    /// always ends with trailers: a dropped sender yields INTERNAL.
    pub fn channel(data_rx: mpsc::Receiver<Bytes>, trailers_rx: Option<oneshot::Receiver<HeaderMap>>) -> Self {
        Self {
            kind: Kind::Channel {
                data_rx,
                trailers_rx,
                data_done: false,
            },
        }
    }

    pub fn full(data: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Full {
                data: Some(data.into()),
                trailers: None,
            },
        }
    }

    /// A complete body followed by trailers
    pub fn full_with_trailers(data: impl Into<Bytes>, trailers: HeaderMap) -> Self {
        Self {
            kind: Kind::Full {
                data: Some(data.into()),
                trailers: Some(trailers),
            },
        }
    }

    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }
}

impl Body for GatewayBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project().kind.project() {
            KindProj::Relay(relay) => relay.poll_relay(cx).map(|frame| frame.map(Ok)),
            KindProj::Channel {
                data_rx,
                trailers_rx,
                data_done,
            } => {
                if !*data_done {
                    match data_rx.poll_recv(cx) {
                        Poll::Ready(Some(data)) => return Poll::Ready(Some(Ok(Frame::data(data)))),
                        Poll::Ready(None) => *data_done = true,
                        Poll::Pending => return Poll::Pending,
                    }
                }

                let Some(rx) = trailers_rx.as_mut() else {
                    return Poll::Ready(None);
                };
                let trailers = match Pin::new(rx).poll(cx) {
                    Poll::Ready(Ok(trailers)) => trailers,
                    Poll::Ready(Err(_)) => {
                        warn!("Stream closed without status, reporting INTERNAL");
                        Status::internal("stream closed without status").to_header_map()
                    }
                    Poll::Pending => return Poll::Pending,
                };
                *trailers_rx = None;
                Poll::Ready(Some(Ok(Frame::trailers(trailers))))
            }
            KindProj::Full { data, trailers } => {
                if let Some(data) = data.take() {
                    if !data.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                }
                Poll::Ready(trailers.take().map(|t| Ok(Frame::trailers(t))))
            }
            KindProj::Empty => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Full { data, trailers } => {
                data.as_ref().map_or(true, |d| d.is_empty()) && trailers.is_none()
            }
            _ => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Full { data, .. } => SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64)),
            _ => SizeHint::default(),
        }
    }
}

/// Relays an origin body. Trailers pass through untouched; a transport
/// failure after the response started becomes an ABORTED trailer so the
/// caller never sees a silently truncated stream.
#[pin_project]
struct RelayBody {
    #[pin]
    inner: Incoming,
    deadline: Option<Pin<Box<Sleep>>>,
    timeout: Option<Duration>,
    origin: String,
    saw_trailers: bool,
    done: bool,
    started_at: Instant,
}

impl RelayBody {
    fn poll_relay(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame<Bytes>>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                *this.done = true;
                let timeout_ms = this.timeout.map(|t| t.as_millis()).unwrap_or_default();
                warn!(
                    event = "relay_deadline_exceeded",
                    origin = %this.origin,
                    timeout_ms = timeout_ms as u64,
                    "Deadline elapsed while relaying response"
                );
                let status = Status::deadline_exceeded(format!("deadline of {}ms exceeded", timeout_ms));
                return Poll::Ready(Some(Frame::trailers(status.to_header_map())));
            }
        }

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    *this.saw_trailers = true;
                    debug!("Relaying trailers from {}: {:?}", this.origin, trailers);
                    if let Some(status) = Status::from_header_map(trailers) {
                        info!(
                            event = "grpc_status_relayed",
                            origin = %this.origin,
                            grpc_status = %status.code(),
                            grpc_message = status.message(),
                            "gRPC status relayed"
                        );
                    }
                } else if let Some(data) = frame.data_ref() {
                    debug!("Relaying data frame from {}, size: {} bytes", this.origin, data.len());
                }
                Poll::Ready(Some(frame))
            }
            Poll::Ready(Some(Err(e))) => {
                *this.done = true;
                warn!(
                    event = "relay_aborted",
                    origin = %this.origin,
                    error = %e,
                    elapsed_ms = this.started_at.elapsed().as_millis() as u64,
                    "Origin stream failed mid-response"
                );
                let status = GatewayError::stream_aborted(format!("origin stream failed: {}", e)).to_status();
                Poll::Ready(Some(Frame::trailers(status.to_header_map())))
            }
            Poll::Ready(None) => {
                *this.done = true;
                if *this.saw_trailers {
                    debug!(
                        "Relay from {} completed in {:?}",
                        this.origin,
                        this.started_at.elapsed()
                    );
                    Poll::Ready(None)
                } else {
                    warn!(
                        event = "relay_missing_trailers",
                        origin = %this.origin,
                        "Origin ended the response without trailers"
                    );
                    let status = GatewayError::stream_aborted("origin closed the stream without a status").to_status();
                    Poll::Ready(Some(Frame::trailers(status.to_header_map())))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
