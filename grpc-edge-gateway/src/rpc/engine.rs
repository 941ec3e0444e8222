//! RPC exchange engine
//!
//! Drives one call per spawned task according to its [`Shape`]:
//!
//! - unary: one message each way, status right after the reply
//! - server-streaming: one request, a fixed ordered sequence of replies
//! - duplex: a receive task and a send task joined by a [`JoinBarrier`];
//!   the status is only written once both directions are done
//!
//! The response is returned as soon as the call is accepted; its body is
//! fed by the driver task.

use crate::body::GatewayBody;
use crate::rpc::catalog::{Method, Shape};
use crate::rpc::join::JoinBarrier;
use crate::rpc::service::RpcService;
use crate::rpc::status::Status;
use crate::rpc::stream::{CallContext, Message, MessageReader, MessageWriter, StreamTracker};
use crate::rpc::{is_grpc_request, trailers_only, GRPC_CONTENT_TYPE};
use bytes::Bytes;
use hyper::body::Body;
use hyper::header::CONTENT_TYPE;
use hyper::{Method as HttpMethod, Request, Response, StatusCode};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Requests queued between the receive and send directions of a duplex call
const DUPLEX_QUEUE: usize = 32;

pub struct Engine<S> {
    service: Arc<S>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: RpcService> Engine<S> {
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Accept one call and spawn its driver
    pub fn serve<B>(&self, request: Request<B>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Unpin + Send + 'static,
        B::Error: fmt::Display,
    {
        if request.method() != HttpMethod::POST {
            return plain_response(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed");
        }
        if !is_grpc_request(request.headers()) {
            return plain_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "415 unsupported media type");
        }

        let path = request.uri().path().to_string();
        let method = match Method::from_path(&path) {
            Some(method) if self.service.methods().contains(&method) => method,
            _ => {
                warn!(event = "rpc_unimplemented", path = %path, "Unknown method");
                return trailers_only(Status::unimplemented(format!("unknown method {}", path)));
            }
        };

        let ctx = match CallContext::from_headers(request.headers()) {
            Ok(ctx) => ctx,
            Err(status) => return trailers_only(status),
        };

        debug!(
            event = "rpc_started",
            method = %path,
            shape = ?method.shape(),
            timeout = ?ctx.timeout(),
            "Starting call"
        );

        let tracker = StreamTracker::new();
        let reader = MessageReader::new(request.into_body(), ctx.clone(), tracker.clone());
        let (writer, body) = MessageWriter::for_response(ctx.clone(), tracker);
        let service = Arc::clone(&self.service);

        match method.shape() {
            Shape::Unary => {
                tokio::spawn(async move {
                    let mut reader = reader;
                    let mut writer = writer;
                    let outcome = unary_exchange(service.as_ref(), method, &mut reader, &mut writer).await;
                    complete(writer, method, outcome);
                });
            }
            Shape::ServerStreaming => {
                tokio::spawn(async move {
                    let mut reader = reader;
                    let mut writer = writer;
                    let outcome = server_streaming_exchange(service.as_ref(), method, &mut reader, &mut writer).await;
                    complete(writer, method, outcome);
                });
            }
            Shape::Duplex => spawn_duplex(service, method, reader, writer, ctx),
        }

        grpc_response(body)
    }
}

async fn unary_exchange<S: RpcService, B>(
    service: &S,
    method: Method,
    reader: &mut MessageReader<B>,
    writer: &mut MessageWriter,
) -> Result<(), Status>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    let request = reader.single_message().await?;
    let reply = service.unary(method, request.payload)?;
    writer.send(&reply).await?;
    Ok(())
}

async fn server_streaming_exchange<S: RpcService, B>(
    service: &S,
    method: Method,
    reader: &mut MessageReader<B>,
    writer: &mut MessageWriter,
) -> Result<(), Status>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    let request = reader.single_message().await?;
    for reply in service.server_streaming(method, request.payload)? {
        writer.send(&reply).await?;
    }
    Ok(())
}

/// First failure of a duplex call; later failures are consequences of it
#[derive(Debug, Default)]
struct FirstFailure(Mutex<Option<Status>>);

impl FirstFailure {
    fn record(&self, status: Status) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(status);
        }
    }

    fn is_set(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn take(&self) -> Option<Status> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

fn spawn_duplex<S, B>(service: Arc<S>, method: Method, reader: MessageReader<B>, writer: MessageWriter, ctx: CallContext)
where
    S: RpcService,
    B: Body<Data = Bytes> + Unpin + Send + 'static,
    B::Error: fmt::Display,
{
    let barrier = JoinBarrier::new(2);
    let failure = Arc::new(FirstFailure::default());
    let (queue_tx, mut queue_rx) = mpsc::channel::<Message>(DUPLEX_QUEUE);

    // Receive direction: drain every inbound message in arrival order
    let recv_arrival = barrier.guard();
    let recv_failure = Arc::clone(&failure);
    let recv_ctx = ctx.clone();
    tokio::spawn(async move {
        let _arrival = recv_arrival;
        let mut reader = reader;
        loop {
            match reader.message().await {
                Ok(Some(message)) => {
                    if queue_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(status) => {
                    recv_failure.record(status);
                    recv_ctx.cancel();
                    break;
                }
            }
        }
        debug!("Receive direction of {} drained after {} messages", method.path(), reader.received());
    });

    // Send direction: one reply per request, then close once both sides arrived
    let send_arrival = barrier.guard();
    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = queue_rx.recv().await {
            if failure.is_set() {
                break;
            }
            let sent = match service.duplex_reply(method, message.payload) {
                Ok(reply) => writer.send(&reply).await.map(|_| ()),
                Err(status) => Err(status),
            };
            if let Err(status) = sent {
                failure.record(status);
                ctx.cancel();
                break;
            }
        }
        drop(queue_rx);
        send_arrival.arrive();

        tokio::select! {
            _ = barrier.wait() => {}
            status = ctx.done() => failure.record(status),
        }
        let outcome = match failure.take() {
            Some(status) => Err(status),
            None => Ok(()),
        };
        complete(writer, method, outcome);
    });
}

fn complete(writer: MessageWriter, method: Method, outcome: Result<(), Status>) {
    let sent = writer.sent();
    let status = outcome.err().unwrap_or_else(Status::ok);
    if status.is_ok() {
        info!(
            event = "rpc_completed",
            method = %method.path(),
            messages_sent = sent,
            "Call completed"
        );
    } else {
        warn!(
            event = "rpc_failed",
            method = %method.path(),
            grpc_status = %status.code(),
            grpc_message = status.message(),
            messages_sent = sent,
            "Call failed"
        );
    }
    writer.finish(status);
}

fn grpc_response(body: GatewayBody) -> Response<GatewayBody> {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static(GRPC_CONTENT_TYPE));
    response
}

/// Short text response for requests that are not gRPC calls
pub fn plain_response(status: StatusCode, text: &'static str) -> Response<GatewayBody> {
    let mut response = Response::new(GatewayBody::full(text));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
