//! Minimal gRPC client over one HTTP/2 TLS session
//!
//! [`RpcChannel`] opens calls; [`ChatClient`] wraps it with one method per
//! RPC of the chat, health and reflection services.

use crate::body::GatewayBody;
use crate::components::tls::{dial, ClientIdentity};
use crate::error::GatewayError;
use crate::rpc::catalog::Method;
use crate::rpc::join::JoinBarrier;
use crate::rpc::messages::{
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse, EchoReply,
    EchoRequest, HelloReply, HelloRequest, ServerReflectionRequest, ServerReflectionResponse, StatusReply,
    StatusRequest,
};
use crate::rpc::status::{encode_timeout, Code, Status, GRPC_TIMEOUT};
use crate::rpc::stream::{CallContext, MessageReader, MessageWriter, StreamTracker};
use crate::rpc::GRPC_CONTENT_TYPE;
use hyper::body::Incoming;
use hyper::client::conn::http2;
use hyper::header::{HeaderValue, CONTENT_TYPE, TE};
use hyper::{Method as HttpMethod, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

type ResponseFuture = Pin<Box<dyn Future<Output = Result<Response<Incoming>, hyper::Error>> + Send>>;

/// A single HTTP/2 session to a gRPC server
#[derive(Clone)]
pub struct RpcChannel {
    sender: http2::SendRequest<GatewayBody>,
    authority: String,
}

impl RpcChannel {
    /// Dial `address`, complete TLS and the HTTP/2 handshake
    pub async fn connect(
        address: &str,
        identity: &ClientIdentity,
        connect_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let tls_stream = dial(address, identity, connect_timeout).await?;
        let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(tls_stream))
            .await
            .map_err(|e| GatewayError::transport(format!("HTTP/2 handshake failed with {}: {}", address, e)))?;

        let peer = address.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Client session to {} ended: {}", peer, e);
            }
        });

        Ok(Self {
            sender,
            authority: address.to_string(),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Send an arbitrary request on this session
    pub async fn send(&self, request: Request<GatewayBody>) -> Result<Response<Incoming>, GatewayError> {
        let mut sender = self.sender.clone();
        sender
            .ready()
            .await
            .map_err(|e| GatewayError::transport(format!("session to {} unusable: {}", self.authority, e)))?;
        Ok(sender.send_request(request).await?)
    }

    /// Start a call. Messages go through the returned writer while the
    /// response is awaited on the [`PendingResponse`].
    pub async fn open(
        &self,
        method: Method,
        timeout: Option<Duration>,
    ) -> Result<(MessageWriter, PendingResponse), Status> {
        self.open_path(&method.path(), timeout).await
    }

    /// Start a call on an arbitrary path
    pub async fn open_path(
        &self,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<(MessageWriter, PendingResponse), Status> {
        let ctx = CallContext::new(timeout);
        let tracker = StreamTracker::new();
        let (writer, body) = MessageWriter::for_request(ctx.clone(), tracker.clone());

        let mut builder = Request::builder()
            .method(HttpMethod::POST)
            .uri(format!("https://{}{}", self.authority, path))
            .header(CONTENT_TYPE, GRPC_CONTENT_TYPE)
            .header(TE, "trailers");
        if let Some(timeout) = timeout {
            builder = builder.header(GRPC_TIMEOUT, encode_timeout(timeout));
        }
        let request = builder
            .body(body)
            .map_err(|e| Status::internal(format!("failed to build request: {}", e)))?;

        let mut sender = self.sender.clone();
        sender
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("session to {} unusable: {}", self.authority, e)))?;
        let response: ResponseFuture = Box::pin(sender.send_request(request));

        Ok((writer, PendingResponse { response, ctx, tracker }))
    }
}

/// Response headers of an open call, not yet received
pub struct PendingResponse {
    response: ResponseFuture,
    ctx: CallContext,
    tracker: StreamTracker,
}

impl PendingResponse {
    /// Wait for response headers. A trailers-only failure is returned as the error.
    pub async fn response(self) -> Result<ResponseStream, Status> {
        let PendingResponse { response, ctx, tracker } = self;
        let response = tokio::select! {
            status = ctx.done() => return Err(status),
            response = response => response.map_err(|e| Status::unavailable(format!("request failed: {}", e)))?,
        };

        if response.status() != StatusCode::OK {
            return Err(status_from_http(response.status()));
        }

        let header_status = Status::from_header_map(response.headers());
        if let Some(status) = &header_status {
            if !status.is_ok() {
                return Err(status.clone());
            }
        }

        Ok(ResponseStream {
            reader: MessageReader::new(response.into_body(), ctx, tracker),
            header_status,
        })
    }
}

/// Inbound messages of a call followed by its terminal status
pub struct ResponseStream {
    reader: MessageReader<Incoming>,
    header_status: Option<Status>,
}

impl ResponseStream {
    /// Next message, or `None` once the call ended with OK
    pub async fn next<M: prost::Message + Default>(&mut self) -> Result<Option<M>, Status> {
        match self.reader.decode::<M>().await? {
            Some(message) => Ok(Some(message)),
            None => {
                let status = self.status();
                if status.is_ok() {
                    Ok(None)
                } else {
                    Err(status)
                }
            }
        }
    }

    /// Every remaining message
    pub async fn collect<M: prost::Message + Default>(&mut self) -> Result<Vec<M>, Status> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Terminal status; only meaningful once the stream is drained
    pub fn status(&self) -> Status {
        self.reader
            .status()
            .or_else(|| self.header_status.clone())
            .unwrap_or_else(|| Status::internal("stream ended without grpc-status"))
    }
}

fn status_from_http(status: StatusCode) -> Status {
    let code = match status {
        StatusCode::BAD_REQUEST => Code::Internal,
        StatusCode::NOT_FOUND => Code::Unimplemented,
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Code::Unavailable,
        _ => Code::Unknown,
    };
    Status::new(code, format!("unexpected HTTP status {}", status))
}

/// Client for the chat, health and reflection services
#[derive(Clone)]
pub struct ChatClient {
    channel: RpcChannel,
    timeout: Option<Duration>,
}

impl ChatClient {
    pub fn new(channel: RpcChannel) -> Self {
        Self { channel, timeout: None }
    }

    pub async fn connect(
        address: &str,
        identity: &ClientIdentity,
        connect_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self::new(RpcChannel::connect(address, identity, connect_timeout).await?))
    }

    /// Deadline sent with every call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn channel(&self) -> &RpcChannel {
        &self.channel
    }

    /// One request, one reply
    pub async fn unary<Req, Resp>(&self, method: Method, request: &Req) -> Result<Resp, Status>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        let mut stream = self.single_request(method, request).await?;
        let reply = stream
            .next::<Resp>()
            .await?
            .ok_or_else(|| Status::internal(format!("{} returned no reply", method.path())))?;
        if stream.next::<Resp>().await?.is_some() {
            return Err(Status::internal(format!("{} returned more than one reply", method.path())));
        }
        Ok(reply)
    }

    async fn single_request<Req: prost::Message>(&self, method: Method, request: &Req) -> Result<ResponseStream, Status> {
        let (mut writer, pending) = self.channel.open(method, self.timeout).await?;
        writer.send_message(request).await?;
        writer.close();
        pending.response().await
    }

    pub async fn say_hello(&self, name: &str) -> Result<String, Status> {
        let reply: HelloReply = self
            .unary(Method::SayHello, &HelloRequest { name: name.to_string() })
            .await?;
        Ok(reply.message)
    }

    pub async fn lots_of_replies(&self, name: &str) -> Result<Vec<String>, Status> {
        let mut stream = self
            .single_request(Method::LotsOfReplies, &HelloRequest { name: name.to_string() })
            .await?;
        let replies: Vec<HelloReply> = stream.collect().await?;
        Ok(replies.into_iter().map(|r| r.message).collect())
    }

    /// Send every name while collecting replies on a second task
    pub async fn many_hellos(&self, names: Vec<String>) -> Result<Vec<String>, Status> {
        let (mut writer, pending) = self.channel.open(Method::ManyHellos, self.timeout).await?;
        let barrier = JoinBarrier::new(2);

        let send_arrival = barrier.guard();
        let sender = tokio::spawn(async move {
            let _arrival = send_arrival;
            for name in names {
                writer.send_message(&HelloRequest { name }).await?;
            }
            writer.close();
            Ok::<_, Status>(())
        });

        let recv_arrival = barrier.guard();
        let received = async {
            let _arrival = recv_arrival;
            let mut stream = pending.response().await?;
            let replies: Vec<HelloReply> = stream.collect().await?;
            Ok::<_, Status>(replies.into_iter().map(|r| r.message).collect::<Vec<_>>())
        }
        .await;

        barrier.wait().await;
        let sent = sender
            .await
            .map_err(|e| Status::internal(format!("send task failed: {}", e)))?;

        let replies = received?;
        sent?;
        Ok(replies)
    }

    pub async fn replay(&self, message: &str) -> Result<String, Status> {
        let reply: EchoReply = self
            .unary(Method::Replay, &EchoRequest { message: message.to_string() })
            .await?;
        Ok(reply.message)
    }

    pub async fn status(&self) -> Result<StatusReply, Status> {
        self.unary(Method::Status, &StatusRequest {}).await
    }

    /// Service names reported by reflection
    pub async fn list_services(&self) -> Result<Vec<String>, Status> {
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(MessageRequest::ListServices("*".to_string())),
        };
        let mut stream = self.single_request(Method::ServerReflectionInfo, &request).await?;
        let responses: Vec<ServerReflectionResponse> = stream.collect().await?;

        let mut services = Vec::new();
        for response in responses {
            match response.message_response {
                Some(MessageResponse::ListServicesResponse(list)) => {
                    services.extend(list.service.into_iter().map(|s| s.name));
                }
                Some(MessageResponse::ErrorResponse(error)) => {
                    warn!("Reflection error {}: {}", error.error_code, error.error_message);
                    return Err(Status::new(Code::from_i32(error.error_code), error.error_message));
                }
                None => {}
            }
        }
        Ok(services)
    }
}
