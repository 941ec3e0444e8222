//! Stream state machine and message readers/writers
//!
//! One [`Stream`](StreamState) per RPC call. The reader and writer halves may
//! live on different tasks (duplex calls), so they share a [`StreamTracker`].
//! Every suspension point selects on the call's [`CallContext`] so a deadline
//! or cancellation unblocks pending reads and writes.

use crate::body::GatewayBody;
use crate::rpc::codec::{encode_frame, FrameDecoder};
use crate::rpc::status::{parse_timeout, Status, GRPC_TIMEOUT};
use bytes::Bytes;
use http::HeaderMap;
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outbound messages buffered per stream before `send` applies backpressure
const WRITE_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Active,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Message,
    LocalEnd,
    RemoteEnd,
    Abort,
}

impl StreamState {
    pub fn next(self, event: StreamEvent) -> StreamState {
        use StreamEvent::*;
        use StreamState::*;
        match (self, event) {
            (Closed, _) | (_, Abort) => Closed,
            (Open, Message) => Active,
            (state, Message) => state,
            (Open | Active, LocalEnd) => HalfClosedLocal,
            (Open | Active, RemoteEnd) => HalfClosedRemote,
            (HalfClosedRemote, LocalEnd) | (HalfClosedLocal, RemoteEnd) => Closed,
            (state, _) => state,
        }
    }
}

/// Shared view of one stream's state
#[derive(Debug, Clone)]
pub struct StreamTracker {
    state: Arc<Mutex<StreamState>>,
}

impl Default for StreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState::Open)),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn apply(&self, event: StreamEvent) -> StreamState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = state.next(event);
        *state
    }
}

/// Deadline and cancellation for one call
#[derive(Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    token: CancellationToken,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("timeout", &self.timeout)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CallContext {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
            token: CancellationToken::new(),
        }
    }

    /// Build from request headers, honoring `grpc-timeout`
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Status> {
        let timeout = match headers.get(GRPC_TIMEOUT) {
            Some(value) => {
                let raw = value.to_str().unwrap_or_default();
                Some(parse_timeout(raw).ok_or_else(|| Status::internal(format!("malformed grpc-timeout {:?}", raw)))?)
            }
            None => None,
        };
        Ok(Self::new(timeout))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the call must stop, with the status to report
    pub async fn done(&self) -> Status {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = tokio::time::sleep_until(deadline) => self.deadline_status(),
                _ = self.token.cancelled() => Status::cancelled("call cancelled"),
            },
            None => {
                self.token.cancelled().await;
                Status::cancelled("call cancelled")
            }
        }
    }

    fn deadline_status(&self) -> Status {
        let ms = self.timeout.map(|t| t.as_millis()).unwrap_or_default();
        Status::deadline_exceeded(format!("deadline of {}ms exceeded", ms))
    }
}

/// One message plus its position within its direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub seq: u64,
    pub payload: Bytes,
}

/// Reads framed messages from a request or response body
pub struct MessageReader<B = Incoming> {
    body: B,
    decoder: FrameDecoder,
    next_seq: u64,
    trailers: Option<HeaderMap>,
    finished: bool,
    ctx: CallContext,
    tracker: StreamTracker,
}

impl<B> MessageReader<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    pub fn new(body: B, ctx: CallContext, tracker: StreamTracker) -> Self {
        Self {
            body,
            decoder: FrameDecoder::new(),
            next_seq: 0,
            trailers: None,
            finished: false,
            ctx,
            tracker,
        }
    }

    /// Next message in receive order, `None` at end of direction
    pub async fn message(&mut self) -> Result<Option<Message>, Status> {
        loop {
            match self.decoder.next_frame() {
                Ok(Some(payload)) => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.tracker.apply(StreamEvent::Message);
                    return Ok(Some(Message { seq, payload }));
                }
                Ok(None) => {}
                Err(e) => return Err(self.abort(e.to_status())),
            }

            if self.finished {
                return Ok(None);
            }

            let frame = tokio::select! {
                status = self.ctx.done() => return Err(self.abort(status)),
                frame = self.body.frame() => frame,
            };

            match frame {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => self.decoder.push(&data),
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            self.trailers = Some(trailers);
                        }
                    }
                },
                Some(Err(e)) => {
                    return Err(self.abort(Status::aborted(format!("stream failed mid-message: {}", e))));
                }
                None => {
                    if let Err(e) = self.decoder.finish() {
                        return Err(self.abort(e.to_status()));
                    }
                    self.finished = true;
                    self.tracker.apply(StreamEvent::RemoteEnd);
                    debug!("Inbound direction ended after {} messages", self.next_seq);
                }
            }
        }
    }

    /// Decode the next message as `M`
    pub async fn decode<M: prost::Message + Default>(&mut self) -> Result<Option<M>, Status> {
        match self.message().await? {
            Some(message) => M::decode(message.payload)
                .map(Some)
                .map_err(|e| self.abort(Status::internal(format!("failed to decode message: {}", e)))),
            None => Ok(None),
        }
    }

    /// Exactly one message followed by end of direction
    pub async fn single_message(&mut self) -> Result<Message, Status> {
        let message = self
            .message()
            .await?
            .ok_or_else(|| Status::internal("missing request message"))?;
        if self.message().await?.is_some() {
            return Err(self.abort(Status::internal("unexpected additional message")));
        }
        Ok(message)
    }

    pub async fn single<M: prost::Message + Default>(&mut self) -> Result<M, Status> {
        let message = self.single_message().await?;
        M::decode(message.payload).map_err(|e| self.abort(Status::internal(format!("failed to decode message: {}", e))))
    }

    /// Trailers seen at the end of the body, if any
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    /// Status from the trailers, if the peer sent one
    pub fn status(&self) -> Option<Status> {
        self.trailers.as_ref().and_then(Status::from_header_map)
    }

    pub fn received(&self) -> u64 {
        self.next_seq
    }

    fn abort(&mut self, status: Status) -> Status {
        self.finished = true;
        self.tracker.apply(StreamEvent::Abort);
        status
    }
}

/// Writes framed messages into a channel-backed [`GatewayBody`]
pub struct MessageWriter {
    data_tx: mpsc::Sender<Bytes>,
    trailers_tx: Option<oneshot::Sender<HeaderMap>>,
    next_seq: u64,
    ctx: CallContext,
    tracker: StreamTracker,
}

impl MessageWriter {
    /// Writer for a response: the body ends with the status given to `finish`
    pub fn for_response(ctx: CallContext, tracker: StreamTracker) -> (Self, GatewayBody) {
        let (data_tx, data_rx) = mpsc::channel(WRITE_BUFFER);
        let (trailers_tx, trailers_rx) = oneshot::channel();
        let writer = Self {
            data_tx,
            trailers_tx: Some(trailers_tx),
            next_seq: 0,
            ctx,
            tracker,
        };
        (writer, GatewayBody::channel(data_rx, Some(trailers_rx)))
    }

    /// Writer for a request: the body ends without trailers on `close`
    pub fn for_request(ctx: CallContext, tracker: StreamTracker) -> (Self, GatewayBody) {
        let (data_tx, data_rx) = mpsc::channel(WRITE_BUFFER);
        let writer = Self {
            data_tx,
            trailers_tx: None,
            next_seq: 0,
            ctx,
            tracker,
        };
        (writer, GatewayBody::channel(data_rx, None))
    }

    /// Send one payload, returning the sequence number it was given
    pub async fn send(&mut self, payload: &[u8]) -> Result<u64, Status> {
        let frame = encode_frame(payload);
        tokio::select! {
            status = self.ctx.done() => {
                self.tracker.apply(StreamEvent::Abort);
                Err(status)
            }
            sent = self.data_tx.send(frame) => match sent {
                Ok(()) => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.tracker.apply(StreamEvent::Message);
                    Ok(seq)
                }
                Err(_) => {
                    self.tracker.apply(StreamEvent::Abort);
                    Err(Status::cancelled("peer stopped reading"))
                }
            }
        }
    }

    pub async fn send_message<M: prost::Message>(&mut self, message: &M) -> Result<u64, Status> {
        self.send(&message.encode_to_vec()).await
    }

    pub fn sent(&self) -> u64 {
        self.next_seq
    }

    /// End the outbound direction with a terminal status. Consumes the writer
    /// so the status can only be set once.
    pub fn finish(mut self, status: Status) {
        if let Some(tx) = self.trailers_tx.take() {
            if tx.send(status.to_header_map()).is_err() {
                debug!("Peer went away before status {} was delivered", status.code());
            }
        }
        self.tracker.apply(StreamEvent::LocalEnd);
    }

    /// End the outbound direction of a request
    pub fn close(self) {
        self.tracker.apply(StreamEvent::LocalEnd);
    }
}
