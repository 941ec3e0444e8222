//! Handler bodies for the chat, health and reflection services

use crate::rpc::catalog::{Method, HEALTH_SERVICE};
use crate::rpc::messages::{
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse, EchoReply,
    EchoRequest, ErrorResponse, HelloReply, HelloRequest, ListServiceResponse, ServerReflectionRequest,
    ServerReflectionResponse, ServiceResponse, StatusReply, StatusRequest,
};
use crate::rpc::status::{Code, Status};
use bytes::Bytes;
use tracing::debug;

/// Number of replies produced by `LotsOfReplies`
pub const REPLY_COUNT: usize = 5;

pub const STATUS_CODE: i32 = 200;
pub const STATUS_MESSAGE: &str = "OK";

/// A set of methods served by the RPC engine.
///
/// Handlers work on raw payloads; the engine owns framing, ordering and the
/// terminal status. Methods a service does not implement report UNIMPLEMENTED.
pub trait RpcService: Send + Sync + 'static {
    /// Methods this service answers
    fn methods(&self) -> &[Method];

    fn unary(&self, method: Method, _request: Bytes) -> Result<Bytes, Status> {
        Err(Status::unimplemented(format!("{} is not unary", method.path())))
    }

    fn server_streaming(&self, method: Method, _request: Bytes) -> Result<Vec<Bytes>, Status> {
        Err(Status::unimplemented(format!("{} is not server-streaming", method.path())))
    }

    /// One reply per inbound message of a duplex call
    fn duplex_reply(&self, method: Method, _request: Bytes) -> Result<Bytes, Status> {
        Err(Status::unimplemented(format!("{} is not a duplex method", method.path())))
    }
}

pub fn decode<M: prost::Message + Default>(payload: Bytes) -> Result<M, Status> {
    M::decode(payload).map_err(|e| Status::internal(format!("failed to decode message: {}", e)))
}

pub fn encode<M: prost::Message>(message: &M) -> Bytes {
    Bytes::from(message.encode_to_vec())
}

pub fn greet(name: &str) -> String {
    format!("Hello {}", name)
}

pub fn numbered_greetings(name: &str) -> Vec<String> {
    (0..REPLY_COUNT).map(|i| format!("Hello {} - {}", name, i)).collect()
}

/// Answers `list_services`; everything else gets NOT_FOUND
#[derive(Debug, Clone)]
pub struct Reflection {
    services: Vec<String>,
}

impl Reflection {
    pub fn new(services: Vec<String>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn respond(&self, request: ServerReflectionRequest) -> ServerReflectionResponse {
        let message_response = match &request.message_request {
            Some(MessageRequest::ListServices(_)) => MessageResponse::ListServicesResponse(ListServiceResponse {
                service: self
                    .services
                    .iter()
                    .map(|name| ServiceResponse { name: name.clone() })
                    .collect(),
            }),
            Some(other) => MessageResponse::ErrorResponse(ErrorResponse {
                error_code: Code::NotFound.as_i32(),
                error_message: format!("{} is not available from this server", describe(other)),
            }),
            None => MessageResponse::ErrorResponse(ErrorResponse {
                error_code: Code::InvalidArgument.as_i32(),
                error_message: "empty reflection request".to_string(),
            }),
        };

        ServerReflectionResponse {
            valid_host: request.host.clone(),
            original_request: Some(request),
            message_response: Some(message_response),
        }
    }
}

fn describe(request: &MessageRequest) -> String {
    match request {
        MessageRequest::FileByFilename(name) => format!("file {:?}", name),
        MessageRequest::FileContainingSymbol(symbol) => format!("symbol {:?}", symbol),
        MessageRequest::AllExtensionNumbersOfType(ty) => format!("extensions of {:?}", ty),
        MessageRequest::ListServices(_) => "service list".to_string(),
    }
}

/// The origin's chat backend: greeter, echo and reflection
#[derive(Debug, Clone)]
pub struct ChatService {
    reflection: Reflection,
}

impl ChatService {
    pub const METHODS: [Method; 5] = [
        Method::SayHello,
        Method::LotsOfReplies,
        Method::ManyHellos,
        Method::Replay,
        Method::ServerReflectionInfo,
    ];

    pub fn new() -> Self {
        Self {
            reflection: Reflection::new(crate::rpc::catalog::service_names(&Self::METHODS)),
        }
    }
}

impl Default for ChatService {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcService for ChatService {
    fn methods(&self) -> &[Method] {
        &Self::METHODS
    }

    fn unary(&self, method: Method, request: Bytes) -> Result<Bytes, Status> {
        match method {
            Method::SayHello => {
                let request: HelloRequest = decode(request)?;
                debug!("Received SayHello: {}", request.name);
                Ok(encode(&HelloReply { message: greet(&request.name) }))
            }
            Method::Replay => {
                let request: EchoRequest = decode(request)?;
                debug!("Received Replay: {}", request.message);
                Ok(encode(&EchoReply { message: request.message }))
            }
            other => Err(Status::unimplemented(format!("{} is not unary", other.path()))),
        }
    }

    fn server_streaming(&self, method: Method, request: Bytes) -> Result<Vec<Bytes>, Status> {
        match method {
            Method::LotsOfReplies => {
                let request: HelloRequest = decode(request)?;
                debug!("Received LotsOfReplies: {}", request.name);
                Ok(numbered_greetings(&request.name)
                    .into_iter()
                    .map(|message| encode(&HelloReply { message }))
                    .collect())
            }
            other => Err(Status::unimplemented(format!("{} is not server-streaming", other.path()))),
        }
    }

    fn duplex_reply(&self, method: Method, request: Bytes) -> Result<Bytes, Status> {
        match method {
            Method::ManyHellos => {
                let request: HelloRequest = decode(request)?;
                Ok(encode(&HelloReply { message: greet(&request.name) }))
            }
            Method::ServerReflectionInfo => {
                let request: ServerReflectionRequest = decode(request)?;
                Ok(encode(&self.reflection.respond(request)))
            }
            other => Err(Status::unimplemented(format!("{} is not a duplex method", other.path()))),
        }
    }
}

/// Constant health answer
pub fn status_reply() -> StatusReply {
    StatusReply {
        code: STATUS_CODE,
        message: STATUS_MESSAGE.to_string(),
    }
}

/// Health plus reflection, answered without any backend
#[derive(Debug, Clone)]
pub struct HealthService {
    reflection: Reflection,
    methods: Vec<Method>,
}

impl HealthService {
    /// `services` are the names advertised by reflection
    pub fn new(mut services: Vec<String>) -> Self {
        if !services.iter().any(|s| s == HEALTH_SERVICE) {
            services.push(HEALTH_SERVICE.to_string());
        }
        Self {
            reflection: Reflection::new(services),
            methods: vec![Method::Status, Method::ServerReflectionInfo],
        }
    }

    pub fn reflection(&self) -> &Reflection {
        &self.reflection
    }
}

impl RpcService for HealthService {
    fn methods(&self) -> &[Method] {
        &self.methods
    }

    fn unary(&self, method: Method, request: Bytes) -> Result<Bytes, Status> {
        match method {
            Method::Status => {
                let _: StatusRequest = decode(request)?;
                debug!("Received StatusRequest");
                Ok(encode(&status_reply()))
            }
            other => Err(Status::unimplemented(format!("{} is not unary", other.path()))),
        }
    }

    fn duplex_reply(&self, method: Method, request: Bytes) -> Result<Bytes, Status> {
        match method {
            Method::ServerReflectionInfo => {
                let request: ServerReflectionRequest = decode(request)?;
                Ok(encode(&self.reflection.respond(request)))
            }
            other => Err(Status::unimplemented(format!("{} is not a duplex method", other.path()))),
        }
    }
}
