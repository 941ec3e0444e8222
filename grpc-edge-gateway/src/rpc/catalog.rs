//! Method catalog
//!
//! Every RPC method this crate knows about, resolved from the request path
//! once per call into a tagged variant.

pub const GREETER_SERVICE: &str = "chat.Greeter";
pub const ECHO_SERVICE: &str = "chat.Echo";
pub const HEALTH_SERVICE: &str = "chat.Health";
pub const REFLECTION_SERVICE: &str = "grpc.reflection.v1alpha.ServerReflection";

/// Interaction shape of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Unary,
    ServerStreaming,
    /// Client-streaming and full-duplex calls share one engine path
    Duplex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    SayHello,
    LotsOfReplies,
    ManyHellos,
    Replay,
    Status,
    ServerReflectionInfo,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::SayHello,
        Method::LotsOfReplies,
        Method::ManyHellos,
        Method::Replay,
        Method::Status,
        Method::ServerReflectionInfo,
    ];

    pub fn service(&self) -> &'static str {
        match self {
            Method::SayHello | Method::LotsOfReplies | Method::ManyHellos => GREETER_SERVICE,
            Method::Replay => ECHO_SERVICE,
            Method::Status => HEALTH_SERVICE,
            Method::ServerReflectionInfo => REFLECTION_SERVICE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::SayHello => "SayHello",
            Method::LotsOfReplies => "LotsOfReplies",
            Method::ManyHellos => "ManyHellos",
            Method::Replay => "Replay",
            Method::Status => "Status",
            Method::ServerReflectionInfo => "ServerReflectionInfo",
        }
    }

    /// Full request path, e.g. `/chat.Greeter/SayHello`
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service(), self.name())
    }

    pub fn shape(&self) -> Shape {
        match self {
            Method::SayHello | Method::Replay | Method::Status => Shape::Unary,
            Method::LotsOfReplies => Shape::ServerStreaming,
            Method::ManyHellos | Method::ServerReflectionInfo => Shape::Duplex,
        }
    }

    pub fn from_path(path: &str) -> Option<Method> {
        let (service, name) = path.strip_prefix('/')?.split_once('/')?;
        Method::ALL
            .into_iter()
            .find(|m| m.service() == service && m.name() == name)
    }
}

/// Service names in first-seen order for a set of methods
pub fn service_names(methods: &[Method]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for method in methods {
        if !names.iter().any(|n| n == method.service()) {
            names.push(method.service().to_string());
        }
    }
    names
}
