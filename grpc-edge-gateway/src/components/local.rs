//! In-process handlers for health and reflection

use crate::body::GatewayBody;
use crate::components::router::RouteTable;
use crate::config::LocalHandler;
use crate::rpc::catalog::Method;
use crate::rpc::service::HealthService;
use crate::rpc::{trailers_only, Engine, Status};
use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response};
use std::fmt;
use tracing::debug;

/// Health and reflection answered by the gateway itself. Never touches the origin.
#[derive(Clone)]
pub struct LocalHandlers {
    engine: Engine<HealthService>,
}

impl LocalHandlers {
    /// Reflection advertises the services reachable through `routes`
    pub fn new(routes: &RouteTable) -> Self {
        Self {
            engine: Engine::new(HealthService::new(routes.advertised_services())),
        }
    }

    pub fn services(&self) -> &[String] {
        self.engine.service().reflection().services()
    }

    pub fn serve<B>(&self, handler: LocalHandler, request: Request<B>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Unpin + Send + 'static,
        B::Error: fmt::Display,
    {
        debug!(
            event = "local_dispatch",
            handler = handler.as_str(),
            path = %request.uri().path(),
            "Serving call locally"
        );

        // A reflection route only answers reflection, a health route only health
        let expected = match handler {
            LocalHandler::Health => Method::Status,
            LocalHandler::Reflection => Method::ServerReflectionInfo,
        };
        match Method::from_path(request.uri().path()) {
            Some(method) if method != expected => trailers_only(Status::unimplemented(format!(
                "{} is not served by the {} handler",
                method.path(),
                handler.as_str()
            ))),
            _ => self.engine.serve(request),
        }
    }
}
