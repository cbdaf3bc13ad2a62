//! Operator HTTP API
//!
//! Accepts deployment and cancel requests, validates them and hands them to
//! the dispatcher. Also serves `/health` and, when enabled, `/metrics`.

pub mod validation;

pub use validation::ValidationError;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HttpConfig;
use crate::dispatcher::{DispatchError, Dispatched, Dispatcher};
use crate::metrics::Metrics;

#[cfg(test)]
mod tests;

pub const FIRMWARE_DEPLOYMENT: &str = "/api/firmwares/deployment";
pub const FIRMWARE_CANCEL: &str = "/api/firmwares/deployment/cancel";
pub const ADVERTISEMENT_DEPLOYMENT: &str = "/api/advertisements/deployment";

const ACCEPTED: &str = "deployment request accepted";
const CANCEL_ACCEPTED: &str = "cancel request accepted";
const INVALID_ACCESS: &str = "invalid access";

struct ApiContext {
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    max_body_bytes: usize,
    expose_metrics: bool,
}

/// HTTP server for the operator API
pub struct ApiServer {
    listener: TcpListener,
    context: Arc<ApiContext>,
}

impl ApiServer {
    /// Bind the listen socket; failing here is a startup error
    pub async fn bind(
        config: &HttpConfig,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
        expose_metrics: bool,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            listener,
            context: Arc::new(ApiContext {
                dispatcher,
                metrics,
                max_body_bytes: config.max_body_bytes,
                expose_metrics,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Operator API listening on http://{}", addr);
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept API connection");
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let context = self.context.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let context = context.clone();
                    async move { handle_request(req, context).await }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);
                let served = tokio::select! {
                    served = conn.as_mut() => served,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.as_mut().await
                    }
                };
                if let Err(err) = served {
                    debug!(%peer, "Error serving API connection: {:?}", err);
                }
            });
        }

        info!("Operator API stopped");
    }
}

async fn handle_request(
    req: Request<Incoming>,
    context: Arc<ApiContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let response = route(req, &context).await;

    let label = match path.as_str() {
        FIRMWARE_DEPLOYMENT | FIRMWARE_CANCEL | ADVERTISEMENT_DEPLOYMENT | "/health"
        | "/metrics" => path.as_str(),
        _ => "other",
    };
    context
        .metrics
        .http_request(label, response.status().as_u16());

    Ok(response)
}

async fn route(req: Request<Incoming>, context: &ApiContext) -> Response<Full<Bytes>> {
    let api = match req.uri().path() {
        FIRMWARE_DEPLOYMENT => Api::Firmware,
        FIRMWARE_CANCEL => Api::Cancel,
        ADVERTISEMENT_DEPLOYMENT => Api::Advertisement,
        "/health" | "/healthz" => {
            return plain(StatusCode::OK, "text/plain", Bytes::from_static(b"OK"))
        }
        "/metrics" if context.expose_metrics => return metrics(context),
        _ => return described(StatusCode::NOT_FOUND, "not found"),
    };

    if req.method() != Method::POST {
        return described(StatusCode::BAD_REQUEST, INVALID_ACCESS);
    }

    let body = match read_body(req, context.max_body_bytes).await {
        Ok(body) => body,
        Err(description) => return described(StatusCode::BAD_REQUEST, description),
    };

    handle_api(api, &body, context).await
}

#[derive(Debug, Clone, Copy)]
enum Api {
    Firmware,
    Cancel,
    Advertisement,
}

async fn handle_api(api: Api, body: &[u8], context: &ApiContext) -> Response<Full<Bytes>> {
    let dispatcher = &context.dispatcher;
    let (result, accepted) = match api {
        Api::Firmware => match validation::firmware_request(body) {
            Ok(req) => (dispatcher.deploy_firmware(&req).await, ACCEPTED),
            Err(e) => return rejected(api, e),
        },
        Api::Advertisement => match validation::advertisement_request(body) {
            Ok(req) => (dispatcher.deploy_advertisements(&req).await, ACCEPTED),
            Err(e) => return rejected(api, e),
        },
        Api::Cancel => match validation::cancel_request(body) {
            Ok(req) => (dispatcher.cancel(&req).await, CANCEL_ACCEPTED),
            Err(e) => return rejected(api, e),
        },
    };

    match result {
        Ok(Dispatched::Completed(report)) => {
            debug!(?api, ?report, "Request dispatched");
            described(StatusCode::OK, accepted)
        }
        Ok(Dispatched::Detached) => described(StatusCode::OK, accepted),
        Err(e @ DispatchError::MissingContent) => {
            warn!(?api, error = %e, "Rejecting request");
            described(StatusCode::BAD_REQUEST, "missing required fields")
        }
        Err(e) => {
            error!(?api, error = %e, "Failed to dispatch request");
            described(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn rejected(api: Api, error: ValidationError) -> Response<Full<Bytes>> {
    warn!(?api, %error, "Rejecting request");
    described(StatusCode::BAD_REQUEST, error.description())
}

async fn read_body(req: Request<Incoming>, limit: usize) -> Result<Bytes, &'static str> {
    match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err("request body too large"),
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            Err("parse error")
        }
    }
}

fn metrics(context: &ApiContext) -> Response<Full<Bytes>> {
    match context.metrics.encode() {
        Ok((content_type, buffer)) => plain(StatusCode::OK, &content_type, Bytes::from(buffer)),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from_static(b"Failed to encode metrics"),
            )
        }
    }
}

/// `{"description": ...}` JSON response
fn described(status: StatusCode, description: &str) -> Response<Full<Bytes>> {
    let body = json!({ "description": description }).to_string();
    plain(status, "application/json", Bytes::from(body))
}

fn plain(status: StatusCode, content_type: &str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Ok(value) = header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}
