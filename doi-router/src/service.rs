use crate::client::ProviderClient;
use crate::config::{Config, Credentials};
use crate::errors::{DoiRouterError, Result};
use crate::executor::FanOutExecutor;
use crate::lookup::Lookup;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::protocol::{BatchRequest, BatchResponse, ErrorEntry, ResponseOptions};
use crate::types::BatchResult;
use crate::validator::BatchValidator;
use http_body_util::{BodyExt, Full, Limited, combinators::BoxBody};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::make_error_response;
use shared::{gauge, histogram};
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

pub type HandlerBody = BoxBody<Bytes, DoiRouterError>;

/// Path of the batch lookup endpoint.
pub const BATCH_PATH: &str = "/v2/dois";

/// Request bodies above this size are rejected before parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Serves `POST /v2/dois` and the `GET /` banner.
#[derive(Clone)]
pub struct DoiRouterService {
    validator: BatchValidator,
    executor: Arc<FanOutExecutor>,
    lookup: Arc<dyn Lookup>,
}

impl DoiRouterService {
    pub fn new(
        validator: BatchValidator,
        executor: FanOutExecutor,
        lookup: Arc<dyn Lookup>,
    ) -> Self {
        Self {
            validator,
            executor: Arc::new(executor),
            lookup,
        }
    }

    /// Wires validator, executor and provider client from configuration.
    pub fn from_config(config: &Config, credentials: Credentials) -> Result<Self> {
        let client = ProviderClient::new(
            &config.provider,
            credentials,
            config.lookup.http_timeout(),
        )?;
        let executor =
            FanOutExecutor::new(config.lookup.concurrency, config.lookup.batch_deadline())?;

        Ok(Self::new(
            BatchValidator::new(config.lookup.max_batch_size),
            executor,
            Arc::new(client),
        ))
    }

    /// Validates and resolves one batch of raw identifiers.
    ///
    /// Only validation fails the call; lookup problems are part of the result.
    pub async fn lookup_batch(&self, dois: Vec<String>) -> Result<BatchResult> {
        let batch = self
            .validator
            .validate(dois)
            .inspect_err(|e| tracing::info!(error = %e, "Rejected batch"))?;

        Ok(self.executor.execute(self.lookup.clone(), batch).await)
    }

    /// Routes one request. Never fails: errors become JSON error responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<HandlerBody>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let started = Instant::now();
        gauge!(REQUESTS_INFLIGHT).increment(1.0);

        let response = match (req.method(), req.uri().path()) {
            (&Method::GET, "/") => {
                let banner = serde_json::json!({"msg": "don't panic"});
                serde_json::to_vec(&banner)
                    .map_err(|e| DoiRouterError::ResponseSerializationError(e.to_string()))
                    .and_then(|body| json_response(StatusCode::OK, Bytes::from(body)))
                    .unwrap_or_else(|e| error_response(&e))
            }
            (&Method::POST, BATCH_PATH) => self
                .handle_batch(req)
                .await
                .unwrap_or_else(|e| error_response(&e)),
            (_, "/" | BATCH_PATH) => make_error_response(StatusCode::METHOD_NOT_ALLOWED),
            (method, path) => {
                tracing::debug!(%method, path, "No route matched");
                make_error_response(StatusCode::NOT_FOUND)
            }
        };

        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
        histogram!(REQUEST_DURATION, "status" => response.status().as_str().to_string())
            .record(started.elapsed().as_secs_f64());

        response
    }

    async fn handle_batch<B>(&self, req: Request<B>) -> Result<Response<HandlerBody>>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let options = ResponseOptions::from_query(req.uri().query());

        let bytes = Limited::new(req.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|e| DoiRouterError::RequestBodyError(e.to_string()))?
            .to_bytes();
        let request = BatchRequest::from_bytes(&bytes)
            .map_err(|e| DoiRouterError::RequestBodyError(e.to_string()))?;

        let result = self.lookup_batch(request.dois).await?;

        let body = BatchResponse::from_result(result, options)?.to_bytes()?;

        json_response(StatusCode::OK, body)
    }
}

fn json_response(status: StatusCode, body: Bytes) -> Result<Response<HandlerBody>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body).map_err(|e| match e {}).boxed())
        .map_err(|e| DoiRouterError::ResponseBuildError(e.to_string()))
}

/// JSON `{"error", "message"}` body with the status matching `err`.
fn error_response(err: &DoiRouterError) -> Response<HandlerBody> {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }

    serde_json::to_vec(&ErrorEntry::from(err))
        .map_err(|e| DoiRouterError::ResponseSerializationError(e.to_string()))
        .and_then(|body| json_response(status, Bytes::from(body)))
        .unwrap_or_else(|_| make_error_response(status))
}

impl Service<Request<Incoming>> for DoiRouterService {
    type Response = Response<HandlerBody>;
    type Error = DoiRouterError;
    type Future = Pin<
        Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send + 'static>,
    >;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}
