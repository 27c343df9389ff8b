//! Hyper service wiring: applies the pipeline's decision and forwards the
//! request to the internal upstream, or answers with the JSON error body.

use crate::error::{GatewayError, error_response};
use crate::gateway::{Gateway, GatewayRequest, RouteDecision};
use http::StatusCode;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service as HyperService;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::http::make_boxed_error_response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub struct GatewayService {
    gateway: Arc<Gateway>,
    client: Client<HttpConnector, Incoming>,
    upstream_url: String,
}

impl GatewayService {
    pub fn new(gateway: Arc<Gateway>, upstream_url: &str) -> Self {
        let conn = HttpConnector::new();
        let client: Client<_, Incoming> = Client::builder(TokioExecutor::new())
            .http2_adaptive_window(true)
            .build(conn);

        GatewayService {
            gateway,
            client,
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
        }
    }

    async fn handle(
        gateway: Arc<Gateway>,
        client: Client<HttpConnector, Incoming>,
        upstream_url: String,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
        let (mut parts, body) = req.into_parts();

        let host = parts
            .headers
            .get(http::header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| parts.uri.host())
            .unwrap_or("")
            .to_string();
        let path = parts.uri.path().to_string();
        let query = parts.uri.query().unwrap_or("").to_string();

        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
        };

        let decision = gateway
            .decide(&GatewayRequest {
                method: &parts.method,
                host: &host,
                path: &path,
                query: &query,
                internal_token: header("x-internal-token"),
                authorization: header("authorization"),
                deployment_override: header("deployment-id"),
            })
            .await;

        let target = match decision {
            RouteDecision::Reject(code) => return Ok(error_response::<GatewayError>(code)),
            RouteDecision::Forward { internal_path, .. } => internal_path,
            RouteDecision::PassThrough => match parts.uri.path_and_query() {
                Some(path_and_query) => path_and_query.to_string(),
                None => path,
            },
        };

        let uri: http::Uri = format!("{upstream_url}{target}").parse()?;
        parts.uri = uri;
        let upstream_request = Request::from_parts(parts, body);

        match client.request(upstream_request).await {
            Ok(response) => Ok(response.map(|b| b.map_err(GatewayError::Hyper).boxed())),
            Err(err) => {
                tracing::error!(error = %err, "upstream request failed");
                Ok(make_boxed_error_response(StatusCode::BAD_GATEWAY))
            }
        }
    }
}

impl HyperService<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, GatewayError>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let gateway = self.gateway.clone();
        let client = self.client.clone();
        let upstream_url = self.upstream_url.clone();

        Box::pin(async move { Self::handle(gateway, client, upstream_url, req).await })
    }
}
