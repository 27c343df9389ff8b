use http::StatusCode;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::Response;
use hyper::body::Bytes;
use serde_json::json;

/// Stable error codes returned to API callers. Every authentication and
/// routing failure maps onto exactly one of these; internal detail never
/// leaves the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    MissingApiKey,
    InvalidApiKey,
    ProjectNotFound,
    DeploymentNotFound,
    NoDeploymentFound,
    MissingParameter,
    ForbiddenKeyType,
    Internal,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingApiKey => "MISSING_API_KEY",
            ErrorCode::InvalidApiKey => "INVALID_API_KEY",
            ErrorCode::ProjectNotFound => "PROJECT_NOT_FOUND",
            ErrorCode::DeploymentNotFound => "DEPLOYMENT_NOT_FOUND",
            ErrorCode::NoDeploymentFound => "NO_DEPLOYMENT_FOUND",
            ErrorCode::MissingParameter => "MISSING_PARAMETER",
            ErrorCode::ForbiddenKeyType => "FORBIDDEN_KEY_TYPE",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            ErrorCode::MissingApiKey => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidApiKey
            | ErrorCode::DeploymentNotFound
            | ErrorCode::ForbiddenKeyType => StatusCode::FORBIDDEN,
            ErrorCode::ProjectNotFound => StatusCode::NOT_FOUND,
            ErrorCode::NoDeploymentFound | ErrorCode::MissingParameter => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::MissingApiKey => "Missing API key",
            ErrorCode::InvalidApiKey => "API key is not valid",
            ErrorCode::ProjectNotFound => "Project not found",
            ErrorCode::DeploymentNotFound => {
                "Deployment not found or does not belong to this project"
            }
            ErrorCode::NoDeploymentFound => {
                "No ready deployment found. Please specify a Deployment-Id header."
            }
            ErrorCode::MissingParameter => "Missing required parameter",
            ErrorCode::ForbiddenKeyType => {
                "Public keys are read-only; this operation requires a secret key"
            }
            ErrorCode::Internal => "Internal error",
        }
    }
}

/// Builds the JSON error body callers see: `{"error":{"code","message"}}`.
pub fn error_response<E>(code: ErrorCode) -> Response<BoxBody<Bytes, E>> {
    let body = json!({
        "error": {
            "code": code.as_str(),
            "message": code.message(),
        }
    })
    .to_string();

    let mut response = Response::new(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed());
    *response.status_mut() = code.status();
    response
        .headers_mut()
        .insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
    response
}

/// Gateway plumbing failures; never shown to callers directly.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("http error: {0}")]
    Http(#[from] http::Error),
}
