//! Administrative HTTP surface for environment promotion.

use crate::model::Environment;
use crate::promotion::{Promoter, PromotionError};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::patch,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum AdminApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub fn router(promoter: Arc<Promoter>) -> Router {
    Router::new()
        .route(
            "/projects/{project_id}/deployments/{deployment_id}/environment",
            patch(update_environment),
        )
        .with_state(promoter)
}

pub async fn serve(host: &str, port: u16, promoter: Arc<Promoter>) -> Result<(), AdminApiError> {
    let app = router(promoter);
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Deserialize)]
struct UpdateEnvironmentBody {
    /// `"production"`, `"staging"`, or `null` to vacate the current slot.
    environment: Option<Environment>,
}

#[derive(Serialize)]
struct PromotionResponse {
    success: bool,
    txid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    demoted: Option<String>,
}

#[derive(Serialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Serialize)]
struct ApiErrorDetail {
    code: &'static str,
    message: String,
}

async fn update_environment(
    State(promoter): State<Arc<Promoter>>,
    Path((project_id, deployment_id)): Path<(String, String)>,
    Json(body): Json<UpdateEnvironmentBody>,
) -> Result<Json<PromotionResponse>, PromotionError> {
    let outcome = promoter
        .change_environment(&project_id, &deployment_id, body.environment)
        .await?;

    Ok(Json(PromotionResponse {
        success: true,
        txid: outcome.txid,
        demoted: outcome.demoted,
    }))
}

impl IntoResponse for PromotionError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            PromotionError::ProjectNotFound => (StatusCode::NOT_FOUND, "PROJECT_NOT_FOUND"),
            PromotionError::DeploymentNotFound => (StatusCode::NOT_FOUND, "DEPLOYMENT_NOT_FOUND"),
            PromotionError::DeploymentNotReady => (StatusCode::BAD_REQUEST, "DEPLOYMENT_NOT_READY"),
            PromotionError::StageFirst | PromotionError::InvalidTransition { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_TRANSITION")
            }
            PromotionError::Store(_) | PromotionError::Cache(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(ApiErrorBody {
            error: ApiErrorDetail {
                code,
                message: self.to_string(),
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaCache;
    use crate::model::{Deployment, DeploymentStatus, Project};
    use crate::store::MemoryStore;
    use crate::tasks::CollectingSpawner;
    use crate::warmer::NoopIndexWarmer;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn test_router() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        let promoter = Arc::new(Promoter::new(
            store.clone(),
            Arc::new(MokaCache::new()),
            Arc::new(NoopIndexWarmer),
            Arc::new(CollectingSpawner::new()),
        ));
        (store.clone(), router(promoter))
    }

    fn patch_request(project_id: &str, deployment_id: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("PATCH")
            .uri(format!(
                "/projects/{project_id}/deployments/{deployment_id}/environment"
            ))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn promotes_and_returns_txid() {
        let (store, app) = test_router();
        store.insert_project(Project {
            id: "proj".into(),
            org_id: "org_1".into(),
            name: "proj".into(),
            production_deployment_id: None,
            staging_deployment_id: None,
        });
        store.insert_deployment(Deployment {
            id: "dep_1".into(),
            project_id: "proj".into(),
            name: "dep_1".into(),
            status: DeploymentStatus::Ready,
            environment: None,
        });

        let response = app
            .oneshot(patch_request("proj", "dep_1", r#"{"environment":"staging"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["txid"].is_u64());
    }

    #[tokio::test]
    async fn maps_errors_onto_statuses() {
        let (store, app) = test_router();
        store.insert_project(Project {
            id: "proj".into(),
            org_id: "org_1".into(),
            name: "proj".into(),
            production_deployment_id: None,
            staging_deployment_id: None,
        });
        store.insert_deployment(Deployment {
            id: "dep_1".into(),
            project_id: "proj".into(),
            name: "dep_1".into(),
            status: DeploymentStatus::Ready,
            environment: None,
        });

        // Forbidden edge: null -> production
        let response = app
            .clone()
            .oneshot(patch_request(
                "proj",
                "dep_1",
                r#"{"environment":"production"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "INVALID_TRANSITION");

        // Unknown deployment
        let response = app
            .oneshot(patch_request("proj", "missing", r#"{"environment":"staging"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
