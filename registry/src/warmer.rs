//! Search-index configuration warmer.
//!
//! After a promotion commits, the external index/configuration loader is
//! asked to preload the project's config so the first tenant request after a
//! slot change does not pay the cold-load cost. The call is fire-and-forget;
//! failures are logged by the scheduler and never reach the promotion caller.

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum WarmError {
    #[error("warm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("warm request rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait IndexWarmer: Send + Sync {
    async fn warm(&self, project_id: &str, deployment_id: &str) -> Result<(), WarmError>;
}

pub struct HttpIndexWarmer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIndexWarmer {
    pub fn new(base_url: &str) -> Self {
        HttpIndexWarmer {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IndexWarmer for HttpIndexWarmer {
    async fn warm(&self, project_id: &str, deployment_id: &str) -> Result<(), WarmError> {
        let url = format!(
            "{}/internal/projects/{project_id}/deployments/{deployment_id}/index-config",
            self.base_url
        );

        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            return Err(WarmError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Warmer for deployments without an index loader configured.
pub struct NoopIndexWarmer;

#[async_trait]
impl IndexWarmer for NoopIndexWarmer {
    async fn warm(&self, _project_id: &str, _deployment_id: &str) -> Result<(), WarmError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn warm_posts_to_index_loader() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/internal/projects/proj/deployments/dep_1/index-config"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let warmer = HttpIndexWarmer::new(&server.uri());
        warmer.warm("proj", "dep_1").await.unwrap();
    }

    #[tokio::test]
    async fn warm_surfaces_rejections() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let warmer = HttpIndexWarmer::new(&server.uri());
        let err = warmer.warm("proj", "dep_1").await.unwrap_err();
        assert!(matches!(err, WarmError::Rejected(503)));
    }
}
