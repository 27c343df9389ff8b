//! Deployment resolution.
//!
//! Turns a validated credential (plus an optional explicit `Deployment-Id`
//! override) into a concrete deployment id. The two lookup shapes use
//! disjoint cache namespaces: explicit ids go through the ownership entry,
//! environment-implicit lookups go through the per-project pointer entry
//! that promotion invalidates and repopulates.

use crate::error::ErrorCode;
use registry::cache::{
    DEPLOYMENT_INFO_TTL, DEPLOYMENT_OWNER_TTL, KeyValueCache, POINTER_TTL, PROJECT_CONTEXT_TTL,
    keys,
};
use registry::model::{Deployment, Environment};
use registry::store::RelationalStore;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct ProjectContext<'a> {
    org_id: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct DeploymentInfo<'a> {
    project_id: &'a str,
    environment: Option<Environment>,
    status: registry::model::DeploymentStatus,
}

pub struct DeploymentResolver {
    store: Arc<dyn RelationalStore>,
    cache: Arc<dyn KeyValueCache>,
}

impl DeploymentResolver {
    pub fn new(store: Arc<dyn RelationalStore>, cache: Arc<dyn KeyValueCache>) -> Self {
        DeploymentResolver { store, cache }
    }

    /// Resolves the deployment a request should target. `Ok(None)` means the
    /// route does not need one and no override was supplied.
    pub async fn resolve(
        &self,
        project_id: &str,
        explicit: Option<&str>,
        target: Environment,
        required: bool,
    ) -> Result<Option<String>, ErrorCode> {
        self.ensure_project(project_id).await?;

        // An explicit id bypasses the slot system entirely; only ownership
        // is checked.
        if let Some(deployment_id) = explicit {
            return Ok(Some(self.resolve_explicit(project_id, deployment_id).await?));
        }

        if !required {
            return Ok(None);
        }

        match self.resolve_environment(project_id, target).await? {
            Some(deployment_id) => Ok(Some(deployment_id)),
            None => Err(ErrorCode::NoDeploymentFound),
        }
    }

    async fn ensure_project(&self, project_id: &str) -> Result<(), ErrorCode> {
        match self.cache.get(&keys::project_context(project_id)).await {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "project cache unavailable, falling back to store");
            }
        }

        let project = self
            .store
            .project(project_id)
            .await
            .map_err(|err| internal(project_id, err))?
            .ok_or(ErrorCode::ProjectNotFound)?;

        let context = ProjectContext {
            org_id: &project.org_id,
            name: &project.name,
        };
        if let Ok(serialized) = serde_json::to_string(&context)
            && let Err(err) = self
                .cache
                .set(&keys::project_context(project_id), &serialized, PROJECT_CONTEXT_TTL)
                .await
        {
            tracing::warn!(error = %err, "failed to cache project context");
        }
        Ok(())
    }

    async fn resolve_explicit(
        &self,
        project_id: &str,
        deployment_id: &str,
    ) -> Result<String, ErrorCode> {
        match self.cache.get(&keys::deployment_owner(deployment_id)).await {
            Ok(Some(owner)) => {
                return if owner == project_id {
                    Ok(deployment_id.to_string())
                } else {
                    Err(ErrorCode::DeploymentNotFound)
                };
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "deployment cache unavailable, falling back to store");
            }
        }

        let deployment = self
            .store
            .deployment(deployment_id)
            .await
            .map_err(|err| internal(project_id, err))?;

        match deployment {
            Some(deployment) if deployment.project_id == project_id => {
                self.cache_deployment(&deployment).await;
                Ok(deployment.id)
            }
            _ => Err(ErrorCode::DeploymentNotFound),
        }
    }

    async fn resolve_environment(
        &self,
        project_id: &str,
        target: Environment,
    ) -> Result<Option<String>, ErrorCode> {
        match self
            .cache
            .get(&keys::environment_pointer(project_id, target))
            .await
        {
            Ok(Some(deployment_id)) => return Ok(Some(deployment_id)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "pointer cache unavailable, falling back to store");
            }
        }

        let deployment = self
            .store
            .ready_deployment_in(project_id, target)
            .await
            .map_err(|err| internal(project_id, err))?;

        match deployment {
            None => Ok(None),
            Some(deployment) => {
                if let Err(err) = self
                    .cache
                    .set(
                        &keys::environment_pointer(project_id, target),
                        &deployment.id,
                        POINTER_TTL,
                    )
                    .await
                {
                    tracing::warn!(error = %err, "failed to cache environment pointer");
                }
                self.cache_deployment(&deployment).await;
                Ok(Some(deployment.id))
            }
        }
    }

    /// Best-effort write of the ownership and info entries.
    async fn cache_deployment(&self, deployment: &Deployment) {
        if let Err(err) = self
            .cache
            .set(
                &keys::deployment_owner(&deployment.id),
                &deployment.project_id,
                DEPLOYMENT_OWNER_TTL,
            )
            .await
        {
            tracing::warn!(error = %err, "failed to cache deployment ownership");
            return;
        }

        if deployment.environment.is_some() {
            let info = DeploymentInfo {
                project_id: &deployment.project_id,
                environment: deployment.environment,
                status: deployment.status,
            };
            if let Ok(serialized) = serde_json::to_string(&info)
                && let Err(err) = self
                    .cache
                    .set(&keys::deployment_info(&deployment.id), &serialized, DEPLOYMENT_INFO_TTL)
                    .await
            {
                tracing::warn!(error = %err, "failed to cache deployment info");
            }
        }
    }
}

fn internal(project_id: &str, err: registry::store::StoreError) -> ErrorCode {
    tracing::error!(project_id, error = %err, "store failure during deployment resolution");
    ErrorCode::Internal
}
