//! Environment promotion state machine.
//!
//! Moves a deployment between environment slots under the transition graph
//!
//! ```text
//!   null -> staging -> production
//!   staging -> null
//!   production -> staging | null
//! ```
//!
//! `null -> production` is forbidden; callers must stage first. All row
//! mutations for one call happen inside a single unit of work, which holds
//! the project's advisory lock, so two promotions on the same project
//! serialize. After commit the shared cache entries are invalidated
//! synchronously, then the index warmer is scheduled fire-and-forget.

use crate::cache::{self, KeyValueCache, keys};
use crate::metrics_defs::{INDEX_WARM_FAILED, PROMOTION_COMMITTED, PROMOTION_REJECTED};
use crate::model::Environment;
use crate::store::{RelationalStore, StoreError, TxId};
use crate::tasks::TaskSpawner;
use crate::warmer::IndexWarmer;
use shared::counter;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PromotionError {
    #[error("project not found")]
    ProjectNotFound,

    #[error("deployment not found or does not belong to this project")]
    DeploymentNotFound,

    #[error("deployment must be ready to enter an environment")]
    DeploymentNotReady,

    #[error("cannot promote null -> production directly, promote to staging first")]
    StageFirst,

    #[error("transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] cache::CacheError),
}

#[derive(Debug, PartialEq)]
pub struct PromotionOutcome {
    /// `None` when the requested slot equals the current one and nothing was
    /// written.
    pub txid: Option<TxId>,
    /// The previous production deployment, when promoting to production
    /// displaced one into staging.
    pub demoted: Option<String>,
}

fn slot_name(environment: Option<Environment>) -> &'static str {
    match environment {
        Some(env) => env.as_str(),
        None => "null",
    }
}

/// Edge membership for the transition graph. `current == target` is handled
/// by the caller as a no-op and never reaches this check.
fn validate_transition(
    current: Option<Environment>,
    target: Option<Environment>,
) -> Result<(), PromotionError> {
    const ALLOWED: &[(Option<Environment>, Option<Environment>)] = &[
        (None, Some(Environment::Staging)),
        (Some(Environment::Staging), Some(Environment::Production)),
        (Some(Environment::Staging), None),
        (Some(Environment::Production), Some(Environment::Staging)),
        (Some(Environment::Production), None),
    ];

    if ALLOWED.contains(&(current, target)) {
        return Ok(());
    }

    if current.is_none() && target == Some(Environment::Production) {
        return Err(PromotionError::StageFirst);
    }

    Err(PromotionError::InvalidTransition {
        from: slot_name(current),
        to: slot_name(target),
    })
}

pub struct Promoter {
    store: Arc<dyn RelationalStore>,
    cache: Arc<dyn KeyValueCache>,
    warmer: Arc<dyn IndexWarmer>,
    spawner: Arc<dyn TaskSpawner>,
}

impl Promoter {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        cache: Arc<dyn KeyValueCache>,
        warmer: Arc<dyn IndexWarmer>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Promoter {
            store,
            cache,
            warmer,
            spawner,
        }
    }

    /// Moves `deployment_id` into `target` (or out of any slot, for `None`).
    pub async fn change_environment(
        &self,
        project_id: &str,
        deployment_id: &str,
        target: Option<Environment>,
    ) -> Result<PromotionOutcome, PromotionError> {
        let result = self.apply(project_id, deployment_id, target).await;

        match &result {
            Ok(outcome) if outcome.txid.is_some() => counter!(PROMOTION_COMMITTED).increment(1),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    project_id,
                    deployment_id,
                    target = slot_name(target),
                    error = %err,
                    "environment change rejected"
                );
                counter!(PROMOTION_REJECTED).increment(1);
            }
        }

        result
    }

    async fn apply(
        &self,
        project_id: &str,
        deployment_id: &str,
        target: Option<Environment>,
    ) -> Result<PromotionOutcome, PromotionError> {
        let mut uow = self.store.begin(project_id).await?;

        let project = uow
            .project(project_id)
            .await?
            .ok_or(PromotionError::ProjectNotFound)?;
        let deployment = uow
            .deployment(deployment_id)
            .await?
            .filter(|d| d.project_id == project_id)
            .ok_or(PromotionError::DeploymentNotFound)?;

        if deployment.environment == target {
            return Ok(PromotionOutcome {
                txid: None,
                demoted: None,
            });
        }

        if target.is_some() && deployment.status != crate::model::DeploymentStatus::Ready {
            return Err(PromotionError::DeploymentNotReady);
        }

        validate_transition(deployment.environment, target)?;

        let mut demoted = None;

        match target {
            Some(Environment::Production) => {
                // The displaced production deployment stays available as a
                // rollback target in staging instead of being cleared.
                if let Some(occupant) = uow.deployment_in(project_id, Environment::Production).await?
                {
                    uow.set_deployment_environment(&occupant.id, Some(Environment::Staging))
                        .await?;
                    demoted = Some(occupant.id);
                }
                uow.set_deployment_environment(deployment_id, Some(Environment::Production))
                    .await?;
                uow.set_environment_pointer(
                    project_id,
                    Environment::Production,
                    Some(deployment_id.to_string()),
                )
                .await?;
                // The promoted deployment vacated staging; the demoted one
                // (if any) takes its place.
                uow.set_environment_pointer(project_id, Environment::Staging, demoted.clone())
                    .await?;
            }
            Some(Environment::Staging) => {
                if let Some(occupant) = uow.deployment_in(project_id, Environment::Staging).await?
                    && occupant.id != deployment_id
                {
                    uow.set_deployment_environment(&occupant.id, None).await?;
                }
                uow.set_deployment_environment(deployment_id, Some(Environment::Staging))
                    .await?;
                uow.set_environment_pointer(
                    project_id,
                    Environment::Staging,
                    Some(deployment_id.to_string()),
                )
                .await?;
                if deployment.environment == Some(Environment::Production) {
                    uow.set_environment_pointer(project_id, Environment::Production, None)
                        .await?;
                }
            }
            None => {
                uow.set_deployment_environment(deployment_id, None).await?;
                if let Some(previous) = deployment.environment {
                    let pointed_here = match previous {
                        Environment::Production => {
                            project.production_deployment_id.as_deref() == Some(deployment_id)
                        }
                        Environment::Staging => {
                            project.staging_deployment_id.as_deref() == Some(deployment_id)
                        }
                    };
                    if pointed_here {
                        uow.set_environment_pointer(project_id, previous, None).await?;
                    }
                }
            }
        }

        let txid = uow.commit().await?;

        // Correctness-affecting invalidation happens before returning so the
        // next request cannot observe a stale slot assignment.
        self.sync_cache(project_id, deployment_id, target).await?;
        self.schedule_warm(project_id, deployment_id);

        Ok(PromotionOutcome {
            txid: Some(txid),
            demoted,
        })
    }

    async fn sync_cache(
        &self,
        project_id: &str,
        deployment_id: &str,
        target: Option<Environment>,
    ) -> Result<(), cache::CacheError> {
        self.cache
            .delete(&keys::environment_pointer(project_id, Environment::Production))
            .await?;
        self.cache
            .delete(&keys::environment_pointer(project_id, Environment::Staging))
            .await?;
        self.cache
            .delete(&keys::deployment_owner(deployment_id))
            .await?;
        self.cache
            .delete(&keys::deployment_info(deployment_id))
            .await?;
        self.cache.delete(&keys::project_context(project_id)).await?;

        if let Some(env) = target {
            self.cache
                .set(
                    &keys::environment_pointer(project_id, env),
                    deployment_id,
                    cache::POINTER_TTL,
                )
                .await?;
        }
        Ok(())
    }

    fn schedule_warm(&self, project_id: &str, deployment_id: &str) {
        let warmer = self.warmer.clone();
        let project = project_id.to_string();
        let deployment = deployment_id.to_string();

        self.spawner.spawn(Box::pin(async move {
            if let Err(err) = warmer.warm(&project, &deployment).await {
                counter!(INDEX_WARM_FAILED).increment(1);
                tracing::warn!(project_id = %project, error = %err, "index warm failed");
            }
        }));
    }
}
