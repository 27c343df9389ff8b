//! Relational store seam.
//!
//! The gateway and the promotion state machine only ever talk to the
//! [`RelationalStore`] trait. Writes that must be atomic go through a
//! [`UnitOfWork`], which stages mutations and applies them on commit;
//! dropping an uncommitted unit of work discards everything it staged.
//!
//! `begin` also acquires a per-project advisory lock held for the life of
//! the unit of work, so concurrent promotions touching the same project
//! serialize in the application rather than relying on whatever row-level
//! locking the backing store happens to provide.

use crate::model::{ApiKey, Deployment, DeploymentStatus, Environment, Project};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic commit identifier, usable for read-your-write consistency by
/// subsystems that observe the store through other channels.
pub type TxId = u64;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("row not found: {0}")]
    MissingRow(&'static str),
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn project(&self, project_id: &str) -> Result<Option<Project>, StoreError>;

    async fn deployment(&self, deployment_id: &str) -> Result<Option<Deployment>, StoreError>;

    /// The ready deployment currently occupying `environment` for the
    /// project, if any.
    async fn ready_deployment_in(
        &self,
        project_id: &str,
        environment: Environment,
    ) -> Result<Option<Deployment>, StoreError>;

    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Bumps the key's `last_used_at`. Callers treat failure as loggable,
    /// never fatal.
    async fn touch_api_key(&self, key_id: &str) -> Result<(), StoreError>;

    /// Opens a unit of work scoped to one project, holding that project's
    /// advisory lock until commit or drop.
    async fn begin(&self, project_id: &str) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// Transactional scope over one project's rows. Reads observe writes staged
/// earlier in the same unit of work.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn project(&mut self, project_id: &str) -> Result<Option<Project>, StoreError>;

    async fn deployment(&mut self, deployment_id: &str) -> Result<Option<Deployment>, StoreError>;

    /// The deployment occupying `environment` for the project, regardless of
    /// status.
    async fn deployment_in(
        &mut self,
        project_id: &str,
        environment: Environment,
    ) -> Result<Option<Deployment>, StoreError>;

    async fn set_deployment_environment(
        &mut self,
        deployment_id: &str,
        environment: Option<Environment>,
    ) -> Result<(), StoreError>;

    async fn set_environment_pointer(
        &mut self,
        project_id: &str,
        environment: Environment,
        deployment_id: Option<String>,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<TxId, StoreError>;
}

fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Default)]
struct Tables {
    projects: HashMap<String, Project>,
    deployments: HashMap<String, Deployment>,
    api_keys: HashMap<String, ApiKey>,
}

/// In-memory store backing tests and single-node deployments.
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    project_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_tx: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            tables: Arc::new(RwLock::new(Tables::default())),
            project_locks: Mutex::new(HashMap::new()),
            next_tx: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn insert_project(&self, project: Project) {
        self.tables.write().projects.insert(project.id.clone(), project);
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        self.tables
            .write()
            .deployments
            .insert(deployment.id.clone(), deployment);
    }

    pub fn insert_api_key(&self, key: ApiKey) {
        self.tables.write().api_keys.insert(key.id.clone(), key);
    }

    fn project_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.project_locks.lock();
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn project(&self, project_id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.tables.read().projects.get(project_id).cloned())
    }

    async fn deployment(&self, deployment_id: &str) -> Result<Option<Deployment>, StoreError> {
        Ok(self.tables.read().deployments.get(deployment_id).cloned())
    }

    async fn ready_deployment_in(
        &self,
        project_id: &str,
        environment: Environment,
    ) -> Result<Option<Deployment>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .deployments
            .values()
            .find(|d| {
                d.project_id == project_id
                    && d.environment == Some(environment)
                    && d.status == DeploymentStatus::Ready
            })
            .cloned())
    }

    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .api_keys
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn touch_api_key(&self, key_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let key = tables
            .api_keys
            .get_mut(key_id)
            .ok_or(StoreError::MissingRow("api_key"))?;
        key.last_used_at = Some(epoch_ms_now());
        Ok(())
    }

    async fn begin(&self, project_id: &str) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.project_lock(project_id).lock_owned().await;

        Ok(Box::new(MemoryUnitOfWork {
            tables: self.tables.clone(),
            staged_projects: HashMap::new(),
            staged_deployments: HashMap::new(),
            next_tx: self.next_tx.clone(),
            _lock: guard,
        }))
    }
}

struct MemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    staged_projects: HashMap<String, Project>,
    staged_deployments: HashMap<String, Deployment>,
    next_tx: Arc<AtomicU64>,
    _lock: tokio::sync::OwnedMutexGuard<()>,
}

impl MemoryUnitOfWork {
    fn read_project(&self, project_id: &str) -> Option<Project> {
        self.staged_projects
            .get(project_id)
            .cloned()
            .or_else(|| self.tables.read().projects.get(project_id).cloned())
    }

    fn read_deployment(&self, deployment_id: &str) -> Option<Deployment> {
        self.staged_deployments
            .get(deployment_id)
            .cloned()
            .or_else(|| self.tables.read().deployments.get(deployment_id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn project(&mut self, project_id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.read_project(project_id))
    }

    async fn deployment(&mut self, deployment_id: &str) -> Result<Option<Deployment>, StoreError> {
        Ok(self.read_deployment(deployment_id))
    }

    async fn deployment_in(
        &mut self,
        project_id: &str,
        environment: Environment,
    ) -> Result<Option<Deployment>, StoreError> {
        let tables = self.tables.read();
        let found = tables
            .deployments
            .values()
            .map(|d| self.staged_deployments.get(&d.id).unwrap_or(d))
            .find(|d| d.project_id == project_id && d.environment == Some(environment))
            .cloned();
        Ok(found)
    }

    async fn set_deployment_environment(
        &mut self,
        deployment_id: &str,
        environment: Option<Environment>,
    ) -> Result<(), StoreError> {
        let mut deployment = self
            .read_deployment(deployment_id)
            .ok_or(StoreError::MissingRow("deployment"))?;
        deployment.environment = environment;
        self.staged_deployments
            .insert(deployment_id.to_string(), deployment);
        Ok(())
    }

    async fn set_environment_pointer(
        &mut self,
        project_id: &str,
        environment: Environment,
        deployment_id: Option<String>,
    ) -> Result<(), StoreError> {
        let mut project = self
            .read_project(project_id)
            .ok_or(StoreError::MissingRow("project"))?;
        match environment {
            Environment::Production => project.production_deployment_id = deployment_id,
            Environment::Staging => project.staging_deployment_id = deployment_id,
        }
        self.staged_projects.insert(project_id.to_string(), project);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<TxId, StoreError> {
        let mut tables = self.tables.write();
        for (id, project) in self.staged_projects {
            tables.projects.insert(id, project);
        }
        for (id, deployment) in self.staged_deployments {
            tables.deployments.insert(id, deployment);
        }
        Ok(self.next_tx.fetch_add(1, Ordering::Relaxed))
    }
}
