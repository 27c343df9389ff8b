use serde::{Deserialize, Serialize};

/// An environment slot a deployment can occupy. At most one deployment per
/// project holds each slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Ready,
    Error,
}

/// `sk` keys may read and write, `pk` keys are read-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Sk,
    Pk,
}

/// Selects the environment slot a key targets when no explicit deployment
/// override is supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEnvironment {
    Live,
    Test,
}

impl KeyEnvironment {
    pub const fn default_target(&self) -> Environment {
        match self {
            KeyEnvironment::Live => Environment::Production,
            KeyEnvironment::Test => Environment::Staging,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub production_deployment_id: Option<String>,
    pub staging_deployment_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub status: DeploymentStatus,
    pub environment: Option<Environment>,
}

/// A long-lived bearer credential. Only the one-way hash of the secret is
/// ever stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub project_id: String,
    pub org_id: String,
    pub name: String,
    pub key_hash: String,
    pub key_type: KeyType,
    pub environment: KeyEnvironment,
    pub is_active: bool,
    /// Milliseconds since the unix epoch; updated best-effort on use.
    pub last_used_at: Option<u64>,
}
