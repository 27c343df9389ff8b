//! Tenant-resolving authentication/routing gateway.
//!
//! Per-request control flow: tenant resolver -> credential validator ->
//! deployment resolver -> route table -> forward. See `gateway::Gateway`
//! for the pipeline and `service::GatewayService` for the hyper wiring.

pub mod apikey;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics_defs;
pub mod resolver;
pub mod routes;
pub mod service;
pub mod tenant;
pub mod token;

pub use crate::error::{ErrorCode, GatewayError};
pub use crate::gateway::{Gateway, GatewayRequest, RouteDecision};

use registry::cache::KeyValueCache;
use registry::store::RelationalStore;
use registry::tasks::TaskSpawner;
use std::sync::Arc;

/// Builds the pipeline from config and runs the accept loop until failure.
pub async fn run(
    config: config::Config,
    store: Arc<dyn RelationalStore>,
    cache: Arc<dyn KeyValueCache>,
    spawner: Arc<dyn TaskSpawner>,
) -> Result<(), GatewayError> {
    let gateway = Arc::new(Gateway::new(&config, store, cache, spawner));
    let service = service::GatewayService::new(gateway, &config.upstream_url);

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        "gateway listening"
    );
    shared::http::run_http_service(&config.listener.host, config.listener.port, service).await
}
