mod config;

use clap::Parser;
use config::{Config, ConfigError, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use registry::cache::MokaCache;
use registry::model::{ApiKey, Deployment, Project};
use registry::promotion::Promoter;
use registry::store::MemoryStore;
use registry::tasks::TokioSpawner;
use registry::warmer::{HttpIndexWarmer, IndexWarmer, NoopIndexWarmer};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "portico", about = "Multi-tenant API gateway and promotion service")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "portico.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] gateway::GatewayError),
    #[error(transparent)]
    AdminApi(#[from] registry::admin_api::AdminApiError),
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load {}: {err}", cli.config.display());
            process::exit(1);
        }
    };

    init_tracing();

    // Keep the guard alive for the process lifetime
    let _sentry_guard = config.common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    if let Some(metrics_config) = &config.common.metrics
        && let Err(err) = install_statsd(metrics_config)
    {
        tracing::warn!(error = %err, "metrics disabled");
    }
    shared::metrics_defs::describe_all(gateway::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(registry::metrics_defs::ALL_METRICS);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(config)) {
        tracing::error!(error = %err, "portico exited with error");
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), RunError> {
    let store = Arc::new(MemoryStore::new());
    if let Some(seed_file) = &config.seed_file {
        load_seed(&store, seed_file)?;
    }

    let cache = Arc::new(MokaCache::new());
    let spawner = Arc::new(TokioSpawner);

    let admin = config.admin.unwrap_or_default();
    let warmer: Arc<dyn IndexWarmer> = match &admin.index_loader_url {
        Some(url) => Arc::new(HttpIndexWarmer::new(url)),
        None => Arc::new(NoopIndexWarmer),
    };
    let promoter = Arc::new(Promoter::new(
        store.clone(),
        cache.clone(),
        warmer,
        spawner.clone(),
    ));

    tracing::info!(
        host = %admin.listener.host,
        port = admin.listener.port,
        "admin API listening"
    );

    let gateway_task = gateway::run(config.gateway, store.clone(), cache.clone(), spawner);
    let admin_task =
        registry::admin_api::serve(&admin.listener.host, admin.listener.port, promoter);

    tokio::try_join!(
        async { gateway_task.await.map_err(RunError::from) },
        async { admin_task.await.map_err(RunError::from) },
    )?;
    Ok(())
}

/// Relational fixtures for local development; the in-memory store starts
/// empty otherwise.
#[derive(Deserialize, Default)]
struct SeedData {
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    deployments: Vec<Deployment>,
    #[serde(default)]
    api_keys: Vec<ApiKey>,
}

fn load_seed(store: &MemoryStore, path: &Path) -> Result<(), ConfigError> {
    let file = File::open(path)?;
    let seed: SeedData = serde_yaml::from_reader(file)?;

    tracing::info!(
        projects = seed.projects.len(),
        deployments = seed.deployments.len(),
        api_keys = seed.api_keys.len(),
        "seeding in-memory store"
    );

    for project in seed.projects {
        store.insert_project(project);
    }
    for deployment in seed.deployments {
        store.insert_deployment(deployment);
    }
    for api_key in seed.api_keys {
        store.insert_api_key(api_key);
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(thiserror::Error, Debug)]
enum MetricsInitError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("could not install metrics recorder: {0}")]
    Install(String),
}

fn install_statsd(config: &MetricsConfig) -> Result<(), MetricsInitError> {
    let recorder =
        StatsdBuilder::from(&config.statsd_host, config.statsd_port).build(Some("portico"))?;
    metrics::set_global_recorder(recorder).map_err(|err| MetricsInitError::Install(err.to_string()))?;
    Ok(())
}
