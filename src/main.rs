use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use en_hi_translator::{AppConfig, ModelRegistry, build_router, model::LoadStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    let registry = Arc::new(load_registry(&config)?);
    match registry.status() {
        LoadStatus::Loaded { metadata } => {
            info!(model = %metadata.name, device = %metadata.device, "translation model ready")
        }
        LoadStatus::WeightsMissing { path } => info!(
            path = %path.display(),
            "no weights artifact, /translate will answer 503"
        ),
        LoadStatus::NotAttempted => warn!("model loading skipped, /translate will answer 503"),
    }

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %listener.local_addr()?, frontend = %config.frontend_dir.display(), "listening");

    axum::serve(listener, build_router(config, registry)).await?;
    Ok(())
}

#[cfg(feature = "tch-backend")]
fn load_registry(config: &AppConfig) -> anyhow::Result<ModelRegistry> {
    info!(weights = %config.weights_path.display(), device = ?config.device, "loading model");
    let provider = en_hi_translator::model::TorchProvider::from_config(config);
    Ok(ModelRegistry::initialize(&config.weights_path, &provider)?)
}

#[cfg(not(feature = "tch-backend"))]
fn load_registry(_config: &AppConfig) -> anyhow::Result<ModelRegistry> {
    Ok(ModelRegistry::unloaded())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}
