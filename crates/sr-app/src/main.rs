mod backend;
mod clients;
mod config;
mod error;

use sr_core::Coordinator;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    let collaborators = clients::build(&config).await?;
    let coordinator = Coordinator::new(collaborators, config.pipeline.clone());

    backend::serve(&config, coordinator).await
}
