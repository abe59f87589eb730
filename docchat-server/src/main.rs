use std::sync::Arc;

use docchat_rag::{RagConfig, RagPipeline};
use docchat_server::server::{ServerConfig, run_server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = ServerConfig::from_env()?;
    let pipeline = Arc::new(RagPipeline::from_config(RagConfig::from_env()?)?);
    run_server(server, pipeline).await
}
