//! `gambit-server`: runs a Gambit chess server configured from `GAMBIT_*`
//! environment variables.

use std::sync::Arc;

use gambit::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(addr = %config.bind_addr, "starting gambit-server");

    let server = GambitServer::builder()
        .config(config)
        .build(Arc::new(MemoryStore::new()))
        .await?;
    server.run().await?;
    Ok(())
}
