//! Robofront Server
//!
//! Binds the listener, resumes a saved world if one exists, and runs the
//! tick loop until Ctrl-C. The world is saved on the way out.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use robofront::{GameServer, ServerConfig, PROTOCOL_VERSION, VERSION};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = ServerConfig::from_env();
    info!("Robofront Server v{} (protocol {})", VERSION, PROTOCOL_VERSION);
    info!(
        "Tick interval: {} ms, countdown: {} ticks, world file: {}",
        config.tick_interval.as_millis(),
        config.countdown_ticks,
        config.world_file.display()
    );

    let server = GameServer::bind(config).await.context("failed to start server")?;
    server
        .run(tokio::signal::ctrl_c())
        .await
        .context("failed to shut down cleanly")?;

    Ok(())
}
