mod config;
mod logging;
mod server;
mod ws;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use beamcast_signaling::SignalingService;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = config::load_config();

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Beamcast signaling server starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Build the signaling core
    let validator = config.validator.build()?;
    let service = SignalingService::new(config.signaling.clone(), validator);

    // 5. Background tasks (stats push, peer reaper)
    let shutdown = CancellationToken::new();
    let tasks = service.spawn_background_tasks(&shutdown);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        signal_token.cancel();
    });

    // 6. Serve until shutdown
    let served = server::serve(&config, service, shutdown.clone()).await;
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    served?;
    info!("Beamcast stopped");
    Ok(())
}
