use anyhow::Result;
use skybit_core::AppCore;
use tracing::{info, warn};

/// Run the engine until SIGINT or SIGTERM, then drain in-flight runs.
pub async fn run(core: AppCore) -> Result<()> {
    let report = core.start()?;
    println!(
        "Skybit daemon running ({} scheduled, {} workers). Press Ctrl-C to stop.",
        report.restored,
        core.pool().capacity()
    );
    for task_id in &report.failed {
        warn!(task_id = %task_id, "Task has an unusable schedule and was not scheduled");
    }

    wait_for_shutdown().await;
    info!("Shutdown requested, waiting for running tasks");
    core.shutdown().await;
    println!("Skybit daemon stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(err) => warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for Ctrl-C");
    }
}
