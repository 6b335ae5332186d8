//! Tray demo entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting tray demo");

    // Load configuration; a missing file means defaults.
    let config = config::Config::load()?;
    tracing::info!(
        name = %config.name,
        quit_after_secs = config.quit_after_secs,
        "configuration loaded"
    );

    // Callbacks run on this runtime's blocking pool; the pump gets its
    // own thread.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("tray demo shut down cleanly");
    Ok(())
}
