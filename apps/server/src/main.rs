//! tcpfile receiver entry point.

mod app;
mod config;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_address,
        port = config.port,
        destination = %config.destination_dir.display(),
        "tcpfile receiver starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tcpfile-worker")
        .build()?;
    runtime.block_on(app::run(config))?;

    tracing::info!("receiver stopped");
    Ok(())
}

/// `RUST_LOG` selects the filter; unset or unparsable falls back to `info`.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
