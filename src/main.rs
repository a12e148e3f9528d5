use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use race_replay::{Config, ReplayApp};

#[tokio::main]
async fn main() {
    // Set log level by RUST_LOG if set or default to `info`
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(true)
        .init();

    info!("Race Replay Server v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!("Configuration error: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = ReplayApp::new(config).run().await {
        error!("Server error: {}", err);
        std::process::exit(1);
    }
}
