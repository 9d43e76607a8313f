//! modebench server binary.
//!
//! ```bash
//! # Defaults: port 8000, store at data/metrics.jsonl
//! modebench-server
//!
//! MODEBENCH_PORT=9000 MODEBENCH_MAX_BATCH_SIZE=16 modebench-server
//! ```

use modebench_server::{run_server, AppConfig, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("modebench_server=info,modebench_core=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = ServerConfig { app: AppConfig::from_env(), print_banner: true };
    run_server(config).await
}
