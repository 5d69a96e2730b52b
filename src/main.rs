//! PBX bridge
//!
//! Connects to the switch's manager interface, accepts AudioSocket media
//! streams and runs outbound calling campaigns. A small HTTP surface starts
//! and stops campaigns and receives call outcomes.

mod models;
mod server;

use server::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Load environment variables before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pbx_bridge=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        "Starting PBX bridge (manager {}, media {}, http port {})",
        config.ami.address(),
        config.media.bind_addr(),
        config.http_port
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(server::run_server(config))
}
