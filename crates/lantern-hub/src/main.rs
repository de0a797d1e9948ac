//! Lantern hub binary.
//!
//! # Usage
//!
//! ```bash
//! # Default bind (0.0.0.0:3000), peers connect to ws://<host>:3000/mesh
//! lantern-hub
//!
//! # Custom bind and verbose logging
//! lantern-hub --bind 127.0.0.1:4000 --log-level debug
//! ```

use clap::Parser;
use lantern_hub::{Hub, HubConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lantern mesh hub
#[derive(Parser, Debug)]
#[command(name = "lantern-hub")]
#[command(about = "Transparent fan-out relay for lantern mesh peers")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    bind: String,

    /// Per-frame size cap in bytes
    #[arg(long, default_value_t = lantern_proto::MAX_FRAME_SIZE)]
    max_frame_bytes: usize,

    /// Outbound queue depth per session
    #[arg(long, default_value = "64")]
    session_queue: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("lantern hub starting");

    let config = HubConfig {
        bind_addr: args.bind,
        max_frame_bytes: args.max_frame_bytes,
        session_queue: args.session_queue,
    };

    let hub = Hub::bind(config).await?;
    tracing::info!("hub listening on {}", hub.local_addr()?);

    hub.run().await?;

    Ok(())
}
