//! framecast publisher entry point.
//!
//! ```text
//! framecast-publisher                        Run with framecast-publisher.toml
//! framecast-publisher --config <path>        Load a custom config TOML
//! framecast-publisher --destination <addr>   Override the destination endpoint
//! framecast-publisher --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framecast_publisher::config::PublisherConfig;
use framecast_publisher::service::PublisherService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-publisher", about = "Streams JPEG video over UDP")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast-publisher.toml")]
    config: PathBuf,

    /// Destination host:port, overriding the config file.
    #[arg(short, long)]
    destination: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&PublisherConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = PublisherConfig::load(&cli.config);
    if let Some(destination) = cli.destination {
        config.network.destination = destination;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-publisher v{}", env!("CARGO_PKG_VERSION"));
    info!("destination: {}", config.network.destination);
    info!("quality: {}", config.stream.quality);
    info!("publish interval: {} ms", config.stream.publish_interval_ms);
    info!(
        "capture: {}x{} @ {} ms",
        config.capture.width, config.capture.height, config.capture.frame_interval_ms
    );

    let service = PublisherService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    let stop_clone = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop_clone.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
