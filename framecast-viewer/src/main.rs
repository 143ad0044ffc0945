//! framecast viewer entry point.
//!
//! ```text
//! framecast-viewer                   Run with framecast-viewer.toml
//! framecast-viewer --config <path>   Load a custom config TOML
//! framecast-viewer --listen <addr>   Override the listen endpoint
//! framecast-viewer --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framecast_viewer::config::ViewerConfig;
use framecast_viewer::service::ViewerService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-viewer", about = "Receives and decodes JPEG video over UDP")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast-viewer.toml")]
    config: PathBuf,

    /// Listen host:port, overriding the config file.
    #[arg(short, long)]
    listen: Option<String>,

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
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = ViewerConfig::load(&cli.config);
    if let Some(listen) = cli.listen {
        config.network.listen = listen;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-viewer v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}", config.network.listen);
    info!("topic: {}", config.network.topic);
    info!("render interval: {} ms", config.render.interval_ms);

    let service = ViewerService::new(config);
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
