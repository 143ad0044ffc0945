//! Configuration for the publisher binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use framecast_core::session::SessionParams;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Encoding and pacing settings.
    pub stream: StreamConfig,
    /// Synthetic capture settings.
    pub capture: CaptureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Destination `host:port` the video packets are sent to.
    pub destination: String,
    /// Local address the UDP socket binds to.
    pub bind: String,
}

/// Encoding and pacing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// JPEG quality factor (1-100).
    pub quality: u8,
    /// Downscale frames wider than this before encoding (0 = off).
    pub max_width: u32,
    /// Publish tick period in milliseconds.
    pub publish_interval_ms: u64,
    /// Logical source identifier stamped on every packet.
    pub source_id: u32,
    /// Topic name the packets are published under.
    pub topic: String,
}

/// Synthetic capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Source frame width in pixels.
    pub width: u32,
    /// Source frame height in pixels.
    pub height: u32,
    /// Native source pacing in milliseconds.
    pub frame_interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            stream: StreamConfig::default(),
            capture: CaptureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            destination: "127.0.0.1:5600".into(),
            bind: "0.0.0.0:0".into(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            quality: 75,
            max_width: 640,
            publish_interval_ms: 100,
            source_id: 0,
            topic: "video".into(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_interval_ms: 33,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl PublisherConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }

    /// Convert stream settings into validated [`SessionParams`].
    pub fn to_session_params(&self) -> SessionParams {
        SessionParams::new()
            .with_quality(self.stream.quality)
            .with_max_width(self.stream.max_width)
            .with_publish_interval(Duration::from_millis(self.stream.publish_interval_ms))
            .with_source_id(self.stream.source_id)
            .with_topic(self.stream.topic.clone())
    }
}

// ── Tests ────────────────────────────────────────────────────────
