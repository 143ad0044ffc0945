//! Streaming session: endpoint identity, codec parameters, and the
//! toggles exposed to the control surface.
//!
//! A [`StreamSession`] exists from "start streaming" to "stop
//! streaming". Construction validates the manual destination endpoint
//! and the parameters; a bad configuration is rejected here and nothing
//! downstream ever runs with it. While the session's `streaming_active`
//! toggle is off, capture continues (the local preview keeps working)
//! but nothing is encoded or published.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StreamError;
use crate::packet::DEFAULT_SOURCE_ID;

/// Topic used when none is configured.
pub const DEFAULT_TOPIC: &str = "video";

// ── SessionControls ──────────────────────────────────────────────

/// Shared toggles driven by the external control surface.
///
/// Both flags may be flipped from any thread at any time; the services
/// observe the change at their next natural step, letting in-flight
/// work finish first.
#[derive(Debug)]
pub struct SessionControls {
    streaming_active: AtomicBool,
    show_live_preview: AtomicBool,
}

impl SessionControls {
    pub fn new(streaming_active: bool, show_live_preview: bool) -> Self {
        Self {
            streaming_active: AtomicBool::new(streaming_active),
            show_live_preview: AtomicBool::new(show_live_preview),
        }
    }

    /// Enables or disables encode + publish.
    pub fn set_streaming_active(&self, active: bool) {
        self.streaming_active.store(active, Ordering::SeqCst);
        info!(active, "streaming toggled");
    }

    pub fn streaming_active(&self) -> bool {
        self.streaming_active.load(Ordering::SeqCst)
    }

    /// Enables or disables the local preview mirror.
    pub fn set_show_live_preview(&self, show: bool) {
        self.show_live_preview.store(show, Ordering::SeqCst);
    }

    pub fn show_live_preview(&self) -> bool {
        self.show_live_preview.load(Ordering::SeqCst)
    }
}

impl Default for SessionControls {
    /// Streaming on, preview off: the headless publisher default.
    fn default() -> Self {
        Self::new(true, false)
    }
}

// ── SessionParams ────────────────────────────────────────────────

/// Codec and pacing parameters for one streaming session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionParams {
    /// JPEG quality factor (1-100).
    pub quality: u8,

    /// Resolution cap: frames wider than this are downscaled before
    /// encode. 0 disables the cap.
    pub max_width: u32,

    /// Publisher tick period in milliseconds.
    pub publish_interval_ms: u64,

    /// Logical origin identifier carried in every packet.
    pub source_id: u32,

    /// Transport topic the packets are published on.
    pub topic: String,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            quality: crate::codec::DEFAULT_QUALITY,
            max_width: 640,
            publish_interval_ms: 100,
            source_id: DEFAULT_SOURCE_ID,
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl SessionParams {
    /// Create parameters with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set quality, clamped to 1..=100.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Set the resolution cap (0 = uncapped).
    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = max_width;
        self
    }

    /// Set the publisher tick period, floored at 1 ms.
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    /// Set the transport topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the source identifier.
    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = source_id;
        self
    }

    /// Publisher tick period as a `Duration`.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    /// Rejects parameters no session should ever run with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.quality == 0 || self.quality > 100 {
            return Err(StreamError::Config(format!(
                "quality must be 1-100, got {}",
                self.quality
            )));
        }
        if self.publish_interval_ms == 0 {
            return Err(StreamError::Config("publish interval must be > 0".into()));
        }
        if self.topic.is_empty() {
            return Err(StreamError::Config("topic must not be empty".into()));
        }
        Ok(())
    }
}

// ── StreamSession ────────────────────────────────────────────────

/// One manual streaming session toward a fixed destination.
#[derive(Debug, Clone)]
pub struct StreamSession {
    /// Resolved destination endpoint.
    pub endpoint: SocketAddr,
    /// Codec and pacing parameters.
    pub params: SessionParams,
    controls: Arc<SessionControls>,
}

impl StreamSession {
    /// Starts a session toward `endpoint` ("host:port").
    ///
    /// Configuration faults (an empty or unresolvable endpoint, bad
    /// parameters) are rejected here and streaming does not begin.
    pub fn start(endpoint: &str, params: SessionParams) -> Result<Self, StreamError> {
        params.validate()?;
        let endpoint = resolve_endpoint(endpoint)?;
        info!(%endpoint, topic = %params.topic, "stream session started");
        Ok(Self {
            endpoint,
            params,
            controls: Arc::new(SessionControls::default()),
        })
    }

    /// Handle shared with the services and the control surface.
    pub fn controls(&self) -> Arc<SessionControls> {
        Arc::clone(&self.controls)
    }

    /// Control-surface operation: enable/disable encode + publish.
    pub fn set_streaming_active(&self, active: bool) {
        self.controls.set_streaming_active(active);
    }

    /// Control-surface operation: enable/disable the preview mirror.
    pub fn set_show_live_preview(&self, show: bool) {
        self.controls.set_show_live_preview(show);
    }
}

/// Resolves "host:port" to a socket address.
pub fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr, StreamError> {
    if endpoint.trim().is_empty() {
        return Err(StreamError::InvalidEndpoint(
            "destination host:port is empty".into(),
        ));
    }
    endpoint
        .to_socket_addrs()
        .map_err(|e| StreamError::InvalidEndpoint(format!("{endpoint}: {e}")))?
        .next()
        .ok_or_else(|| StreamError::InvalidEndpoint(format!("{endpoint}: resolved to nothing")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controls_toggle() {
        let controls = SessionControls::default();
        assert!(controls.streaming_active());
        assert!(!controls.show_live_preview());

        controls.set_streaming_active(false);
        controls.set_show_live_preview(true);
        assert!(!controls.streaming_active());
        assert!(controls.show_live_preview());
    }

    #[test]
    fn params_defaults() {
        let p = SessionParams::default();
        assert_eq!(p.quality, 75);
        assert_eq!(p.max_width, 640);
        assert_eq!(p.publish_interval(), Duration::from_millis(100));
        assert_eq!(p.source_id, 0);
        assert_eq!(p.topic, "video");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn params_builders_clamp() {
        let p = SessionParams::new()
            .with_quality(0)
            .with_publish_interval(Duration::ZERO);
        assert_eq!(p.quality, 1);
        assert_eq!(p.publish_interval_ms, 1);

        let p = SessionParams::new().with_quality(255);
        assert_eq!(p.quality, 100);
    }

    #[test]
    fn params_validate_rejects_bad_values() {
        let mut p = SessionParams::default();
        p.topic.clear();
        assert!(matches!(p.validate(), Err(StreamError::Config(_))));

        let mut p = SessionParams::default();
        p.publish_interval_ms = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn session_rejects_missing_endpoint() {
        let err = StreamSession::start("", SessionParams::default()).unwrap_err();
        assert!(matches!(err, StreamError::InvalidEndpoint(_)));

        let err = StreamSession::start("   ", SessionParams::default()).unwrap_err();
        assert!(matches!(err, StreamError::InvalidEndpoint(_)));
    }

    #[test]
    fn session_rejects_unparsable_endpoint() {
        let err = StreamSession::start("no-port-here", SessionParams::default()).unwrap_err();
        assert!(matches!(err, StreamError::InvalidEndpoint(_)));
    }

    #[test]
    fn session_starts_with_valid_endpoint() {
        let session = StreamSession::start("127.0.0.1:5600", SessionParams::default()).unwrap();
        assert_eq!(session.endpoint.port(), 5600);
        assert!(session.controls().streaming_active());

        session.set_streaming_active(false);
        assert!(!session.controls().streaming_active());
    }

    #[test]
    fn session_rejects_bad_params() {
        let mut params = SessionParams::default();
        params.quality = 0;
        let err = StreamSession::start("127.0.0.1:5600", params).unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));
    }
}
