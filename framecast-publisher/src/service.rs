//! Publisher service core logic.
//!
//! Wires the sending half of the pipeline together: a synthetic
//! source feeds the capture slot, and the publish loop drains it into
//! a UDP transport at the configured tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{error, info};

use framecast_core::publish::PublishService;
use framecast_core::session::{StreamSession, resolve_endpoint};
use framecast_core::slot::FrameSlot;
use framecast_core::source::{CaptureService, SyntheticSource};
use framecast_core::transport::{UdpTransport, VideoTransport};

use crate::config::PublisherConfig;

// ── PublisherService ─────────────────────────────────────────────

/// The top-level publisher process.
///
/// Owns the capture and publish services for one streaming session
/// and shuts both down when stopped.
pub struct PublisherService {
    config: PublisherConfig,
    running: Arc<AtomicBool>,
}

impl PublisherService {
    /// Create a new publisher with the given config.
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Obtain a handle that can be used to stop the publisher from
    /// another task or a signal handler.
    ///
    /// The handle is armed at construction and [`run`](Self::run) never
    /// re-arms it, so a signal arriving before `run` is first polled
    /// still shuts the process down.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the publisher to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True until a stop has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the publisher until stopped.
    ///
    /// 1. Starts a session toward the configured destination (bad
    ///    configuration is rejected here, before anything runs).
    /// 2. Binds the UDP socket and spawns capture + publish loops.
    /// 3. Reports publish counters every 10 seconds.
    /// 4. Shuts down cleanly when `running` becomes `false`.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let session = StreamSession::start(
            &self.config.network.destination,
            self.config.to_session_params(),
        )?;
        let controls = session.controls();

        let bind_addr = resolve_endpoint(&self.config.network.bind)?;
        let socket = UdpSocket::bind(bind_addr).await?;
        let transport = Arc::new(UdpTransport::new(socket, session.endpoint));
        info!(
            local = %transport.local_addr()?,
            destination = %session.endpoint,
            "UDP video transport ready"
        );

        let slot = Arc::new(FrameSlot::new());

        let source = SyntheticSource::new(self.config.capture.width, self.config.capture.height)
            .with_frame_interval(Duration::from_millis(self.config.capture.frame_interval_ms));
        let mut capture = CaptureService::new(source, Arc::clone(&slot), Arc::clone(&controls));
        let capture_stop = capture.stop_handle();

        let mut publisher = PublishService::new(
            slot,
            transport.clone() as Arc<dyn VideoTransport>,
            controls,
            session.params.clone(),
        );
        let publish_stop = publisher.stop_handle();
        let stats_rx = publisher.stats_receiver();

        let capture_task = tokio::spawn(async move {
            if let Err(e) = capture.run().await {
                error!("capture service error: {e}");
            }
        });
        let publish_task = tokio::spawn(async move {
            if let Err(e) = publisher.run().await {
                error!("publish service error: {e}");
            }
        });

        // Periodic operator-facing report.
        let report_stop = Arc::clone(&self.running);
        let report_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            ticker.tick().await; // swallow the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = *stats_rx.borrow();
                        info!(
                            published = stats.packets_published,
                            idle_ticks = stats.idle_ticks,
                            errors = stats.errors,
                            last_payload_bytes = stats.last_payload_bytes,
                            "publisher report"
                        );
                    }
                    _ = Self::wait_for_stop(&report_stop) => break,
                }
            }
        });

        Self::wait_for_stop(&self.running).await;

        info!("shutting down");
        capture_stop.store(false, Ordering::SeqCst);
        publish_stop.store(false, Ordering::SeqCst);
        let _ = capture_task.await;
        let _ = publish_task.await;
        let _ = report_task.await;

        info!(bytes_sent = transport.bytes_sent(), "publisher stopped");
        Ok(())
    }

    /// Async helper: resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
