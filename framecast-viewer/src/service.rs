//! Viewer service core logic.
//!
//! Wires the receiving half of the pipeline together: UDP packets
//! flow through the receive slot into the render loop, and the
//! current display image is surfaced through logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info};

use framecast_core::codec::FrameCodec;
use framecast_core::receive::{ReceiveService, RenderService};
use framecast_core::session::resolve_endpoint;
use framecast_core::slot::FrameSlot;
use framecast_core::transport::{UdpTransport, VideoTransport};

use crate::config::ViewerConfig;

// ── ViewerService ────────────────────────────────────────────────

/// The top-level viewer process.
///
/// Owns the receive and render services for one listening socket and
/// shuts both down when stopped.
pub struct ViewerService {
    config: ViewerConfig,
    running: Arc<AtomicBool>,
}

impl ViewerService {
    /// Create a new viewer with the given config.
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Obtain a handle that can be used to stop the viewer from
    /// another task or a signal handler.
    ///
    /// The handle is armed at construction and [`run`](Self::run) never
    /// re-arms it, so a signal arriving before `run` is first polled
    /// still shuts the process down.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the viewer to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True until a stop has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the viewer until stopped.
    ///
    /// 1. Binds the UDP listen socket (a bad listen address is
    ///    rejected here, before anything runs).
    /// 2. Spawns the receive bridge and the render loop.
    /// 3. Logs each display update and reports counters every 10
    ///    seconds.
    /// 4. Shuts down cleanly when `running` becomes `false`.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listen = resolve_endpoint(&self.config.network.listen)?;
        // Receive-only transport: the remote side is never addressed.
        let transport = UdpTransport::bind(listen, listen).await?;
        info!(listen = %transport.local_addr()?, "listening for video");

        let packets = transport.subscribe(&self.config.network.topic).await?;

        let slot = Arc::new(FrameSlot::new());
        let mut receiver = ReceiveService::new(packets, Arc::clone(&slot));
        let receive_stop = receiver.stop_handle();

        let mut renderer = RenderService::new(slot, FrameCodec::default())
            .with_interval(Duration::from_millis(self.config.render.interval_ms.max(1)));
        let render_stop = renderer.stop_handle();
        let mut display = renderer.display_receiver();
        let stats_rx = renderer.stats_receiver();

        let receive_task = tokio::spawn(async move {
            if let Err(e) = receiver.run().await {
                error!("receive service error: {e}");
            }
        });
        let render_task = tokio::spawn(async move {
            if let Err(e) = renderer.run().await {
                error!("render service error: {e}");
            }
        });

        // Display surface in headless form: log every new image and
        // report counters periodically.
        let ui_stop = Arc::clone(&self.running);
        let ui_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            ticker.tick().await; // swallow the immediate first tick
            loop {
                tokio::select! {
                    changed = display.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if let Some(image) = display.borrow_and_update().clone() {
                            debug!(
                                width = image.width,
                                height = image.height,
                                timestamp_ns = image.timestamp_ns,
                                "display image updated"
                            );
                        }
                    }
                    _ = ticker.tick() => {
                        let stats = stats_rx.borrow().clone();
                        info!(
                            fps = stats.fps,
                            rendered = stats.frames_rendered,
                            decode_failures = stats.decode_failures,
                            "viewer report"
                        );
                    }
                    _ = Self::wait_for_stop(&ui_stop) => break,
                }
            }
        });

        Self::wait_for_stop(&self.running).await;

        info!("shutting down");
        render_stop.store(false, Ordering::SeqCst);
        receive_stop.store(false, Ordering::SeqCst);
        // The receive bridge may be parked in recv with no deadline;
        // cancel it outright.
        receive_task.abort();
        let _ = receive_task.await;
        let _ = render_task.await;
        let _ = ui_task.await;

        info!("viewer stopped");
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
