//! Viewer-side receive and render services.
//!
//! The receiving half mirrors the publish pipeline in reverse:
//!
//! 1. [`ReceiveService`] drains the transport subscription and writes
//!    each packet into the receive [`FrameSlot`], nothing else, so the
//!    delivery task is never blocked by decode cost.
//! 2. [`RenderService`] ticks at the display rate, takes the freshest
//!    packet, decodes it, and publishes a [`DisplayImage`] through a
//!    `tokio::sync::watch` channel for the display surface to draw.
//!
//! A corrupt payload costs exactly one frame: the decode failure is
//! counted and the next tick continues with whatever has arrived.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::codec::FrameCodec;
use crate::error::StreamError;
use crate::packet::VideoPacket;
use crate::slot::FrameSlot;

// ── Constants ────────────────────────────────────────────────────

/// Default render tick period (about 30 updates per second).
pub const DEFAULT_RENDER_INTERVAL_MS: u64 = 33;

// ── DisplayImage ─────────────────────────────────────────────────

/// A decoded frame ready for the display surface.
///
/// Pixels are packed RGB. `Bytes` keeps clones cheap as the image
/// fans out through watch channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayImage {
    pub width: u32,
    pub height: u32,
    /// Packed RGB pixel data, `width * height * 3` bytes.
    pub pixels: Bytes,
    /// Capture timestamp carried through from the publisher.
    pub timestamp_ns: u64,
}

// ── ViewerStats ──────────────────────────────────────────────────

/// Render statistics exposed to the UI.
#[derive(Debug, Clone, Default)]
pub struct ViewerStats {
    /// Current smoothed frames per second.
    pub fps: f64,
    /// Total frames decoded and displayed since start.
    pub frames_rendered: u64,
    /// Payloads that failed to decode and were skipped.
    pub decode_failures: u64,
    /// Total payload bytes taken from the slot (compressed).
    pub total_bytes: u64,
    /// Last displayed frame width.
    pub width: u32,
    /// Last displayed frame height.
    pub height: u32,
}

// ── ReceiveService ───────────────────────────────────────────────

/// Transport-to-slot bridge.
///
/// Consumes a subscription queue and performs a single slot write per
/// packet. No decoding happens here; the write is bounded and small
/// no matter how expensive the payload is to decode, and a packet the
/// renderer never got to is simply overwritten by the next one.
pub struct ReceiveService {
    packets: mpsc::Receiver<VideoPacket>,
    slot: Arc<FrameSlot<VideoPacket>>,
    running: Arc<AtomicBool>,
    packets_received: Arc<AtomicU64>,
    packets_displaced: Arc<AtomicU64>,
}

impl ReceiveService {
    /// Bridge `packets` (from [`VideoTransport::subscribe`]) into `slot`.
    ///
    /// [`VideoTransport::subscribe`]: crate::transport::VideoTransport::subscribe
    pub fn new(packets: mpsc::Receiver<VideoPacket>, slot: Arc<FrameSlot<VideoPacket>>) -> Self {
        Self {
            packets,
            slot,
            running: Arc::new(AtomicBool::new(true)),
            packets_received: Arc::new(AtomicU64::new(0)),
            packets_displaced: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A cloneable stop handle.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Packets written to the slot since start.
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Packets overwritten in the slot before the renderer took them.
    pub fn packets_displaced(&self) -> u64 {
        self.packets_displaced.load(Ordering::Relaxed)
    }

    /// Run the bridge loop.
    ///
    /// Ends when the subscription closes (transport dropped) or the
    /// stop handle is cleared; a stop request is observed once the
    /// next packet arrives.
    pub async fn run(&mut self) -> Result<(), StreamError> {
        while self.running.load(Ordering::SeqCst) {
            let Some(packet) = self.packets.recv().await else {
                debug!("subscription closed, receive loop ending");
                break;
            };

            let displaced = self.slot.write(packet);
            self.packets_received.fetch_add(1, Ordering::Relaxed);
            if displaced {
                self.packets_displaced.fetch_add(1, Ordering::Relaxed);
                trace!("unrendered packet displaced");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ── RenderService ────────────────────────────────────────────────

/// Fixed-rate take-and-decode loop driving the display.
///
/// Each tick takes the freshest packet from the receive slot. An
/// empty slot leaves the previously displayed image untouched. The
/// decoded image is published via a watch channel; the display layer
/// reads it at its own pace without blocking this loop.
pub struct RenderService {
    slot: Arc<FrameSlot<VideoPacket>>,
    codec: FrameCodec,
    interval: Duration,
    running: Arc<AtomicBool>,
    /// Sender half of the display watch channel.
    display_tx: watch::Sender<Option<DisplayImage>>,
    /// Receiver half, clone this to get images in the display layer.
    display_rx: watch::Receiver<Option<DisplayImage>>,
    /// Stats channel.
    stats_tx: watch::Sender<ViewerStats>,
    stats_rx: watch::Receiver<ViewerStats>,
}

impl RenderService {
    /// Create a renderer reading from `slot`, decoding with `codec`.
    pub fn new(slot: Arc<FrameSlot<VideoPacket>>, codec: FrameCodec) -> Self {
        let (display_tx, display_rx) = watch::channel(None);
        let (stats_tx, stats_rx) = watch::channel(ViewerStats::default());
        Self {
            slot,
            codec,
            interval: Duration::from_millis(DEFAULT_RENDER_INTERVAL_MS),
            running: Arc::new(AtomicBool::new(true)),
            display_tx,
            display_rx,
            stats_tx,
            stats_rx,
        }
    }

    /// Override the render tick period.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Obtain a `watch::Receiver` that yields the latest decoded
    /// image; `None` until the first frame arrives.
    pub fn display_receiver(&self) -> watch::Receiver<Option<DisplayImage>> {
        self.display_rx.clone()
    }

    /// Obtain a `watch::Receiver` for render statistics.
    pub fn stats_receiver(&self) -> watch::Receiver<ViewerStats> {
        self.stats_rx.clone()
    }

    /// A cloneable stop handle.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the renderer to stop after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True until a stop has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the render loop until stopped.
    pub async fn run(&mut self) -> Result<(), StreamError> {
        let mut fps_samples: Vec<Duration> = Vec::with_capacity(120);
        let mut last_frame_time = Instant::now();
        let mut stats = ViewerStats::default();

        info!(
            interval_ms = self.interval.as_millis() as u64,
            "render loop started"
        );

        while self.running.load(Ordering::SeqCst) {
            let loop_start = Instant::now();

            // Empty slot: the display keeps the previous image.
            let Some(packet) = self.slot.take_if_present() else {
                Self::pace(loop_start, self.interval).await;
                continue;
            };

            stats.total_bytes += packet.data.len() as u64;

            let frame = match self.codec.decode(&packet.data) {
                Ok(f) => f,
                Err(e) => {
                    stats.decode_failures += 1;
                    let _ = self.stats_tx.send(stats.clone());
                    warn!(error = %e, source = packet.source, "corrupt payload skipped");
                    Self::pace(loop_start, self.interval).await;
                    continue;
                }
            };

            // FPS tracking over the last 60 displayed frames.
            let now = Instant::now();
            fps_samples.push(now.duration_since(last_frame_time));
            last_frame_time = now;
            if fps_samples.len() > 60 {
                fps_samples.remove(0);
            }
            let avg_secs: f64 =
                fps_samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / fps_samples.len() as f64;
            stats.fps = if avg_secs > 0.0 { 1.0 / avg_secs } else { 0.0 };

            stats.frames_rendered += 1;
            stats.width = frame.width;
            stats.height = frame.height;

            let image = DisplayImage {
                width: frame.width,
                height: frame.height,
                pixels: Bytes::from(frame.data),
                timestamp_ns: packet.timestamp_ns,
            };

            let _ = self.display_tx.send(Some(image));
            let _ = self.stats_tx.send(stats.clone());

            Self::pace(loop_start, self.interval).await;
        }

        info!(rendered = stats.frames_rendered, "render loop stopped");
        Ok(())
    }

    /// Sleep for the remainder of the tick interval.
    async fn pace(loop_start: Instant, interval: Duration) {
        let elapsed = loop_start.elapsed();
        if elapsed < interval {
            tokio::time::sleep(interval - elapsed).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LocalBus, VideoTransport};
    use crate::types::{PixelFormat, RawFrame};

    fn encoded_packet(source: u32, fill: u8, timestamp_ns: u64) -> VideoPacket {
        let codec = FrameCodec::default();
        let frame = RawFrame::new(32, 24, PixelFormat::Rgb8, vec![fill; 32 * 24 * 3]);
        let payload = codec.encode(&frame).unwrap();
        VideoPacket::new(source, payload, timestamp_ns)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within deadline");
    }

    #[tokio::test]
    async fn receive_service_writes_without_decoding() {
        let bus = Arc::new(LocalBus::new());
        let slot = Arc::new(FrameSlot::new());
        let rx = bus.subscribe("video").await.unwrap();

        let mut svc = ReceiveService::new(rx, Arc::clone(&slot));
        let received = Arc::clone(&svc.packets_received);
        let task = tokio::spawn(async move { svc.run().await });

        // Payloads are opaque here; garbage must pass through untouched.
        bus.publish("video", &VideoPacket::new(1, vec![0xDE, 0xAD], 100))
            .await
            .unwrap();
        bus.publish("video", &VideoPacket::new(2, vec![0xBE, 0xEF], 200))
            .await
            .unwrap();

        wait_until(|| received.load(Ordering::Relaxed) == 2).await;

        let latest = slot.take_if_present().unwrap();
        assert_eq!(latest.source, 2);
        assert_eq!(latest.data, vec![0xBE, 0xEF]);

        // Dropping the bus closes the subscription and ends the loop.
        drop(bus);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn delivery_order_wins_over_timestamps() {
        let bus = Arc::new(LocalBus::new());
        let slot = Arc::new(FrameSlot::new());
        let rx = bus.subscribe("video").await.unwrap();

        let mut svc = ReceiveService::new(rx, Arc::clone(&slot));
        let received = Arc::clone(&svc.packets_received);
        let task = tokio::spawn(async move { svc.run().await });

        // The second arrival carries an older timestamp; it still wins.
        bus.publish("video", &VideoPacket::new(0, vec![1], 2_000))
            .await
            .unwrap();
        bus.publish("video", &VideoPacket::new(0, vec![2], 1_000))
            .await
            .unwrap();

        wait_until(|| received.load(Ordering::Relaxed) == 2).await;

        let latest = slot.take_if_present().unwrap();
        assert_eq!(latest.timestamp_ns, 1_000);
        assert_eq!(latest.data, vec![2]);

        drop(bus);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn render_service_displays_decoded_frame() {
        let slot = Arc::new(FrameSlot::new());
        slot.write(encoded_packet(0, 0x80, 42));

        let mut svc = RenderService::new(Arc::clone(&slot), FrameCodec::default())
            .with_interval(Duration::from_millis(5));
        let mut display = svc.display_receiver();
        let handle = svc.stop_handle();
        let task = tokio::spawn(async move { svc.run().await });

        display.changed().await.unwrap();
        let image = display.borrow_and_update().clone().unwrap();
        assert_eq!(image.width, 32);
        assert_eq!(image.height, 24);
        assert_eq!(image.pixels.len(), 32 * 24 * 3);
        assert_eq!(image.timestamp_ns, 42);

        handle.store(false, Ordering::SeqCst);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn corrupt_payload_skipped_and_rendering_continues() {
        let slot = Arc::new(FrameSlot::new());
        slot.write(VideoPacket::new(0, vec![0xFF; 100], 1));

        let mut svc = RenderService::new(Arc::clone(&slot), FrameCodec::default())
            .with_interval(Duration::from_millis(5));
        let mut display = svc.display_receiver();
        let mut stats = svc.stats_receiver();
        let handle = svc.stop_handle();
        let task = tokio::spawn(async move { svc.run().await });

        // The garbage payload is dropped without touching the display.
        stats.changed().await.unwrap();
        assert_eq!(stats.borrow_and_update().decode_failures, 1);
        assert!(display.borrow_and_update().is_none());

        // The next valid packet renders normally.
        slot.write(encoded_packet(0, 0x40, 7));
        display.changed().await.unwrap();
        let image = display.borrow_and_update().clone().unwrap();
        assert_eq!(image.timestamp_ns, 7);

        let snapshot = stats.borrow_and_update().clone();
        assert_eq!(snapshot.frames_rendered, 1);
        assert_eq!(snapshot.decode_failures, 1);

        handle.store(false, Ordering::SeqCst);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn empty_slot_leaves_display_unchanged() {
        let slot = Arc::new(FrameSlot::new());

        let mut svc = RenderService::new(Arc::clone(&slot), FrameCodec::default())
            .with_interval(Duration::from_millis(5));
        let mut display = svc.display_receiver();
        let handle = svc.stop_handle();
        let task = tokio::spawn(async move { svc.run().await });

        // Several idle ticks: no display update at all.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!display.has_changed().unwrap());
        assert!(display.borrow_and_update().is_none());

        // One frame, then idle again: the image stays put.
        slot.write(encoded_packet(0, 0x20, 9));
        display.changed().await.unwrap();
        let first = display.borrow_and_update().clone().unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!display.has_changed().unwrap());
        assert_eq!(display.borrow_and_update().clone().unwrap(), first);

        handle.store(false, Ordering::SeqCst);
        task.await.unwrap().unwrap();
    }
}
