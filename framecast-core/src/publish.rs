//! Publish-side streaming service.
//!
//! Orchestrates the sending half of the pipeline:
//!
//! 1. Take the freshest frame from the capture [`FrameSlot`].
//! 2. Downscale to the configured resolution cap.
//! 3. Encode to JPEG via [`FrameCodec`].
//! 4. Wrap into a [`VideoPacket`] and hand to the [`VideoTransport`].
//!
//! The loop ticks at a fixed period regardless of how fast the source
//! produces. Frames arriving between ticks overwrite each other in the
//! slot, so each tick publishes at most one packet, always carrying
//! the newest frame available at that instant.
//!
//! The service runs in a Tokio task and stops when its `running` flag
//! is cleared; an in-flight tick always finishes its publish first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{info, trace, warn};

use crate::codec::{FrameCodec, downscale_to_width};
use crate::error::StreamError;
use crate::packet::{MAX_PAYLOAD_BYTES, VideoPacket};
use crate::session::{SessionControls, SessionParams};
use crate::slot::FrameSlot;
use crate::transport::VideoTransport;
use crate::types::RawFrame;

// ── PublishStats ─────────────────────────────────────────────────

/// Counters updated after every tick, observable through a watch
/// channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Packets successfully handed to the transport.
    pub packets_published: u64,
    /// Ticks that found the capture slot empty.
    pub idle_ticks: u64,
    /// Frames taken and dropped while streaming was inactive.
    pub frames_discarded: u64,
    /// Encode or publish failures skipped over.
    pub errors: u64,
    /// Payload size of the most recent published packet.
    pub last_payload_bytes: usize,
}

// ── PublishService ───────────────────────────────────────────────

/// Fixed-period encode-and-publish loop.
///
/// # Lifetime
///
/// Call [`run`](Self::run) to start the tick loop. It runs until
/// [`stop`](Self::stop) is called (or the stop handle is cleared from
/// another task).
pub struct PublishService {
    slot: Arc<FrameSlot<RawFrame>>,
    transport: Arc<dyn VideoTransport>,
    controls: Arc<SessionControls>,
    codec: FrameCodec,
    params: SessionParams,
    running: Arc<AtomicBool>,
    stats_tx: watch::Sender<PublishStats>,
}

impl PublishService {
    /// Create a service reading from `slot` and publishing on
    /// `transport`, with the codec derived from `params`.
    pub fn new(
        slot: Arc<FrameSlot<RawFrame>>,
        transport: Arc<dyn VideoTransport>,
        controls: Arc<SessionControls>,
        params: SessionParams,
    ) -> Self {
        let codec = FrameCodec::new(MAX_PAYLOAD_BYTES).with_quality(params.quality);
        Self {
            slot,
            transport,
            controls,
            codec,
            params,
            running: Arc::new(AtomicBool::new(true)),
            stats_tx: watch::channel(PublishStats::default()).0,
        }
    }

    /// Replace the codec (e.g. to tighten the payload bound).
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// A cloneable handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Watch the per-tick counters.
    pub fn stats_receiver(&self) -> watch::Receiver<PublishStats> {
        self.stats_tx.subscribe()
    }

    /// Signal the service to stop after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True until a stop has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the tick loop.
    ///
    /// Intended to be spawned on the Tokio runtime:
    ///
    /// ```no_run
    /// # use framecast_core::publish::PublishService;
    /// # async fn example(mut svc: PublishService) {
    /// let handle = svc.stop_handle();
    /// tokio::spawn(async move { svc.run().await });
    /// // … later …
    /// handle.store(false, std::sync::atomic::Ordering::SeqCst);
    /// # }
    /// ```
    pub async fn run(&mut self) -> Result<(), StreamError> {
        let interval = self.params.publish_interval();
        let mut stats = PublishStats::default();

        info!(
            interval_ms = interval.as_millis() as u64,
            quality = self.codec.quality(),
            max_width = self.params.max_width,
            topic = %self.params.topic,
            "publish loop started"
        );

        while self.running.load(Ordering::SeqCst) {
            let loop_start = Instant::now();

            // 1. Freshest frame, if any arrived since the last tick.
            let Some(frame) = self.slot.take_if_present() else {
                stats.idle_ticks += 1;
                let _ = self.stats_tx.send(stats);
                Self::pace(loop_start, interval).await;
                continue;
            };

            // 2. Inactive sessions keep draining the slot so that a
            //    later reactivation starts from a fresh frame.
            if !self.controls.streaming_active() {
                stats.frames_discarded += 1;
                let _ = self.stats_tx.send(stats);
                Self::pace(loop_start, interval).await;
                continue;
            }

            // 3. Cap, encode, packetize, publish. Failures drop this
            //    frame only; the next tick starts clean.
            match self.encode_packet(&frame) {
                Ok(packet) => match self.transport.publish(&self.params.topic, &packet).await {
                    Ok(()) => {
                        stats.packets_published += 1;
                        stats.last_payload_bytes = packet.data.len();
                        trace!(
                            bytes = packet.data.len(),
                            timestamp_ns = packet.timestamp_ns,
                            "packet published"
                        );
                    }
                    Err(e) => {
                        stats.errors += 1;
                        warn!(error = %e, "publish failed, frame dropped");
                    }
                },
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        error = %e,
                        width = frame.width,
                        height = frame.height,
                        "encode failed, frame dropped"
                    );
                }
            }

            let _ = self.stats_tx.send(stats);

            // 4. Tick pacing.
            Self::pace(loop_start, interval).await;
        }

        info!(published = stats.packets_published, "publish loop stopped");
        Ok(())
    }

    /// Downscale, encode and wrap one frame. The packet carries the
    /// frame's capture timestamp, not the encode time.
    fn encode_packet(&self, frame: &RawFrame) -> Result<VideoPacket, StreamError> {
        let capped = downscale_to_width(frame, self.params.max_width)?;
        let payload = self.codec.encode(&capped)?;
        Ok(VideoPacket::new(
            self.params.source_id,
            payload,
            frame.timestamp_ns,
        ))
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
