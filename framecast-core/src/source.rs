//! Frame acquisition: the capture device seam and its lifecycle.
//!
//! [`FrameSource`] is the boundary to the physical device driver; the
//! core never talks to hardware directly. [`CaptureService`] owns a
//! source, drives it through the [`CaptureState`] machine with a bounded
//! exponential-backoff restart policy, and writes every acquired frame
//! into the capture-side [`FrameSlot`]. Acquisition runs in its own task
//! so a stalled device can never stall encode, publish, or render.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::error::StreamError;
use crate::session::SessionControls;
use crate::slot::FrameSlot;
use crate::types::{PixelFormat, RawFrame};

// ── FrameSource ──────────────────────────────────────────────────

/// The capture device boundary.
///
/// `acquire_next` blocks up to a device-defined timeout. `Ok(None)`
/// means the device momentarily has nothing, a benign outcome.
/// `Err(_)` means the device is gone and the service will close it and
/// retry `open` under the restart policy.
pub trait FrameSource: Send {
    /// Opens the device. May be called again after `close`.
    fn open(&mut self) -> Result<(), StreamError>;

    /// Blocks up to the device timeout for the next frame.
    fn acquire_next(&mut self) -> Result<Option<RawFrame>, StreamError>;

    /// Releases the device. Must be safe to call in any state.
    fn close(&mut self);
}

// ── CaptureState ─────────────────────────────────────────────────

/// Lifecycle state of a capture source.
///
/// ```text
///  Stopped ──► Starting ──► Running
///     ▲            │           │
///     │            ▼           ▼
///     └─────── Restarting ◄────┘
///                  │
///                  └──► Running    (retry succeeded)
/// ```
///
/// Only `Running` permits frames to flow into the capture-side slot.
/// `Restarting` re-enters itself as consecutive attempts fail; exhausting
/// the retry budget drops back to `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No device activity. Initial / terminal state.
    #[default]
    Stopped,

    /// First open of the device is in progress.
    Starting,

    /// Device is delivering frames.
    Running {
        /// When the source entered the `Running` state.
        since: Instant,
    },

    /// Recovering from an open or read failure.
    Restarting {
        /// Consecutive failed attempts so far (1-based).
        attempt: u32,
    },
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Running { .. } => write!(f, "Running"),
            Self::Restarting { .. } => write!(f, "Restarting"),
        }
    }
}

impl CaptureState {
    /// Returns `true` when frames may flow into the capture slot.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns `true` in the terminal/idle state.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// How long the source has been in `Running`.
    ///
    /// Returns `None` for any other state.
    pub fn running_duration(&self) -> Option<Duration> {
        match self {
            Self::Running { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Starting`.
    ///
    /// Valid from: `Stopped`.
    pub fn begin_start(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Stopped => {
                *self = Self::Starting;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot start: not in Stopped state",
            )),
        }
    }

    /// Transition to `Running`.
    ///
    /// Valid from: `Starting`, `Restarting`.
    pub fn mark_running(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Starting | Self::Restarting { .. } => {
                *self = Self::Running {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot run: not in Starting or Restarting state",
            )),
        }
    }

    /// Transition to `Restarting { attempt }`.
    ///
    /// Valid from: `Starting` (first open failed), `Running` (device
    /// lost mid-stream), `Restarting` (next consecutive failure).
    pub fn begin_restart(&mut self, attempt: u32) -> Result<(), StreamError> {
        match self {
            Self::Starting | Self::Running { .. } | Self::Restarting { .. } => {
                *self = Self::Restarting { attempt };
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot restart: source is stopped",
            )),
        }
    }

    /// Force-reset to `Stopped` regardless of current state.
    ///
    /// Used for external stop requests and exhausted retry budgets.
    pub fn force_stop(&mut self) {
        *self = Self::Stopped;
    }
}

// ── RetryPolicy ──────────────────────────────────────────────────

/// Bounded exponential backoff for restarting a failed device.
///
/// Attempt 1 is immediate; each failure sleeps `initial_backoff × 2ⁿ`
/// capped at `max_backoff`, until `max_attempts` consecutive attempts
/// have failed. Open failures and read failures draw from the same
/// budget: a source must stay `Running` for at least `max_backoff`
/// before its failure count resets.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total open attempts before the source is declared unavailable.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delays.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after the `failures`-th consecutive failure
    /// (1-based).
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_backoff)
    }
}

// ── CaptureService ───────────────────────────────────────────────

/// Drives a [`FrameSource`] and feeds the capture-side slot.
///
/// # Lifetime
///
/// Spawn [`run`](Self::run) on the runtime and keep the
/// [`stop_handle`](Self::stop_handle); flipping it stops the loop after
/// the in-flight iteration completes.
pub struct CaptureService<S: FrameSource> {
    source: S,
    slot: Arc<FrameSlot<RawFrame>>,
    controls: Arc<SessionControls>,
    retry: RetryPolicy,
    running: Arc<AtomicBool>,
    state_tx: broadcast::Sender<CaptureState>,
    preview_tx: watch::Sender<Option<Arc<RawFrame>>>,
}

impl<S: FrameSource> CaptureService<S> {
    /// Creates a service writing into `slot`, with the default retry
    /// policy.
    pub fn new(source: S, slot: Arc<FrameSlot<RawFrame>>, controls: Arc<SessionControls>) -> Self {
        let (state_tx, _) = broadcast::channel(16);
        let (preview_tx, _) = watch::channel(None);
        Self {
            source,
            slot,
            controls,
            retry: RetryPolicy::default(),
            running: Arc::new(AtomicBool::new(true)),
            state_tx,
            preview_tx,
        }
    }

    /// Replaces the restart policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A cloneable handle that stops the service from another task.
    ///
    /// The handle is armed at construction and [`run`](Self::run) never
    /// re-arms it, so a stop requested before the task is first polled
    /// is still honored.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Subscribes to lifecycle transitions.
    ///
    /// Subscribe before spawning [`run`](Self::run) to observe the full
    /// `Starting → … → Running` sequence.
    pub fn state_events(&self) -> broadcast::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    /// Latest acquired frame for the local preview surface.
    ///
    /// Only updated while the `show_live_preview` control is on; an
    /// absent consumer costs nothing.
    pub fn preview_receiver(&self) -> watch::Receiver<Option<Arc<RawFrame>>> {
        self.preview_tx.subscribe()
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True until a stop has been requested or the loop has exited.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs the capture loop until stopped or the source becomes
    /// terminally unavailable.
    pub async fn run(&mut self) -> Result<(), StreamError> {
        let mut state = CaptureState::Stopped;
        // Read failures landing before the source has stayed up for one
        // max-backoff window count as consecutive, so a device that dies
        // after every reopen still exhausts the budget.
        let mut rapid_failures: u32 = 0;

        state.begin_start()?;
        self.publish_state(&state);

        if let Err(e) = self.open_with_retry(&mut state).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        while self.running.load(Ordering::SeqCst) && state.is_running() {
            match self.source.acquire_next() {
                Ok(Some(frame)) => {
                    if self.controls.show_live_preview() {
                        let _ = self.preview_tx.send(Some(Arc::new(frame.clone())));
                    }
                    if self.slot.write(frame) {
                        trace!("unread frame displaced from capture slot");
                    }
                    tokio::task::yield_now().await;
                }
                Ok(None) => {
                    // Device momentarily has nothing; yield and poll again.
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    warn!(error = %e, "capture source failed mid-stream, restarting");
                    self.source.close();
                    let stable = state
                        .running_duration()
                        .is_some_and(|up| up >= self.retry.max_backoff);
                    rapid_failures = if stable { 1 } else { rapid_failures + 1 };
                    if rapid_failures >= self.retry.max_attempts {
                        state.force_stop();
                        self.publish_state(&state);
                        warn!(
                            attempts = rapid_failures,
                            "capture source keeps dying after reopen, giving up"
                        );
                        self.running.store(false, Ordering::SeqCst);
                        return Err(StreamError::SourceUnavailable {
                            attempts: rapid_failures,
                        });
                    }
                    state.begin_restart(rapid_failures)?;
                    self.publish_state(&state);
                    tokio::time::sleep(self.retry.backoff_for(rapid_failures)).await;
                    if let Err(e) = self.open_with_retry(&mut state).await {
                        self.running.store(false, Ordering::SeqCst);
                        return Err(e);
                    }
                }
            }
        }

        self.source.close();
        if !state.is_stopped() {
            state.force_stop();
            self.publish_state(&state);
        }
        self.running.store(false, Ordering::SeqCst);
        info!("capture service stopped");
        Ok(())
    }

    /// Opens the source under the bounded backoff policy.
    ///
    /// Expects `state` to be `Starting` or `Restarting`. On return the
    /// state is `Running`, or `Stopped` when the budget is exhausted or
    /// a stop was requested mid-retry.
    async fn open_with_retry(&mut self, state: &mut CaptureState) -> Result<(), StreamError> {
        // Resume the failure count when already mid-restart.
        let mut failures = match state {
            CaptureState::Restarting { attempt } => *attempt,
            _ => 0,
        };

        loop {
            if !self.running.load(Ordering::SeqCst) {
                state.force_stop();
                self.publish_state(state);
                return Ok(());
            }

            match self.source.open() {
                Ok(()) => {
                    state.mark_running()?;
                    self.publish_state(state);
                    info!("capture source running");
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.retry.max_attempts {
                        state.force_stop();
                        self.publish_state(state);
                        warn!(attempts = failures, error = %e, "capture source unavailable, giving up");
                        return Err(StreamError::SourceUnavailable { attempts: failures });
                    }
                    let delay = self.retry.backoff_for(failures);
                    warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "capture source open failed, backing off"
                    );
                    state.begin_restart(failures)?;
                    self.publish_state(state);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn publish_state(&self, state: &CaptureState) {
        debug!(state = %state, "capture state");
        let _ = self.state_tx.send(state.clone());
    }
}

// ── SyntheticSource ──────────────────────────────────────────────

/// Deterministic moving-gradient source.
///
/// Stands in for a real camera in the publisher binary and in tests:
/// paced like a blocking device, with injectable open failures for
/// lifecycle testing. The pattern shifts every frame so consecutive
/// frames are never identical.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    fail_opens: u32,
    opened: bool,
    frame_counter: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    /// Creates a source producing `width`×`height` RGB frames at
    /// roughly 30 fps.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_millis(33),
            fail_opens: 0,
            opened: false,
            frame_counter: 0,
            last_frame_at: None,
        }
    }

    /// Sets the native frame pacing. `Duration::ZERO` disables pacing
    /// (useful in tests).
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Makes the first `n` calls to `open` fail, for restart tests.
    pub fn with_start_failures(mut self, n: u32) -> Self {
        self.fail_opens = n;
        self
    }

    /// Frames produced since `open`.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    fn render_pattern(&self) -> Vec<u8> {
        let (w, h) = (self.width, self.height);
        let shift = (self.frame_counter as u32) % w.max(1);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                data.push((((x + shift) % w.max(1)) * 255 / w.max(1)) as u8);
                data.push((y * 255 / h.max(1)) as u8);
                data.push((self.frame_counter * 8) as u8);
            }
        }
        data
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), StreamError> {
        if self.fail_opens > 0 {
            self.fail_opens -= 1;
            return Err(StreamError::DeviceOpen("synthetic open failure".into()));
        }
        self.opened = true;
        self.frame_counter = 0;
        self.last_frame_at = None;
        Ok(())
    }

    fn acquire_next(&mut self) -> Result<Option<RawFrame>, StreamError> {
        if !self.opened {
            return Err(StreamError::DeviceRead("source not open".into()));
        }

        // Emulate a blocking device delivering at its native rate.
        if let Some(last) = self.last_frame_at {
            let since = last.elapsed();
            if since < self.frame_interval {
                std::thread::sleep(self.frame_interval - since);
            }
        }
        self.last_frame_at = Some(Instant::now());

        let frame = RawFrame::new(self.width, self.height, PixelFormat::Rgb8, self.render_pattern());
        self.frame_counter += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

// ── Tests ────────────────────────────────────────────────────────
