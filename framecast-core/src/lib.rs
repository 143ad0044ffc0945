//! # framecast-core
//!
//! Core library for the framecast live-video streaming pipeline.
//!
//! Raw frames flow through a chain of independent loops connected
//! only by single-slot exchanges:
//!
//! ```text
//! FrameSource ──▶ FrameSlot ──▶ PublishService ──▶ VideoTransport
//!  (capture)      (latest)      (encode, fixed tick)     │
//!                                                        ▼
//!  display ◀── RenderService ◀── FrameSlot ◀── ReceiveService
//!              (decode, fixed tick)  (latest)
//! ```
//!
//! Every slot holds at most one value; a fast producer overwrites, a
//! slow consumer only ever sees the freshest frame. No loop blocks on
//! another, and a fault anywhere costs frames, never the pipeline.
//!
//! This crate contains:
//! - **Types**: `RawFrame`, `PixelFormat`, the monotonic clock
//! - **Slot**: `FrameSlot`, the overwrite/take exchange between loops
//! - **Codec**: `FrameCodec` for JPEG encode/decode plus downscaling
//! - **Packet**: `VideoPacket`, the bincode wire model
//! - **Source**: `FrameSource` contract, capture lifecycle and retry
//! - **Transport**: `VideoTransport` with in-process and UDP impls
//! - **Publish / Receive**: the fixed-rate pipeline services
//! - **Session**: control flags and validated session parameters
//! - **Error**: `StreamError`, a typed `thiserror`-based hierarchy

pub mod codec;
pub mod error;
pub mod packet;
pub mod publish;
pub mod receive;
pub mod session;
pub mod slot;
pub mod source;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{DEFAULT_QUALITY, FrameCodec, downscale_to_width};
pub use error::StreamError;
pub use packet::{DEFAULT_SOURCE_ID, MAX_PAYLOAD_BYTES, VideoPacket};
pub use publish::{PublishService, PublishStats};
pub use receive::{
    DEFAULT_RENDER_INTERVAL_MS, DisplayImage, ReceiveService, RenderService, ViewerStats,
};
pub use session::{
    DEFAULT_TOPIC, SessionControls, SessionParams, StreamSession, resolve_endpoint,
};
pub use slot::FrameSlot;
pub use source::{CaptureService, CaptureState, FrameSource, RetryPolicy, SyntheticSource};
pub use transport::{LocalBus, UdpTransport, VideoTransport};
pub use types::{PixelFormat, RawFrame, monotonic_ns};
