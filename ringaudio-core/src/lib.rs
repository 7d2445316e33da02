//! # ringaudio-core
//!
//! Latency-sized stereo ring buffer bridging a push producer with a pull-based
//! host audio callback.
//!
//! ## Architecture
//!
//! ```text
//! producer thread ──write()──► RingAudioBuffer ──pull()──► RenderCallback ──► host device
//!   (irregular chunks)          (atomic cursors)            (fixed quantum)     (cpal / manual)
//! ```
//!
//! Writes never block: on overflow the oldest frames are overwritten. Pulls
//! never block: missing frames play as silence. The render callback is
//! zero-alloc and lock-free.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;

// Convenience re-exports for downstream crates
pub use audio::{CpalOutput, ManualHost, ManualOutput, OutputBackend, RenderCallback};
pub use buffering::RingAudioBuffer;
pub use engine::{diagnostics::DiagnosticsSnapshot, AudioEngine, EngineConfig};
pub use error::{Result, RingAudioError};
pub use events::{StreamStatus, StreamStatusEvent};
