//! Lock-free stereo ring bridging a push producer and a pull audio callback.
//!
//! The producer writes interleaved `f32` frames whenever it has them; the host
//! callback drains a fixed quantum per invocation. Writes never wait for space
//! (the oldest frames are overwritten) and pulls never wait for data (missing
//! frames stay silent).

pub mod ring;
pub mod sizing;

pub use ring::{Cursors, RingAudioBuffer, CHANNELS};
pub use sizing::{capacity_for_latency, latency_frames, DEFAULT_CALLBACK_OVERHEAD_MS};
