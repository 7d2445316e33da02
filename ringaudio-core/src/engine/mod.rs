//! `AudioEngine` — one audio stream session.
//!
//! ## Lifecycle
//!
//! ```text
//! AudioEngine::init()   → host negotiated, ring sized, callback installed   (Initialized)
//!     └─► start()       → callback drains the ring                          (Running)
//!         └─► stop()    → callback renders silence, ring keeps filling      (Initialized)
//!     └─► free()        → callback removed, cursors zeroed                  (Freed)
//! ```
//!
//! Calling a transition in the wrong state returns an error rather than
//! panicking. Nothing is valid after `free()`: it waits for producer calls and
//! render callbacks already in progress before zeroing the cursors.
//!
//! ## Threading
//!
//! `AudioEngine` is `Send + Sync`. Wrap it in `Arc<AudioEngine>` to share it
//! between the producer thread and control code. The host callback only sees
//! the ring and an activity gate, never the engine's locks.

pub mod diagnostics;
pub(crate) mod gate;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::{CpalOutput, OutputBackend, RenderCallback},
    buffering::{RingAudioBuffer, DEFAULT_CALLBACK_OVERHEAD_MS},
    error::{RingAudioError, Result},
    events::{StreamStatus, StreamStatusEvent},
};

use diagnostics::{DiagnosticsSnapshot, StreamDiagnostics};
use gate::ActivityGate;

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Configuration for `AudioEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    /// Target output latency (ms). Default: 64.
    pub latency_ms: i32,
    /// Scheduling overhead subtracted from `latency_ms` before sizing the
    /// ring (ms). Default: 32.
    pub callback_overhead_ms: i32,
    /// Start in nonblocking mode (`enough_space` always `true`). Default: false.
    pub nonblocking: bool,
    /// Output device name. `None` uses the system default.
    pub preferred_output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latency_ms: 64,
            callback_overhead_ms: DEFAULT_CALLBACK_OVERHEAD_MS,
            nonblocking: false,
            preferred_output_device: None,
        }
    }
}

impl EngineConfig {
    /// Clamp negative latencies to zero and drop blank device names.
    pub fn normalize(&mut self) {
        self.latency_ms = self.latency_ms.max(0);
        self.callback_overhead_ms = self.callback_overhead_ms.max(0);
        if self
            .preferred_output_device
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            self.preferred_output_device = None;
        }
    }
}

/// The stream session handle.
pub struct AudioEngine {
    config: EngineConfig,
    ring: Arc<RingAudioBuffer>,
    backend: Mutex<Box<dyn OutputBackend>>,
    /// Open while the render callback drains the ring.
    attached: Arc<ActivityGate>,
    /// Open until `free()`; producer calls hold it while touching the ring.
    producer: ActivityGate,
    status: Mutex<StreamStatus>,
    status_tx: broadcast::Sender<StreamStatusEvent>,
    diagnostics: Arc<StreamDiagnostics>,
}

impl AudioEngine {
    /// Open the preferred (or default) output device via cpal and initialise a
    /// stream on it.
    ///
    /// # Errors
    /// Any device error from [`CpalOutput::open_with_preference`]; the caller
    /// must not retry on this instance.
    pub fn open_default(config: EngineConfig) -> Result<Self> {
        let backend = CpalOutput::open_with_preference(config.preferred_output_device.as_deref())?;
        info!(device = backend.device_name(), "output device ready");
        Self::init(config, backend)
    }

    /// Size the ring for the backend's sample rate and install the render
    /// callback. The stream starts stopped.
    ///
    /// # Errors
    /// - `RingAudioError::Config` if the backend reports a zero sample rate or
    ///   a mono layout.
    /// - Whatever the backend returns from `connect`.
    pub fn init<B: OutputBackend + 'static>(mut config: EngineConfig, mut backend: B) -> Result<Self> {
        config.normalize();

        let sample_rate = backend.sample_rate();
        if sample_rate == 0 {
            return Err(RingAudioError::Config(
                "host reported a zero sample rate".into(),
            ));
        }
        let channels = backend.channels();
        if channels < 2 {
            return Err(RingAudioError::UnsupportedChannelLayout { channels });
        }

        let ring = Arc::new(RingAudioBuffer::for_latency(
            config.latency_ms,
            sample_rate,
            config.callback_overhead_ms,
        ));
        ring.set_nonblocking(config.nonblocking);

        let attached = Arc::new(ActivityGate::new(false));
        let diagnostics = Arc::new(StreamDiagnostics::default());
        backend.connect(RenderCallback::new(
            Arc::clone(&ring),
            Arc::clone(&attached),
            Arc::clone(&diagnostics),
        ))?;

        info!(
            sample_rate,
            channels,
            latency_ms = config.latency_ms,
            capacity = ring.capacity(),
            "audio stream initialised"
        );

        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let engine = Self {
            config,
            ring,
            backend: Mutex::new(Box::new(backend)),
            attached,
            producer: ActivityGate::new(true),
            status: Mutex::new(StreamStatus::Uninitialized),
            status_tx,
            diagnostics,
        };
        engine.set_status(StreamStatus::Initialized, None);
        Ok(engine)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Let the render callback drain the ring.
    ///
    /// # Errors
    /// `AlreadyRunning` if running, `Freed` after `free()`.
    pub fn start(&self) -> Result<()> {
        let mut status = self.status.lock();
        match *status {
            StreamStatus::Running => return Err(RingAudioError::AlreadyRunning),
            StreamStatus::Freed => return Err(RingAudioError::Freed),
            _ => {}
        }
        self.attached.set_open(true);
        *status = StreamStatus::Running;
        drop(status);

        self.emit(StreamStatus::Running, None);
        info!("stream started");
        Ok(())
    }

    /// Detach the render callback without touching buffered frames.
    ///
    /// # Errors
    /// `NotRunning` if stopped, `Freed` after `free()`.
    pub fn stop(&self) -> Result<()> {
        let mut status = self.status.lock();
        match *status {
            StreamStatus::Running => {}
            StreamStatus::Freed => return Err(RingAudioError::Freed),
            _ => return Err(RingAudioError::NotRunning),
        }
        self.attached.set_open(false);
        *status = StreamStatus::Initialized;
        drop(status);

        self.emit(StreamStatus::Initialized, None);
        info!(buffered = self.ring.len(), "stream stopped");
        Ok(())
    }

    /// Remove the render callback from the host, zero the ring cursors and the
    /// last-write heuristic. Terminal.
    ///
    /// Blocks until a `write` racing this call has returned and the render
    /// callback has left the ring, so nothing touches the cursors after they
    /// are zeroed.
    ///
    /// # Errors
    /// `Freed` if already freed.
    pub fn free(&self) -> Result<()> {
        let mut status = self.status.lock();
        if *status == StreamStatus::Freed {
            return Err(RingAudioError::Freed);
        }
        self.producer.close_and_wait();
        self.attached.close_and_wait();
        self.backend.lock().disconnect();
        self.ring.clear();
        *status = StreamStatus::Freed;
        drop(status);

        self.emit(StreamStatus::Freed, None);
        info!("stream freed");
        Ok(())
    }

    // ── Producer ─────────────────────────────────────────────────────────────

    /// Append interleaved stereo `f32` frames. Never blocks; on overflow the
    /// oldest buffered frames are overwritten. Returns frames accepted.
    ///
    /// # Errors
    /// `Freed` after `free()`.
    pub fn write(&self, samples: &[f32]) -> Result<usize> {
        let _guard = self.producer.enter().ok_or(RingAudioError::Freed)?;
        let frames = self.ring.write(samples);
        self.diagnostics.record_write(frames);
        Ok(frames)
    }

    /// Free space in frames.
    pub fn write_available(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.ring.write_available())
    }

    /// Advisory backpressure probe; see [`RingAudioBuffer::enough_space`].
    pub fn enough_space(&self) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.ring.enough_space())
    }

    /// Toggle nonblocking mode (`enough_space` always `true`).
    ///
    /// # Errors
    /// `Freed` after `free()`.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.ensure_live()?;
        self.ring.set_nonblocking(nonblocking);
        Ok(())
    }

    pub fn is_nonblocking(&self) -> bool {
        self.ring.is_nonblocking()
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Sample rate negotiated with the host (Hz).
    pub fn sample_rate(&self) -> u32 {
        self.ring.sample_rate()
    }

    /// Nominal ring capacity in frames.
    pub fn buffer_size(&self) -> usize {
        self.ring.capacity()
    }

    /// Whether the callback is currently draining the ring.
    pub fn is_running(&self) -> bool {
        self.attached.is_open()
    }

    /// Current stream status (snapshot).
    pub fn status(&self) -> StreamStatus {
        *self.status.lock()
    }

    /// Effective (normalised) configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared ring, for producers that want to bypass the engine's state
    /// checks. Must respect the single-producer rule.
    pub fn ring(&self) -> Arc<RingAudioBuffer> {
        Arc::clone(&self.ring)
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StreamStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of stream counters.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot(self.ring.discarded_frames())
    }

    /// Zero the stream counters, including the ring's discard count. Buffered
    /// frames and cursors are untouched.
    pub fn reset_diagnostics(&self) {
        self.diagnostics.reset();
        self.ring.reset_discarded();
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn ensure_live(&self) -> Result<()> {
        if self.producer.is_open() {
            Ok(())
        } else {
            Err(RingAudioError::Freed)
        }
    }

    fn set_status(&self, new_status: StreamStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        self.emit(new_status, detail);
    }

    fn emit(&self, status: StreamStatus, detail: Option<String>) {
        let _ = self.status_tx.send(StreamStatusEvent { status, detail });
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.producer.is_open() {
            self.attached.set_open(false);
            self.backend.lock().disconnect();
        }
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("config", &self.config)
            .field("ring", &self.ring)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ManualHost, ManualOutput};
    use tokio::sync::broadcast::error::TryRecvError;

    fn interleaved(frames: std::ops::Range<usize>) -> Vec<f32> {
        frames.flat_map(|n| [n as f32, n as f32 + 0.5]).collect()
    }

    fn manual_engine(latency_ms: i32, quantum: usize) -> (AudioEngine, ManualHost) {
        let (backend, host) = ManualOutput::new(48_000, quantum);
        let config = EngineConfig {
            latency_ms,
            ..EngineConfig::default()
        };
        let engine = AudioEngine::init(config, backend).expect("init manual engine");
        (engine, host)
    }

    struct MonoOutput;

    impl OutputBackend for MonoOutput {
        fn sample_rate(&self) -> u32 {
            44_100
        }

        fn channels(&self) -> u16 {
            1
        }

        fn connect(&mut self, _callback: RenderCallback) -> Result<()> {
            Ok(())
        }

        fn disconnect(&mut self) {}
    }

    #[test]
    fn init_sizes_ring_from_latency_and_installs_callback() {
        let (engine, host) = manual_engine(64, 256);
        // (64 - 32) ms at 48 kHz = 1536 -> 2048 -> 4096
        assert_eq!(engine.buffer_size(), 4096);
        assert_eq!(engine.sample_rate(), 48_000);
        assert_eq!(engine.status(), StreamStatus::Initialized);
        assert!(!engine.is_running());
        assert!(host.is_connected());
        assert!(engine.enough_space().unwrap());
    }

    #[test]
    fn init_rejects_mono_and_zero_rate_hosts() {
        let err = AudioEngine::init(EngineConfig::default(), MonoOutput).unwrap_err();
        assert!(matches!(err, RingAudioError::UnsupportedChannelLayout { channels: 1 }));

        let (backend, _host) = ManualOutput::new(0, 128);
        let err = AudioEngine::init(EngineConfig::default(), backend).unwrap_err();
        assert!(matches!(err, RingAudioError::Config(_)));
    }

    #[test]
    fn negative_latency_is_clamped_before_sizing() {
        let (engine, _host) = manual_engine(-500, 128);
        assert_eq!(engine.config().latency_ms, 0);
        assert_eq!(engine.buffer_size(), 2);
    }

    #[test]
    fn stopped_stream_renders_silence_and_keeps_frames() {
        let (engine, mut host) = manual_engine(64, 128);
        engine.write(&interleaved(0..300)).unwrap();

        assert_eq!(host.tick(), Some(0));
        assert!(host.left().iter().all(|s| *s == 0.0));
        assert_eq!(engine.ring().len(), 300);

        engine.start().unwrap();
        assert_eq!(host.tick(), Some(128));
        assert_eq!(host.left()[5], 5.0);
        assert_eq!(host.right()[5], 5.5);

        engine.stop().unwrap();
        engine.write(&interleaved(300..400)).unwrap();
        assert_eq!(host.tick(), Some(0));
        assert_eq!(engine.ring().len(), 272);

        let snap = engine.diagnostics_snapshot();
        assert_eq!(snap.callbacks, 3);
        assert_eq!(snap.detached_callbacks, 2);
        assert_eq!(snap.frames_pulled, 128);
        assert_eq!(snap.frames_written, 400);
        assert_eq!(snap.writes, 2);
    }

    #[test]
    fn underrun_is_counted_and_silent() {
        let (engine, mut host) = manual_engine(64, 256);
        engine.start().unwrap();
        engine.write(&interleaved(0..100)).unwrap();

        assert_eq!(host.tick(), Some(100));
        assert_eq!(host.left()[99], 99.0);
        assert!(host.left()[100..].iter().all(|s| *s == 0.0));
        assert_eq!(engine.diagnostics_snapshot().underrun_frames, 156);
    }

    #[test]
    fn lifecycle_transitions_are_checked() {
        let (engine, _host) = manual_engine(64, 64);
        assert!(matches!(engine.stop(), Err(RingAudioError::NotRunning)));
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(RingAudioError::AlreadyRunning)));
        engine.stop().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
    }

    #[test]
    fn free_detaches_zeroes_and_is_terminal() {
        let (engine, mut host) = manual_engine(64, 64);
        engine.start().unwrap();
        engine.write(&interleaved(0..500)).unwrap();
        engine.free().unwrap();

        assert_eq!(engine.status(), StreamStatus::Freed);
        assert!(!host.is_connected());
        assert_eq!(host.tick(), None);
        assert_eq!(engine.ring().len(), 0);
        assert_eq!(engine.ring().last_write_size(), 0);

        assert!(matches!(engine.write(&[0.0, 0.0]), Err(RingAudioError::Freed)));
        assert!(matches!(engine.write_available(), Err(RingAudioError::Freed)));
        assert!(matches!(engine.enough_space(), Err(RingAudioError::Freed)));
        assert!(matches!(engine.start(), Err(RingAudioError::Freed)));
        assert!(matches!(engine.stop(), Err(RingAudioError::Freed)));
        assert!(matches!(engine.free(), Err(RingAudioError::Freed)));
    }

    #[test]
    fn status_changes_are_broadcast() {
        let (engine, _host) = manual_engine(64, 64);
        let mut rx = engine.subscribe_status();

        engine.start().unwrap();
        engine.stop().unwrap();
        engine.free().unwrap();

        let seen: Vec<StreamStatus> = std::iter::from_fn(|| match rx.try_recv() {
            Ok(ev) => Some(ev.status),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
            Err(TryRecvError::Lagged(_)) => panic!("status channel lagged"),
        })
        .collect();
        assert_eq!(
            seen,
            vec![StreamStatus::Running, StreamStatus::Initialized, StreamStatus::Freed]
        );
    }

    #[test]
    fn nonblocking_config_short_circuits_backpressure() {
        let (backend, _host) = ManualOutput::new(48_000, 64);
        let config = EngineConfig {
            nonblocking: true,
            ..EngineConfig::default()
        };
        let engine = AudioEngine::init(config, backend).unwrap();
        engine.write(&interleaved(0..4096)).unwrap();
        assert_eq!(engine.write_available().unwrap(), 0);
        assert!(engine.enough_space().unwrap());

        engine.set_nonblocking(false).unwrap();
        assert!(!engine.enough_space().unwrap());

        engine.free().unwrap();
        assert!(matches!(engine.set_nonblocking(true), Err(RingAudioError::Freed)));
        assert!(!engine.is_nonblocking());
    }

    #[test]
    fn reset_diagnostics_zeroes_counters_but_keeps_frames() {
        let (engine, mut host) = manual_engine(64, 128);
        engine.start().unwrap();
        // 4096-frame ring: 5000 frames discard 904.
        engine.write(&interleaved(0..5000)).unwrap();
        host.tick();
        assert_eq!(engine.diagnostics_snapshot().frames_discarded, 904);

        engine.reset_diagnostics();
        let snap = engine.diagnostics_snapshot();
        assert_eq!(snap.writes, 0);
        assert_eq!(snap.frames_written, 0);
        assert_eq!(snap.frames_discarded, 0);
        assert_eq!(snap.frames_pulled, 0);
        assert_eq!(snap.callbacks, 0);
        assert_eq!(engine.ring().len(), 4096 - 128);

        host.tick();
        assert_eq!(host.left()[0], 1032.0);
        let snap = engine.diagnostics_snapshot();
        assert_eq!(snap.callbacks, 1);
        assert_eq!(snap.frames_pulled, 128);
    }

    #[test]
    fn config_deserializes_with_defaults_and_normalizes() {
        let mut config: EngineConfig =
            serde_json::from_str(r#"{ "latencyMs": -20, "preferredOutputDevice": "  " }"#)
                .expect("parse config");
        assert_eq!(config.callback_overhead_ms, DEFAULT_CALLBACK_OVERHEAD_MS);
        assert!(!config.nonblocking);

        config.normalize();
        assert_eq!(config.latency_ms, 0);
        assert_eq!(config.preferred_output_device, None);
    }
}
