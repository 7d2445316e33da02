//! Host-side audio output: the consumer half of the ring.
//!
//! # Design constraints
//!
//! The host invokes [`RenderCallback`] on its real-time audio thread once per
//! hardware quantum. The callback **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! It zero-fills the host buffer and then pulls from the ring, whose `pull`
//! is lock-free and allocation-free. Missing frames therefore play as silence.
//!
//! # Backends
//!
//! [`OutputBackend`] is the seam between the engine and the host audio API.
//! [`CpalOutput`] drives a real device; [`ManualOutput`] hands the callback to
//! a [`ManualHost`] that the caller ticks explicitly.

pub mod device;
pub mod manual;
pub mod output;

pub use manual::{ManualHost, ManualOutput};
pub use output::CpalOutput;

use std::sync::{atomic::Ordering, Arc};

use crate::{
    buffering::RingAudioBuffer,
    engine::{diagnostics::StreamDiagnostics, gate::ActivityGate},
    error::Result,
};

/// A host audio API able to run a [`RenderCallback`] at a fixed quantum.
pub trait OutputBackend: Send {
    /// Sample rate negotiated with the host (Hz).
    fn sample_rate(&self) -> u32;

    /// Interleaved channel count of the host buffer.
    fn channels(&self) -> u16;

    /// Install `callback` as the host's render callback.
    ///
    /// Called once per session, after the ring has been sized.
    fn connect(&mut self, callback: RenderCallback) -> Result<()>;

    /// Remove the render callback and release host resources. Returns once
    /// the host has stopped invoking it.
    fn disconnect(&mut self);
}

/// Consumer handle invoked by the host audio callback.
///
/// Cheap to clone; all state is shared with the owning engine.
#[derive(Clone)]
pub struct RenderCallback {
    ring: Arc<RingAudioBuffer>,
    /// Closed while the stream is stopped: render silence, leave the ring alone.
    attached: Arc<ActivityGate>,
    diagnostics: Arc<StreamDiagnostics>,
}

impl RenderCallback {
    pub(crate) fn new(
        ring: Arc<RingAudioBuffer>,
        attached: Arc<ActivityGate>,
        diagnostics: Arc<StreamDiagnostics>,
    ) -> Self {
        Self {
            ring,
            attached,
            diagnostics,
        }
    }

    /// Fill planar `left`/`right` host buffers. Returns frames taken from the ring.
    pub fn render(&self, left: &mut [f32], right: &mut [f32]) -> usize {
        left.fill(0.0);
        right.fill(0.0);
        let requested = left.len().min(right.len());

        self.diagnostics.callbacks.fetch_add(1, Ordering::Relaxed);
        let Some(_guard) = self.attached.enter() else {
            self.count_detached();
            return 0;
        };
        let supplied = self.ring.pull(left, right);
        self.diagnostics.record_pull(requested, supplied);
        supplied
    }

    /// Fill an interleaved host buffer of `channels` channels. Left and right go
    /// to channels 0 and 1; any further channels stay silent.
    pub fn render_interleaved(&self, out: &mut [f32], channels: usize) -> usize {
        out.fill(0.0);
        let requested = if channels == 0 { 0 } else { out.len() / channels };

        self.diagnostics.callbacks.fetch_add(1, Ordering::Relaxed);
        let Some(_guard) = self.attached.enter() else {
            self.count_detached();
            return 0;
        };
        let supplied = self.ring.pull_interleaved(out, channels);
        self.diagnostics.record_pull(requested, supplied);
        supplied
    }

    /// Whether the stream is currently draining the ring.
    pub fn is_attached(&self) -> bool {
        self.attached.is_open()
    }

    fn count_detached(&self) {
        self.diagnostics
            .detached_callbacks
            .fetch_add(1, Ordering::Relaxed);
    }
}
