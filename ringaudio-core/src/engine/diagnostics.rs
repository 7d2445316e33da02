//! Stream counters, shared between the producer side and the render callback.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Relaxed atomic counters; safe to bump from the real-time callback.
#[derive(Debug, Default)]
pub struct StreamDiagnostics {
    pub writes: AtomicU64,
    pub frames_written: AtomicU64,
    pub frames_pulled: AtomicU64,
    /// Requested frames the ring could not supply (played as silence).
    pub underrun_frames: AtomicU64,
    pub callbacks: AtomicU64,
    /// Callbacks that fired while the stream was stopped.
    pub detached_callbacks: AtomicU64,
}

impl StreamDiagnostics {
    pub fn reset(&self) {
        self.writes.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_pulled.store(0, Ordering::Relaxed);
        self.underrun_frames.store(0, Ordering::Relaxed);
        self.callbacks.store(0, Ordering::Relaxed);
        self.detached_callbacks.store(0, Ordering::Relaxed);
    }

    pub fn record_write(&self, frames: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.frames_written
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn record_pull(&self, requested: usize, supplied: usize) {
        self.frames_pulled
            .fetch_add(supplied as u64, Ordering::Relaxed);
        self.underrun_frames
            .fetch_add(requested.saturating_sub(supplied) as u64, Ordering::Relaxed);
    }

    /// Snapshot the counters. `frames_discarded` comes from the ring itself.
    pub fn snapshot(&self, frames_discarded: u64) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_discarded,
            frames_pulled: self.frames_pulled.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
            detached_callbacks: self.detached_callbacks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub writes: u64,
    pub frames_written: u64,
    pub frames_discarded: u64,
    pub frames_pulled: u64,
    pub underrun_frames: u64,
    pub callbacks: u64,
    pub detached_callbacks: u64,
}
