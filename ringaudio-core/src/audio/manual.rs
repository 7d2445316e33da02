//! Host stand-in driven explicitly by the caller.
//!
//! `ManualOutput` is the backend half handed to the engine; `ManualHost` is
//! the scheduler half that fires the render callback one quantum at a time.
//! Useful for headless rendering, offline tests and hosts that already own
//! their own audio thread.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{OutputBackend, RenderCallback};
use crate::error::Result;

type CallbackSlot = Arc<Mutex<Option<RenderCallback>>>;

/// Backend half: records the callback installed by the engine.
pub struct ManualOutput {
    sample_rate: u32,
    slot: CallbackSlot,
}

impl ManualOutput {
    /// Create a stereo backend at `sample_rate` and its host with a fixed
    /// `quantum` (frames per callback).
    pub fn new(sample_rate: u32, quantum: usize) -> (Self, ManualHost) {
        let slot: CallbackSlot = Arc::new(Mutex::new(None));
        let host = ManualHost {
            quantum,
            slot: Arc::clone(&slot),
            left: vec![0.0; quantum],
            right: vec![0.0; quantum],
        };
        (Self { sample_rate, slot }, host)
    }
}

impl OutputBackend for ManualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        2
    }

    fn connect(&mut self, callback: RenderCallback) -> Result<()> {
        *self.slot.lock() = Some(callback);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.slot.lock().take();
    }
}

/// Scheduler half: owns the planar output buffers the callback renders into.
pub struct ManualHost {
    quantum: usize,
    slot: CallbackSlot,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl ManualHost {
    /// Frames rendered per `tick`.
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Whether a render callback is currently installed.
    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Fire the callback once. Returns the frames taken from the ring, or
    /// `None` when no callback is installed.
    pub fn tick(&mut self) -> Option<usize> {
        // Clone out so the slot lock is not held while rendering.
        let callback = self.slot.lock().clone()?;
        Some(callback.render(&mut self.left, &mut self.right))
    }

    /// Left channel of the last rendered quantum.
    pub fn left(&self) -> &[f32] {
        &self.left
    }

    /// Right channel of the last rendered quantum.
    pub fn right(&self) -> &[f32] {
        &self.right
    }
}
