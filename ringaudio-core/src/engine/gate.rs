//! Open/closed flag with an in-flight counter.
//!
//! A role (producer or render callback) calls [`ActivityGate::enter`] before
//! touching the ring and holds the returned guard until it is done. Control
//! code calls [`ActivityGate::close_and_wait`] to shut the role out and wait
//! for any call already past the check, so shared state can be reset safely.
//!
//! `enter` bumps the counter before reading the flag and `close_and_wait`
//! stores the flag before reading the counter, both `SeqCst`: either the
//! entering side sees the gate closed, or the closing side sees it inside.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

#[derive(Debug)]
pub struct ActivityGate {
    open: AtomicBool,
    active: AtomicUsize,
}

impl ActivityGate {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
            active: AtomicUsize::new(0),
        }
    }

    /// `Some` while the gate is open; the guard keeps `close_and_wait` waiting.
    /// Wait-free.
    pub fn enter(&self) -> Option<ActivityGuard<'_>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        if self.open.load(Ordering::SeqCst) {
            Some(ActivityGuard { gate: self })
        } else {
            self.active.fetch_sub(1, Ordering::Release);
            None
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Reopen or close without waiting for calls in flight.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Close, then spin until every guard handed out before the close is gone.
    pub fn close_and_wait(&self) {
        self.open.store(false, Ordering::SeqCst);
        while self.active.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
    }
}

pub struct ActivityGuard<'a> {
    gate: &'a ActivityGate,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::Release);
    }
}
