//! Lifecycle events broadcast by [`AudioEngine`](crate::engine::AudioEngine).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them over whatever bus they use (JSON logs, IPC, websockets).

use serde::{Deserialize, Serialize};

/// Emitted whenever the stream changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusEvent {
    pub status: StreamStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Lifecycle state of an audio stream.
///
/// ```text
/// Uninitialized ─► Initialized ⇄ Running ─► Freed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// No host stream negotiated yet.
    Uninitialized,
    /// Ring allocated and callback installed, but not draining.
    Initialized,
    /// Host callback is draining the ring.
    Running,
    /// Terminal: callback detached, cursors zeroed.
    Freed,
}

impl StreamStatus {
    /// Whether producer-side calls (`write`, `write_available`,
    /// `enough_space`) are accepted in this state.
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::Initialized | Self::Running)
    }
}
