//! Player settings (optional JSON file, overridden by command-line flags).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ringaudio_core::EngineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PlayerSettings {
    /// Engine options (`latencyMs`, `callbackOverheadMs`, `nonblocking`,
    /// `preferredOutputDevice`) live at the top level of the file.
    #[serde(flatten)]
    pub engine: EngineConfig,
    /// Stereo 32-bit float WAV to stream. `None` plays the test tone.
    pub wav_path: Option<PathBuf>,
    pub tone_hz: f32,
    pub amplitude: f32,
    /// Playback length in seconds (tone) or cap (WAV).
    pub seconds: f32,
    /// Producer chunk sizes are drawn from `[minChunkFrames, maxChunkFrames]`.
    pub min_chunk_frames: usize,
    pub max_chunk_frames: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            wav_path: None,
            tone_hz: 440.0,
            amplitude: 0.2,
            seconds: 3.0,
            min_chunk_frames: 64,
            max_chunk_frames: 1024,
        }
    }
}

impl PlayerSettings {
    pub fn normalize(&mut self) {
        self.engine.normalize();
        self.tone_hz = if self.tone_hz.is_finite() {
            self.tone_hz.clamp(20.0, 20_000.0)
        } else {
            440.0
        };
        self.amplitude = if self.amplitude.is_finite() {
            self.amplitude.clamp(0.0, 1.0)
        } else {
            0.2
        };
        self.seconds = if self.seconds.is_finite() {
            self.seconds.clamp(0.0, 3600.0)
        } else {
            3.0
        };
        self.min_chunk_frames = self.min_chunk_frames.clamp(1, 1 << 16);
        self.max_chunk_frames = self.max_chunk_frames.clamp(self.min_chunk_frames, 1 << 16);
        self.wav_path = self
            .wav_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }
}

/// Load settings from `path`. A missing file yields defaults; a malformed one
/// is an error so typos are not silently ignored.
pub fn load_settings(path: &Path) -> anyhow::Result<PlayerSettings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<PlayerSettings>(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("settings file {} not found, using defaults", path.display());
            PlayerSettings::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    settings.normalize();
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &PlayerSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
