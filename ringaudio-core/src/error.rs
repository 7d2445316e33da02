use thiserror::Error;

/// All errors produced by ringaudio-core.
///
/// Overflow and underrun are not errors: the ring absorbs both by policy
/// (overwrite oldest, substitute silence). These variants cover the host
/// audio subsystem and lifecycle misuse only.
#[derive(Debug, Error)]
pub enum RingAudioError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("output device offers {channels} channel(s); stereo output needs at least 2")]
    UnsupportedChannelLayout { channels: u16 },

    #[error("stream is already running")]
    AlreadyRunning,

    #[error("stream is not running")]
    NotRunning,

    #[error("stream has been freed")]
    Freed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RingAudioError>;
