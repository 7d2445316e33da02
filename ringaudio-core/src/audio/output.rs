//! Audio output via the cpal backend.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalOutput` therefore owns a dedicated device thread that opens the
//! device, builds the stream and eventually drops it. The handle itself only
//! holds a command channel, so it is `Send` and can live inside the engine.

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
#[cfg(feature = "audio-cpal")]
use std::thread::JoinHandle;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use super::{OutputBackend, RenderCallback};
use crate::error::{RingAudioError, Result};

#[cfg(feature = "audio-cpal")]
enum DeviceCommand {
    Connect(RenderCallback, Sender<Result<()>>),
    /// Replies once the stream has been dropped.
    Disconnect(Sender<()>),
}

/// Negotiated device parameters reported back by the device thread.
#[cfg(feature = "audio-cpal")]
struct Negotiated {
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

/// Handle to an output device driven by cpal.
pub struct CpalOutput {
    sample_rate: u32,
    channels: u16,
    device_name: String,
    #[cfg(feature = "audio-cpal")]
    commands: Option<Sender<DeviceCommand>>,
    #[cfg(feature = "audio-cpal")]
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Name of the opened device as reported by the OS.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[cfg(feature = "audio-cpal")]
impl CpalOutput {
    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available one.
    ///
    /// Blocks until the device thread reports the negotiated format.
    ///
    /// # Errors
    /// `RingAudioError::NoDefaultOutputDevice` when no output exists,
    /// `RingAudioError::UnsupportedChannelLayout` for mono-only devices, or
    /// `RingAudioError::AudioDevice` if the host refuses the query.
    pub fn open_with_preference(preferred_device_name: Option<&str>) -> Result<Self> {
        let preferred = preferred_device_name.map(str::to_owned);
        let (open_tx, open_rx) = bounded::<Result<Negotiated>>(1);
        let (command_tx, command_rx) = unbounded::<DeviceCommand>();

        let thread = std::thread::Builder::new()
            .name("ringaudio-output".into())
            .spawn(move || device_thread(preferred, open_tx, command_rx))?;

        match open_rx.recv() {
            Ok(Ok(negotiated)) => Ok(Self {
                sample_rate: negotiated.sample_rate,
                channels: negotiated.channels,
                device_name: negotiated.device_name,
                commands: Some(command_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(RingAudioError::Other(anyhow::anyhow!(
                    "output device thread died unexpectedly"
                )))
            }
        }
    }

    /// Open the system default output device.
    pub fn open_default() -> Result<Self> {
        Self::open_with_preference(None)
    }

    fn send(&self, command: DeviceCommand) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or_else(|| RingAudioError::AudioStream("output device closed".into()))?
            .send(command)
            .map_err(|_| RingAudioError::AudioStream("output device thread has exited".into()))
    }
}

#[cfg(feature = "audio-cpal")]
impl OutputBackend for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn connect(&mut self, callback: RenderCallback) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(DeviceCommand::Connect(callback, reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| RingAudioError::AudioStream("output device thread has exited".into()))?
    }

    fn disconnect(&mut self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.send(DeviceCommand::Disconnect(reply_tx)).is_ok() {
            // A closed reply channel means the thread exited, taking the stream.
            let _ = reply_rx.recv();
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for CpalOutput {
    fn drop(&mut self) {
        // Closing the channel ends the device thread's command loop.
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("output device thread panicked");
            }
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn device_thread(
    preferred: Option<String>,
    open_tx: Sender<Result<Negotiated>>,
    commands: Receiver<DeviceCommand>,
) {
    let (device, config, sample_format) = match resolve_output(preferred.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    let _ = open_tx.send(Ok(Negotiated {
        device_name: device.name().unwrap_or_default(),
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    }));

    let mut stream: Option<Stream> = None;
    for command in commands.iter() {
        match command {
            DeviceCommand::Connect(callback, reply) => {
                let result = build_stream(&device, &config, sample_format, callback).and_then(|s| {
                    s.play()
                        .map_err(|e| RingAudioError::AudioStream(e.to_string()))?;
                    Ok(s)
                });
                let reply_value = match result {
                    Ok(s) => {
                        stream = Some(s);
                        info!("output stream playing");
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(reply_value);
            }
            DeviceCommand::Disconnect(reply) => {
                if let Some(s) = stream.take() {
                    drop(s);
                    info!("output stream closed");
                }
                let _ = reply.send(());
            }
        }
    }
    // Stream drops here, releasing the device on this thread.
}

#[cfg(feature = "audio-cpal")]
fn resolve_output(preferred: Option<&str>) -> Result<(Device, StreamConfig, SampleFormat)> {
    let host = cpal::default_host();
    let mut selected_device = None;

    if let Some(preferred_name) = preferred {
        match host.output_devices() {
            Ok(mut devices) => {
                selected_device = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });

                if selected_device.is_none() {
                    warn!(
                        "preferred output device '{}' not found, falling back",
                        preferred_name
                    );
                }
            }
            Err(e) => {
                warn!("failed to list output devices while resolving preference: {e}");
            }
        }
    }

    let device = if let Some(device) = selected_device {
        device
    } else if let Some(default) = host.default_output_device() {
        default
    } else {
        let mut devices = host
            .output_devices()
            .map_err(|e| RingAudioError::AudioDevice(e.to_string()))?;
        let fallback = devices.next().ok_or(RingAudioError::NoDefaultOutputDevice)?;
        warn!("no default output device, falling back to first available output");
        fallback
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let default = device
        .default_output_config()
        .map_err(|e| RingAudioError::AudioDevice(e.to_string()))?;

    let supported = if default.channels() >= 2 {
        default
    } else {
        let rate = default.sample_rate();
        device
            .supported_output_configs()
            .map_err(|e| RingAudioError::AudioDevice(e.to_string()))?
            .find(|range| {
                range.channels() >= 2
                    && range.min_sample_rate() <= rate
                    && rate <= range.max_sample_rate()
            })
            .map(|range| range.with_sample_rate(rate))
            .ok_or(RingAudioError::UnsupportedChannelLayout {
                channels: default.channels(),
            })?
    };

    let sample_format = supported.sample_format();
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        ?sample_format,
        "output config selected"
    );

    Ok((device, config, sample_format))
}

#[cfg(feature = "audio-cpal")]
fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    callback: RenderCallback,
) -> Result<Stream> {
    let ch = config.channels as usize;

    match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                callback.render_interleaved(data, ch);
            },
            |err| error!("audio stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => build_encoded_stream(device, config, callback, encode_i16),
        SampleFormat::U16 => build_encoded_stream(device, config, callback, encode_u16),
        fmt => {
            return Err(RingAudioError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| RingAudioError::AudioStream(e.to_string()))
}

/// Output stream for an integer device format: render into a float scratch
/// buffer, then encode each sample.
#[cfg(feature = "audio-cpal")]
fn build_encoded_stream<T>(
    device: &Device,
    config: &StreamConfig,
    callback: RenderCallback,
    encode: fn(f32) -> T,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let ch = config.channels as usize;
    // Grown only when the host hands us a larger quantum than before.
    let mut scratch: Vec<f32> = vec![0.0; 4096];
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let block = &mut scratch[..data.len()];
            callback.render_interleaved(block, ch);
            for (dst, src) in data.iter_mut().zip(block.iter()) {
                *dst = encode(*src);
            }
        },
        |err| error!("audio stream error: {err}"),
        None,
    )
}

#[cfg(feature = "audio-cpal")]
fn encode_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[cfg(feature = "audio-cpal")]
fn encode_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) * 32767.0) + 32768.0) as u16
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl CpalOutput {
    pub fn open_with_preference(_preferred_device_name: Option<&str>) -> Result<Self> {
        Err(RingAudioError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default() -> Result<Self> {
        Self::open_with_preference(None)
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl OutputBackend for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn connect(&mut self, _callback: RenderCallback) -> Result<()> {
        Err(RingAudioError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn disconnect(&mut self) {}
}
