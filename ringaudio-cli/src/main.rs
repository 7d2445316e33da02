//! `ringaudio-play`: feeds a tone or WAV file through the ring to the default
//! output device, with a bursty producer, and reports stream counters.

mod settings;
mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use ringaudio_core::{audio::device::list_output_devices, AudioEngine, StreamStatus};
use tracing::{info, warn};

use settings::{load_settings, save_settings, PlayerSettings};
use source::{ChunkSizes, FrameSource, ToneSource, WavSource};

/// Sleep between backpressure probes when the ring looks full.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(2);
/// Upper bound on waiting for the tail of the stream to play out.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    write_config: Option<PathBuf>,
    list_devices: bool,
    wav: Option<PathBuf>,
    tone_hz: Option<f32>,
    seconds: Option<f32>,
    latency_ms: Option<i32>,
    nonblocking: bool,
    device: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    fn value<T: std::str::FromStr>(
        it: &mut impl Iterator<Item = String>,
        flag: &str,
    ) -> anyhow::Result<T> {
        let raw = it
            .next()
            .with_context(|| format!("missing value for {flag}"))?;
        raw.parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {raw}"))
    }

    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(value(&mut it, "--config")?),
            "--write-config" => args.write_config = Some(value(&mut it, "--write-config")?),
            "--list-devices" => args.list_devices = true,
            "--wav" => args.wav = Some(value(&mut it, "--wav")?),
            "--tone" => args.tone_hz = Some(value(&mut it, "--tone")?),
            "--seconds" => args.seconds = Some(value(&mut it, "--seconds")?),
            "--latency-ms" => args.latency_ms = Some(value(&mut it, "--latency-ms")?),
            "--nonblocking" => args.nonblocking = true,
            "--device" => args.device = Some(value(&mut it, "--device")?),
            "--help" | "-h" => {
                println!(
                    "Usage: ringaudio-play [--config <file.json>] [--write-config <file.json>]\n\
                     \x20                     [--wav <stereo-f32.wav> | --tone <hz>] [--seconds <n>]\n\
                     \x20                     [--latency-ms <n>] [--nonblocking] [--device <name>]\n\
                     \x20                     [--list-devices]"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn resolve_settings(args: &Args) -> anyhow::Result<PlayerSettings> {
    let mut settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => PlayerSettings::default(),
    };
    if let Some(wav) = &args.wav {
        settings.wav_path = Some(wav.clone());
    }
    if let Some(hz) = args.tone_hz {
        settings.tone_hz = hz;
        settings.wav_path = None;
    }
    if let Some(seconds) = args.seconds {
        settings.seconds = seconds;
    }
    if let Some(latency) = args.latency_ms {
        settings.engine.latency_ms = latency;
    }
    if args.nonblocking {
        settings.engine.nonblocking = true;
    }
    if let Some(device) = &args.device {
        settings.engine.preferred_output_device = Some(device.clone());
    }
    settings.normalize();
    Ok(settings)
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ringaudio=info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("ringaudio-play failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;

    if args.list_devices {
        let devices = list_output_devices();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let settings = resolve_settings(&args)?;
    if let Some(path) = &args.write_config {
        save_settings(path, &settings)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "settings written");
    }

    let engine = Arc::new(
        AudioEngine::open_default(settings.engine.clone()).context("failed to open audio output")?,
    );
    let status_logger = spawn_status_logger(&engine);

    let mut source: Box<dyn FrameSource> = match &settings.wav_path {
        Some(path) => Box::new(WavSource::open(path)?),
        None => Box::new(ToneSource::new(
            settings.tone_hz,
            settings.amplitude,
            engine.sample_rate(),
        )),
    };
    if let Some(rate) = source.sample_rate() {
        if rate != engine.sample_rate() {
            warn!(
                file_rate = rate,
                device_rate = engine.sample_rate(),
                "sample rate mismatch; playing without resampling"
            );
        }
    }

    info!(
        capacity = engine.buffer_size(),
        sample_rate = engine.sample_rate(),
        nonblocking = engine.is_nonblocking(),
        "streaming"
    );
    engine.start()?;
    produce(&engine, source.as_mut(), &settings)?;

    let drain_start = Instant::now();
    while !engine.ring().is_empty() && drain_start.elapsed() < DRAIN_TIMEOUT {
        thread::sleep(BACKPRESSURE_POLL);
    }

    engine.stop()?;
    let snapshot = engine.diagnostics_snapshot();
    info!(
        frames_written = snapshot.frames_written,
        frames_discarded = snapshot.frames_discarded,
        frames_pulled = snapshot.frames_pulled,
        underrun_frames = snapshot.underrun_frames,
        callbacks = snapshot.callbacks,
        "stream finished"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    engine.free()?;
    drop(engine);
    if status_logger.join().is_err() {
        warn!("status logger thread panicked");
    }
    Ok(())
}

/// Push the source into the engine in irregular chunks until `settings.seconds`
/// of audio has been written or the source runs dry.
///
/// Blocking mode polls `enough_space` before each chunk. Nonblocking mode
/// writes unconditionally and paces itself in real time instead.
fn produce(
    engine: &AudioEngine,
    source: &mut dyn FrameSource,
    settings: &PlayerSettings,
) -> anyhow::Result<()> {
    let rate = engine.sample_rate();
    let total = (settings.seconds as f64 * rate as f64) as usize;
    let mut sizes = ChunkSizes::new(settings.min_chunk_frames, settings.max_chunk_frames);
    let mut chunk = Vec::with_capacity(settings.max_chunk_frames * 2);
    let mut written = 0usize;

    while written < total {
        // An empty ring always takes the next chunk, even when it is tiny.
        if !engine.is_nonblocking() && !engine.enough_space()? && !engine.ring().is_empty() {
            thread::sleep(BACKPRESSURE_POLL);
            continue;
        }

        let want = sizes
            .next()
            .unwrap_or(settings.min_chunk_frames)
            .min(total - written);
        chunk.clear();
        let got = source.fill(want, &mut chunk)?;
        if got == 0 {
            info!(written, "source exhausted");
            break;
        }
        engine.write(&chunk)?;
        written += got;

        if engine.is_nonblocking() {
            thread::sleep(Duration::from_secs_f64(got as f64 / rate as f64));
        }
    }
    Ok(())
}

fn spawn_status_logger(engine: &AudioEngine) -> thread::JoinHandle<()> {
    let mut rx = engine.subscribe_status();
    thread::spawn(move || {
        // Ends when the engine (and its sender) is dropped.
        while let Ok(event) = rx.blocking_recv() {
            match event.detail {
                Some(detail) => info!(status = ?event.status, detail = %detail, "stream status"),
                None => info!(status = ?event.status, "stream status"),
            }
            if event.status == StreamStatus::Freed {
                break;
            }
        }
    })
}
