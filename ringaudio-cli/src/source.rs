//! Producers of interleaved stereo `f32` frames.

use std::f32::consts::TAU;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context};

/// Something that can hand out interleaved stereo frames in arbitrary chunks.
pub trait FrameSource {
    /// Native rate of the material, if it has one.
    fn sample_rate(&self) -> Option<u32>;

    /// Append up to `frames` frames to `out`. Returns frames appended; `0`
    /// means the source is exhausted.
    fn fill(&mut self, frames: usize, out: &mut Vec<f32>) -> anyhow::Result<usize>;
}

/// Continuous sine tone, identical on both channels.
#[derive(Debug, Clone)]
pub struct ToneSource {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl ToneSource {
    pub fn new(freq_hz: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * freq_hz / sample_rate.max(1) as f32,
            amplitude,
        }
    }
}

impl FrameSource for ToneSource {
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    fn fill(&mut self, frames: usize, out: &mut Vec<f32>) -> anyhow::Result<usize> {
        out.reserve(frames * 2);
        for _ in 0..frames {
            let s = self.amplitude * self.phase.sin();
            out.push(s);
            out.push(s);
            self.phase = (self.phase + self.step) % TAU;
        }
        Ok(frames)
    }
}

/// Stereo 32-bit float WAV file.
pub struct WavSource {
    reader: hound::WavReader<BufReader<File>>,
    sample_rate: u32,
}

impl WavSource {
    /// Open `path`. Only 2-channel IEEE float files are accepted; the ring
    /// carries exactly that format and the player does no conversion.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let reader = hound::WavReader::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let spec = reader.spec();
        if spec.channels != 2 {
            bail!(
                "{} has {} channel(s); only stereo files are supported",
                path.display(),
                spec.channels
            );
        }
        if spec.sample_format != hound::SampleFormat::Float || spec.bits_per_sample != 32 {
            bail!(
                "{} is {:?}/{}-bit; only 32-bit float files are supported",
                path.display(),
                spec.sample_format,
                spec.bits_per_sample
            );
        }
        Ok(Self {
            reader,
            sample_rate: spec.sample_rate,
        })
    }
}

impl FrameSource for WavSource {
    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }

    fn fill(&mut self, frames: usize, out: &mut Vec<f32>) -> anyhow::Result<usize> {
        let before = out.len();
        for sample in self.reader.samples::<f32>().take(frames * 2) {
            out.push(sample.context("corrupt WAV sample")?);
        }
        // Drop a dangling left sample from a truncated file.
        let appended = (out.len() - before) / 2;
        out.truncate(before + appended * 2);
        Ok(appended)
    }
}

/// Deterministic irregular chunk sizes in `[min, max]`, so the ring sees a
/// bursty producer.
#[derive(Debug, Clone)]
pub struct ChunkSizes {
    state: u32,
    min: usize,
    max: usize,
}

impl ChunkSizes {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        Self {
            state: 0x9e37_79b9,
            min,
            max: max.max(min),
        }
    }
}

impl Iterator for ChunkSizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        // xorshift32
        self.state ^= self.state << 13;
        self.state ^= self.state >> 17;
        self.state ^= self.state << 5;
        let span = (self.max - self.min + 1) as u32;
        Some(self.min + (self.state % span) as usize)
    }
}
