//! WAV rendering and reading for the command line tool.

use std::f64::consts::PI;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use uamodem_core::WaveformStep;

use crate::CliError;

/// Render `steps` as a phase-continuous sine, preceded by `lead_in` samples
/// of silence and `tail` samples after. Gaussian noise of `noise_level`
/// standard deviation is added everywhere so a receiver can measure a floor.
pub fn render(
    steps: &[WaveformStep],
    sample_rate: u32,
    lead_in: usize,
    tail: usize,
    noise_level: f32,
    seed: u64,
) -> Result<Vec<f32>, CliError> {
    let mut samples = vec![0.0f32; lead_in];
    let mut phase = 0.0f64;
    for step in steps {
        let count = (u64::from(step.duration_us) * u64::from(sample_rate) / 1_000_000) as usize;
        let delta = 2.0 * PI * f64::from(step.freq_hz) / f64::from(sample_rate);
        for _ in 0..count {
            samples.push(step.relative_amplitude * phase.sin() as f32);
            phase = (phase + delta) % (2.0 * PI);
        }
    }
    samples.resize(samples.len() + tail, 0.0);

    if noise_level > 0.0 {
        let noise = Normal::new(0.0f32, noise_level).map_err(|e| CliError::Usage(format!("noise level: {e}")))?;
        let mut rng = StdRng::seed_from_u64(seed);
        for sample in samples.iter_mut() {
            *sample += noise.sample(&mut rng);
        }
    }
    Ok(samples)
}

/// Write mono 16-bit PCM.
pub fn write(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::new(BufWriter::new(File::create(path)?), spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read the first channel of a 16-bit integer or 32-bit float WAV.
pub fn read(path: &Path) -> Result<(Vec<f32>, u32), CliError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| f32::from(s) / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (_, bits) => return Err(CliError::UnsupportedWav(bits)),
    };
    let samples = interleaved.into_iter().step_by(channels).collect();
    Ok((samples, spec.sample_rate))
}
