//! Audio file helpers: WAV encoding of captured samples and ffmpeg
//! resampling for backends that need 16 kHz mono input.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::process::Command;

/// Sample rate the local model expects.
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

/// Check if ffmpeg is available on the system.
pub fn ffmpeg_available() -> bool {
    which::which("ffmpeg").is_ok()
}

/// Write mono 16-bit PCM samples to a WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("could not create {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Resample a WAV file to 16 kHz mono, placed alongside the input.
///
/// The caller removes the returned file when done.
pub async fn convert_to_wav_16k(input: &Path) -> Result<PathBuf> {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let output = input.with_file_name(format!("{stem}_16k.wav"));

    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-ar", "16000", "-ac", "1", "-loglevel", "error"])
        .arg(&output)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .context("could not run ffmpeg")?;

    if !status.success() {
        bail!("ffmpeg conversion failed with status: {status}");
    }
    Ok(output)
}

/// Sample rate recorded in a WAV header.
pub fn wav_sample_rate(path: &Path) -> Result<u32> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    Ok(reader.spec().sample_rate)
}
