//! Microphone capture.
//!
//! The cpal stream is `!Send`, so it lives on a dedicated thread for the
//! lifetime of a [`CaptureSession`]. The thread downmixes and resamples the
//! device's native format to the configured rate and forwards fixed-size
//! blocks over a channel. Dropping the session stops the stream.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use alexi_config::SpeechConfig;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no audio input device available")]
    NoInputDevice,
    #[error("could not query input device configuration: {0}")]
    Config(String),
    #[error("unsupported input sample format {0:?}")]
    UnsupportedFormat(SampleFormat),
    #[error("could not open audio stream: {0}")]
    Stream(String),
    #[error("capture thread exited during startup")]
    ThreadDied,
}

/// True when the default host reports an input device.
pub fn input_available() -> bool {
    cpal::default_host().default_input_device().is_some()
}

/// Converts interleaved device frames into mono blocks at the target rate.
pub(crate) struct BlockBuilder {
    channels: usize,
    step: f64,
    position: f64,
    last: Option<f32>,
    block_size: usize,
    block: Vec<i16>,
}

impl BlockBuilder {
    pub(crate) fn new(device_rate: u32, device_channels: u16, target_rate: u32, block_size: usize) -> Self {
        Self {
            channels: device_channels.max(1) as usize,
            step: device_rate as f64 / target_rate.max(1) as f64,
            position: 0.0,
            last: None,
            block_size: block_size.max(1),
            block: Vec::with_capacity(block_size.max(1)),
        }
    }

    /// Push interleaved samples in [-1, 1]; returns the blocks completed.
    pub(crate) fn push(&mut self, data: &[f32]) -> Vec<Vec<i16>> {
        let mut out = Vec::new();
        for frame in data.chunks(self.channels) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            let prev = self.last.unwrap_or(mono);
            // Linear interpolation between the previous and current input frame.
            while self.position < 1.0 {
                let value = prev + (mono - prev) * self.position as f32;
                self.block.push(to_i16(value));
                if self.block.len() == self.block_size {
                    out.push(std::mem::replace(
                        &mut self.block,
                        Vec::with_capacity(self.block_size),
                    ));
                }
                self.position += self.step;
            }
            self.position -= 1.0;
            self.last = Some(mono);
        }
        out
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// A running microphone capture.
pub struct CaptureSession {
    blocks: mpsc::UnboundedReceiver<Vec<i16>>,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Open the default input device and start streaming blocks.
    pub fn start(config: &SpeechConfig) -> Result<Self, CaptureError> {
        let (tx, blocks) = mpsc::unbounded_channel();
        let target_rate = config.sample_rate;
        let block_size = config.block_size;
        let channels = config.channels;

        let (stop, thread) = spawn_owner("alexi-capture", move || {
            open_stream(target_rate, block_size, channels, tx)
        })?;
        Ok(Self {
            blocks,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Next block of samples; `None` once the stream has ended.
    pub async fn next_block(&mut self) -> Option<Vec<i16>> {
        self.blocks.recv().await
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Runs `open` on a dedicated thread and keeps what it returns alive until
/// the returned stop sender is sent on or dropped.
fn spawn_owner<T, F>(
    name: &str,
    open: F,
) -> Result<(std_mpsc::Sender<()>, JoinHandle<()>), CaptureError>
where
    T: 'static,
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
{
    let (init_tx, init_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
    let (stop, stop_rx) = std_mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let resource = match open() {
                Ok(r) => r,
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(resource);
            debug!("Audio capture stopped");
        })
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok((stop, thread)),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => Err(CaptureError::ThreadDied),
    }
}

/// Channel count to open the device with: the requested count when the
/// device supports it, otherwise the device default.
fn pick_channels(requested: u16, default: u16, supported: impl IntoIterator<Item = u16>) -> u16 {
    if requested == 0 || requested == default {
        return default;
    }
    if supported.into_iter().any(|c| c == requested) {
        requested
    } else {
        warn!("Input device does not support {requested} channel(s), using {default}");
        default
    }
}

fn open_stream(
    target_rate: u32,
    block_size: usize,
    channels: u16,
    tx: mpsc::UnboundedSender<Vec<i16>>,
) -> Result<Stream, CaptureError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Config(e.to_string()))?;
    let format = supported.sample_format();
    let mut stream_config = supported.config();
    let rate = stream_config.sample_rate;
    let matching: Vec<u16> = device
        .supported_input_configs()
        .map(|ranges| {
            ranges
                .filter(|r| {
                    r.sample_format() == format
                        && r.min_sample_rate() <= rate
                        && rate <= r.max_sample_rate()
                })
                .map(|r| r.channels())
                .collect()
        })
        .unwrap_or_default();
    stream_config.channels = pick_channels(channels, stream_config.channels, matching);
    debug!(
        "Capturing from {} at {} Hz, {} channel(s), {format:?}",
        device.name().unwrap_or_else(|_| "default device".into()),
        stream_config.sample_rate.0,
        stream_config.channels
    );

    let mut builder = BlockBuilder::new(
        stream_config.sample_rate.0,
        stream_config.channels,
        target_rate,
        block_size,
    );
    let mut forward = move |data: &[f32]| {
        for block in builder.push(data) {
            // Receiver gone means the session is shutting down.
            let _ = tx.send(block);
        }
    };

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &_| forward(data),
            log_stream_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &_| {
                let converted: Vec<f32> =
                    data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                forward(&converted);
            },
            log_stream_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &_| {
                let converted: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 - 32768.0) / 32768.0)
                    .collect();
                forward(&converted);
            },
            log_stream_error,
            None,
        ),
        other => return Err(CaptureError::UnsupportedFormat(other)),
    }
    .map_err(|e| CaptureError::Stream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    Ok(stream)
}

fn log_stream_error(error: StreamError) {
    warn!("Audio stream error: {error}");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn same_rate_mono_passes_through_in_blocks() {
        let mut b = BlockBuilder::new(16_000, 1, 16_000, 4);
        let blocks = b.push(&[0.0, 0.5, -0.5, 1.0, 0.25]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0][0], 0);
        assert_eq!(blocks[0][1], (0.5 * i16::MAX as f32) as i16);
        assert_eq!(blocks[0][3], i16::MAX);
        assert!(b.push(&[0.0, 0.0, 0.0]).len() == 1);
    }

    #[test]
    fn stereo_is_downmixed() {
        let mut b = BlockBuilder::new(16_000, 2, 16_000, 2);
        let blocks = b.push(&[1.0, 0.0, -1.0, -1.0]);
        assert_eq!(blocks, vec![vec![(0.5 * i16::MAX as f32) as i16, -i16::MAX]]);
    }

    #[test]
    fn downsampling_halves_the_sample_count() {
        let mut b = BlockBuilder::new(32_000, 1, 16_000, 1000);
        let input = vec![0.1f32; 4000];
        let blocks = b.push(&input);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn requested_channel_count_is_used_when_supported() {
        assert_eq!(pick_channels(1, 2, [2, 1]), 1);
        assert_eq!(pick_channels(2, 2, std::iter::empty()), 2);
    }

    #[test]
    fn unsupported_channel_count_falls_back_to_default() {
        assert_eq!(pick_channels(4, 2, [1, 2]), 2);
        assert_eq!(pick_channels(0, 1, [1, 2]), 1);
    }

    struct Resource(Arc<AtomicBool>);

    impl Drop for Resource {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn owner_thread_releases_resource_when_stopped() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let (stop, thread) = spawn_owner("test-owner", move || Ok(Resource(flag))).unwrap();
        assert!(!released.load(Ordering::SeqCst));
        drop(stop);
        thread.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn owner_thread_reports_open_failure() {
        let err = spawn_owner::<Resource, _>("test-owner", || Err(CaptureError::NoInputDevice))
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::NoInputDevice));
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
    }
}
