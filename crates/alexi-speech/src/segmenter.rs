//! Energy-based utterance segmentation.
//!
//! Audio is scored in short frames by RMS energy. An utterance starts at the
//! first loud frame, keeps a little pre-roll so word onsets are not clipped,
//! and ends after `silence_ms` of quiet or at `max_utterance_secs`.

use alexi_config::SpeechConfig;

const FRAME_MS: u32 = 30;
const PREROLL_FRAMES: usize = 10;

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    pub energy_threshold: f32,
    pub silence_ms: u32,
    pub max_utterance_secs: u32,
}

impl From<&SpeechConfig> for SegmenterConfig {
    fn from(c: &SpeechConfig) -> Self {
        Self {
            sample_rate: c.sample_rate,
            energy_threshold: c.energy_threshold,
            silence_ms: c.silence_ms,
            max_utterance_secs: c.max_utterance_secs,
        }
    }
}

pub struct Segmenter {
    threshold: f32,
    frame_len: usize,
    silence_frames_needed: usize,
    max_samples: usize,
    pending: Vec<i16>,
    preroll: Vec<Vec<i16>>,
    utterance: Vec<i16>,
    in_speech: bool,
    quiet_frames: usize,
}

impl Segmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        let frame_len = (config.sample_rate * FRAME_MS / 1000).max(1) as usize;
        Self {
            threshold: config.energy_threshold,
            frame_len,
            silence_frames_needed: (config.silence_ms / FRAME_MS).max(1) as usize,
            max_samples: (config.sample_rate as usize) * (config.max_utterance_secs.max(1) as usize),
            pending: Vec::new(),
            preroll: Vec::new(),
            utterance: Vec::new(),
            in_speech: false,
            quiet_frames: 0,
        }
    }

    /// True once speech has started and not yet been emitted.
    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Feed samples. Returns a completed utterance when a boundary is found;
    /// samples after the boundary stay buffered for the next call.
    pub fn push(&mut self, chunk: &[i16]) -> Option<Vec<i16>> {
        self.pending.extend_from_slice(chunk);
        let mut consumed = 0;
        let mut done = None;

        while self.pending.len() - consumed >= self.frame_len {
            let frame = &self.pending[consumed..consumed + self.frame_len];
            consumed += self.frame_len;
            let loud = rms(frame) >= self.threshold;

            if !self.in_speech {
                if loud {
                    self.in_speech = true;
                    self.quiet_frames = 0;
                    for f in self.preroll.drain(..) {
                        self.utterance.extend_from_slice(&f);
                    }
                    self.utterance.extend_from_slice(frame);
                } else {
                    self.preroll.push(frame.to_vec());
                    if self.preroll.len() > PREROLL_FRAMES {
                        self.preroll.remove(0);
                    }
                }
                continue;
            }

            self.utterance.extend_from_slice(frame);
            if loud {
                self.quiet_frames = 0;
            } else {
                self.quiet_frames += 1;
            }
            if self.quiet_frames >= self.silence_frames_needed
                || self.utterance.len() >= self.max_samples
            {
                done = Some(self.take());
                break;
            }
        }

        self.pending.drain(..consumed);
        done
    }

    /// Emit whatever speech is buffered, including a trailing partial frame.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if !self.in_speech {
            self.pending.clear();
            self.preroll.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        self.utterance.extend_from_slice(&rest);
        Some(self.take())
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.preroll.clear();
        self.utterance.clear();
        self.in_speech = false;
        self.quiet_frames = 0;
    }

    fn take(&mut self) -> Vec<i16> {
        self.in_speech = false;
        self.quiet_frames = 0;
        self.preroll.clear();
        std::mem::take(&mut self.utterance)
    }
}

/// Root-mean-square amplitude of a frame.
pub fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / frame.len() as f64).sqrt() as f32
}
