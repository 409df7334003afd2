//! Device capture: constraints, the capture stream seam and the processing
//! applied to captured audio before it reaches the graph.

use dasp_sample::{Sample, ToSample};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::settings::{LatencyHint, Settings};

/// Seconds of captured audio the feed can hold before samples are dropped.
const FEED_SECONDS: f32 = 0.5;

/// Processing requested from the capture device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub latency: LatencyHint,
}

impl From<&Settings> for CaptureConstraints {
    fn from(settings: &Settings) -> Self {
        Self {
            echo_cancellation: settings.echo_cancellation,
            noise_suppression: settings.noise_suppression,
            auto_gain_control: settings.auto_gain_control,
            latency: settings.latency_hint,
        }
    }
}

impl CaptureConstraints {
    pub fn buffer_frames(&self) -> Option<u32> {
        self.latency.buffer_frames()
    }

    pub fn cushion_frames(&self) -> usize {
        self.latency.cushion_frames()
    }
}

/// A live microphone stream.
///
/// Created on the audio host thread and dropped there; implementations may
/// hold platform handles that are not `Send`.
pub trait CaptureStream {
    /// Sample rate of the feed.
    fn sample_rate(&self) -> u32;

    /// Hand out the mono sample feed. Only the first call returns it.
    fn take_feed(&mut self) -> Option<Consumer<f32>>;

    /// Stop every track of the stream. Idempotent.
    fn stop_tracks(&mut self);

    fn is_live(&self) -> bool;
}

/// Ring buffer sized for [`FEED_SECONDS`] of mono audio at `sample_rate`.
pub fn feed_ring(sample_rate: u32) -> (Producer<f32>, Consumer<f32>) {
    let capacity = ((sample_rate as f32 * FEED_SECONDS) as usize).next_power_of_two().max(4096);
    RingBuffer::new(capacity)
}

/// Downmix, noise suppression and automatic gain, applied in the capture
/// callback.
///
/// Allocates only in [`CaptureProcessor::new`]; `push` is real-time safe as
/// long as the callback never delivers more frames than the scratch holds.
pub struct CaptureProcessor {
    gate: Option<NoiseGate>,
    agc: Option<AutoGain>,
    scratch: Vec<f32>,
    dropped: u64,
}

impl CaptureProcessor {
    pub fn new(constraints: &CaptureConstraints, sample_rate: u32) -> Self {
        if constraints.echo_cancellation {
            // treated like a browser "ideal" constraint: best effort
            tracing::warn!("echo cancellation is not available on this host; continuing without it");
        }
        Self {
            gate: constraints.noise_suppression.then(|| NoiseGate::new(sample_rate)),
            agc: constraints.auto_gain_control.then(|| AutoGain::new(sample_rate)),
            scratch: Vec::with_capacity(8192),
            dropped: 0,
        }
    }

    /// Samples dropped because the feed was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Convert interleaved device samples to processed mono and push them.
    pub fn push<T>(&mut self, data: &[T], channels: usize, feed: &mut Producer<f32>)
    where
        T: Sample + ToSample<f32>,
    {
        self.scratch.clear();
        append_downmixed(&mut self.scratch, data, channels);

        if let Some(gate) = self.gate.as_mut() {
            gate.process(&mut self.scratch);
        }
        if let Some(agc) = self.agc.as_mut() {
            agc.process(&mut self.scratch);
        }

        for &sample in &self.scratch {
            if feed.push(sample).is_err() {
                self.dropped += 1;
            }
        }
    }
}

/// Average each interleaved frame into one mono sample.
pub(crate) fn append_downmixed<T>(buf: &mut Vec<f32>, data: &[T], channels: usize)
where
    T: Sample + ToSample<f32>,
{
    if channels <= 1 {
        buf.extend(data.iter().map(|s| s.to_sample::<f32>()));
        return;
    }

    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
        buf.push(sum / frame.len() as f32);
    }
}

/// One-pole smoothing coefficient for a time constant in seconds.
fn coefficient(seconds: f32, sample_rate: u32) -> f32 {
    (-1.0 / (seconds * sample_rate.max(1) as f32)).exp()
}

/// Mutes the feed while its envelope stays below a threshold.
struct NoiseGate {
    threshold: f32,
    envelope: f32,
    gain: f32,
    attack: f32,
    release: f32,
    ramp: f32,
}

impl NoiseGate {
    /// -50 dBFS
    const THRESHOLD: f32 = 0.003_16;

    fn new(sample_rate: u32) -> Self {
        Self {
            threshold: Self::THRESHOLD,
            envelope: 0.0,
            gain: 0.0,
            attack: coefficient(0.001, sample_rate),
            release: coefficient(0.1, sample_rate),
            ramp: coefficient(0.005, sample_rate),
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let level = sample.abs();
            let coeff = if level > self.envelope { self.attack } else { self.release };
            self.envelope = level + coeff * (self.envelope - level);

            let target = if self.envelope >= self.threshold { 1.0 } else { 0.0 };
            self.gain = target + self.ramp * (self.gain - target);
            *sample *= self.gain;
        }
    }
}

/// Slowly levels the feed toward a target RMS.
struct AutoGain {
    target: f32,
    max_gain: f32,
    power: f32,
    gain: f32,
    detector: f32,
    ramp: f32,
}

impl AutoGain {
    /// -20 dBFS
    const TARGET_RMS: f32 = 0.1;
    /// +20 dB
    const MAX_GAIN: f32 = 10.0;
    /// Below this the feed is treated as silence and the gain holds.
    const FLOOR_RMS: f32 = 0.001;

    fn new(sample_rate: u32) -> Self {
        Self {
            target: Self::TARGET_RMS,
            max_gain: Self::MAX_GAIN,
            power: 0.0,
            gain: 1.0,
            detector: coefficient(0.5, sample_rate),
            ramp: coefficient(0.2, sample_rate),
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let power = *sample * *sample;
            self.power = power + self.detector * (self.power - power);

            let rms = self.power.sqrt();
            let wanted = if rms > Self::FLOOR_RMS {
                (self.target / rms).min(self.max_gain)
            } else {
                self.gain
            };
            self.gain = wanted + self.ramp * (self.gain - wanted);
            *sample = (*sample * self.gain).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut Consumer<f32>) -> Vec<f32> {
        let mut out = Vec::new();
        while let Ok(s) = rx.pop() {
            out.push(s);
        }
        out
    }

    #[test]
    fn latency_hint_maps_to_buffer_request() {
        let mut c = CaptureConstraints::default();
        assert_eq!(c.buffer_frames(), Some(128));
        c.latency = LatencyHint::Playback;
        assert_eq!(c.buffer_frames(), None);
        assert!(c.cushion_frames() > CaptureConstraints::default().cushion_frames());
    }

    #[test]
    fn downmixes_and_converts_formats() {
        let mut buf = Vec::new();
        append_downmixed(&mut buf, &[0.5f32, -0.5, 1.0, 0.0], 2);
        assert_eq!(buf, vec![0.0, 0.5]);

        buf.clear();
        append_downmixed(&mut buf, &[i16::MIN, 0i16], 1);
        assert_eq!(buf, vec![-1.0, 0.0]);
    }

    #[test]
    fn plain_capture_passes_audio_through() {
        let (mut tx, mut rx) = feed_ring(48_000);
        let mut processor = CaptureProcessor::new(&CaptureConstraints::default(), 48_000);
        processor.push(&[0.25f32, 0.25, -0.25, -0.25], 2, &mut tx);
        assert_eq!(drain(&mut rx), vec![0.25, -0.25]);
        assert_eq!(processor.dropped(), 0);
    }

    #[test]
    fn noise_gate_closes_on_hiss_and_opens_on_voice() {
        let constraints = CaptureConstraints {
            noise_suppression: true,
            ..Default::default()
        };
        let (mut tx, mut rx) = feed_ring(48_000);
        let mut processor = CaptureProcessor::new(&constraints, 48_000);

        let hiss: Vec<f32> = (0..4800).map(|i| if i % 2 == 0 { 0.0005 } else { -0.0005 }).collect();
        processor.push(&hiss, 1, &mut tx);
        let gated = drain(&mut rx);
        assert!(gated.iter().all(|s| s.abs() <= 0.0005));
        assert!(gated[4000..].iter().all(|s| s.abs() < 1e-6));

        let voice: Vec<f32> = (0..4800).map(|i| if i % 2 == 0 { 0.3 } else { -0.3 }).collect();
        processor.push(&voice, 1, &mut tx);
        let open = drain(&mut rx);
        assert!(open[4000..].iter().all(|s| (s.abs() - 0.3).abs() < 0.01));
    }

    #[test]
    fn auto_gain_lifts_quiet_input_toward_target() {
        let constraints = CaptureConstraints {
            auto_gain_control: true,
            ..Default::default()
        };
        let (mut tx, mut rx) = feed_ring(8_000);
        let mut processor = CaptureProcessor::new(&constraints, 8_000);

        let quiet: Vec<f32> = (0..8000).map(|i| if i % 2 == 0 { 0.02 } else { -0.02 }).collect();
        for _ in 0..3 {
            processor.push(&quiet, 1, &mut tx);
            drain(&mut rx);
        }
        processor.push(&quiet, 1, &mut tx);
        let levelled = drain(&mut rx);
        let last = levelled.last().copied().unwrap_or_default().abs();
        assert!(last > 0.05 && last <= 0.12, "levelled to {last}");
    }

    #[test]
    fn full_feed_counts_drops() {
        let (mut tx, _rx) = RingBuffer::new(4);
        let mut processor = CaptureProcessor::new(&CaptureConstraints::default(), 48_000);
        processor.push(&[0.1f32; 6], 1, &mut tx);
        assert_eq!(processor.dropped(), 2);
    }
}
