//! Analysis sampler: byte snapshots of the post-gain signal.
//!
//! The [`AnalysisTap`] node publishes the most recent [`FFT_SIZE`] samples
//! off the real-time thread; the [`Analyser`] on the other end copies that
//! window on every read and turns it into the byte encodings browsers use
//! for `AnalyserNode`:
//!
//! - time domain: `128 * (x + 1)`, so silence is 128 and ±1.0 is full scale
//! - frequency: Blackman-windowed FFT magnitude, exponentially smoothed
//!   across reads, mapped from `[-100 dB, -30 dB]` onto `0..=255`

use std::f32::consts::PI;
use std::sync::Arc;

use dasp_ring_buffer::Fixed;
use parking_lot::Mutex;
use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::nodes::effect::analysis_tap::SharedWindow;
use crate::nodes::AnalysisTap;
use crate::settings::{ANALYSIS_SMOOTHING, FFT_SIZE, FREQUENCY_BIN_COUNT};

/// Lower bound of the byte frequency scale.
pub const MIN_DECIBELS: f32 = -100.0;
/// Upper bound of the byte frequency scale.
pub const MAX_DECIBELS: f32 = -30.0;
/// Byte value of a silent time-domain sample.
pub const SILENT_SAMPLE: u8 = 128;

/// One reading of the analysis tap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisSnapshot {
    /// [`FFT_SIZE`] samples, centered at 128
    pub time_domain: Vec<u8>,
    /// [`FREQUENCY_BIN_COUNT`] magnitudes, 0 = silence
    pub frequency: Vec<u8>,
}

impl AnalysisSnapshot {
    /// The flat reading returned when no tap is attached.
    pub fn silent() -> Self {
        Self {
            time_domain: vec![SILENT_SAMPLE; FFT_SIZE],
            frequency: vec![0; FREQUENCY_BIN_COUNT],
        }
    }

    pub fn is_silent(&self) -> bool {
        self.time_domain.iter().all(|s| *s == SILENT_SAMPLE) && self.frequency.iter().all(|m| *m == 0)
    }
}

impl Default for AnalysisSnapshot {
    fn default() -> Self {
        Self::silent()
    }
}

/// Create a connected tap node and analyser.
pub fn tap(fft_size: usize, smoothing: f32) -> (AnalysisTap, Analyser) {
    let fft_size = fft_size.max(2);
    let shared: SharedWindow = Arc::new(Mutex::new(Fixed::from(vec![0.0; fft_size])));
    (AnalysisTap::new(shared.clone(), fft_size), Analyser::new(shared, fft_size, smoothing))
}

/// Reading side of an analysis tap.
pub struct Analyser {
    shared: SharedWindow,
    /// Copy of the shared window taken by the current read, oldest first.
    window: Vec<f32>,

    fft: Arc<dyn RealToComplex<f32>>,
    blackman: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,

    smoothed: Vec<f32>,
    smoothing: f32,
}

impl Analyser {
    fn new(shared: SharedWindow, fft_size: usize, smoothing: f32) -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();

        Self {
            shared,
            window: vec![0.0; fft_size],
            blackman: blackman_window(fft_size),
            fft,
            input,
            spectrum,
            scratch,
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.blackman.len()
    }

    /// Copy the latest published window.
    fn pull(&mut self) {
        let shared = self.shared.lock();
        for (dst, sample) in self.window.iter_mut().zip(shared.iter()) {
            *dst = *sample;
        }
    }

    /// Most recent samples, oldest first, as bytes centered at 128.
    pub fn time_domain_into(&mut self, out: &mut [u8]) {
        self.pull();
        for (byte, sample) in out.iter_mut().zip(self.window.iter()) {
            *byte = sample_to_byte(*sample);
        }
    }

    /// Smoothed magnitude spectrum of the most recent window, as bytes.
    ///
    /// Every call advances the smoothing by one step.
    pub fn frequency_into(&mut self, out: &mut [u8]) {
        self.pull();

        for ((dst, sample), w) in self.input.iter_mut().zip(self.window.iter()).zip(&self.blackman) {
            *dst = sample * w;
        }

        if let Err(err) = self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            tracing::warn!(%err, "spectrum transform failed; keeping previous magnitudes");
        } else {
            let scale = 1.0 / self.blackman.len() as f32;
            let tau = self.smoothing;
            for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.spectrum) {
                let magnitude = bin.norm() * scale;
                let next = tau * *smoothed + (1.0 - tau) * magnitude;
                *smoothed = if next.is_finite() { next } else { 0.0 };
            }
        }

        for (byte, magnitude) in out.iter_mut().zip(&self.smoothed) {
            *byte = magnitude_to_byte(*magnitude);
        }
    }
}

impl core::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size())
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

/// Shared access to whichever analyser is currently attached.
///
/// Readers get the flat reading while nothing is attached, so a torn-down
/// graph can never be read.
#[derive(Clone, Debug, Default)]
pub struct AnalysisSampler {
    slot: Arc<Mutex<Option<Analyser>>>,
}

impl AnalysisSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, analyser: Analyser) {
        *self.slot.lock() = Some(analyser);
    }

    pub(crate) fn detach(&self) -> Option<Analyser> {
        self.slot.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Fill `out` with time-domain bytes; returns false (and writes the flat
    /// reading) when no tap is attached.
    pub fn fill_time_domain(&self, out: &mut [u8]) -> bool {
        match self.slot.lock().as_mut() {
            Some(analyser) => {
                analyser.time_domain_into(out);
                true
            }
            None => {
                out.fill(SILENT_SAMPLE);
                false
            }
        }
    }

    /// Fill `out` with frequency bytes; returns false (and writes zeros) when
    /// no tap is attached.
    pub fn fill_frequency(&self, out: &mut [u8]) -> bool {
        match self.slot.lock().as_mut() {
            Some(analyser) => {
                analyser.frequency_into(out);
                true
            }
            None => {
                out.fill(0);
                false
            }
        }
    }

    pub fn sample_time_domain(&self) -> Vec<u8> {
        let mut out = vec![SILENT_SAMPLE; FFT_SIZE];
        self.fill_time_domain(&mut out);
        out
    }

    pub fn sample_frequency(&self) -> Vec<u8> {
        let mut out = vec![0; FREQUENCY_BIN_COUNT];
        self.fill_frequency(&mut out);
        out
    }

    /// Read both buffers into an existing snapshot.
    pub fn read_into(&self, snapshot: &mut AnalysisSnapshot) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(analyser) => {
                analyser.time_domain_into(&mut snapshot.time_domain);
                analyser.frequency_into(&mut snapshot.frequency);
                true
            }
            None => {
                snapshot.time_domain.fill(SILENT_SAMPLE);
                snapshot.frequency.fill(0);
                false
            }
        }
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        let mut snapshot = AnalysisSnapshot::silent();
        self.read_into(&mut snapshot);
        snapshot
    }
}

#[inline]
fn sample_to_byte(sample: f32) -> u8 {
    (128.0 * (sample + 1.0)).clamp(0.0, 255.0) as u8
}

#[inline]
fn magnitude_to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman_window(len: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..len)
        .map(|i| {
            let x = i as f32 / len as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Analyser for the monitoring graph's fixed window and smoothing.
pub fn default_tap() -> (AnalysisTap, Analyser) {
    tap(FFT_SIZE, ANALYSIS_SMOOTHING)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(samples: impl IntoIterator<Item = f32>) -> Analyser {
        let (mut tap, analyser) = default_tap();
        let samples: Vec<f32> = samples.into_iter().collect();
        tap.publish(&samples);
        analyser
    }

    fn sine(freq_bin: usize, amplitude: f32) -> impl Iterator<Item = f32> {
        (0..FFT_SIZE).map(move |i| amplitude * (2.0 * PI * freq_bin as f32 * i as f32 / FFT_SIZE as f32).sin())
    }

    #[test]
    fn byte_encodings_match_analyser_node() {
        assert_eq!(sample_to_byte(0.0), 128);
        assert_eq!(sample_to_byte(1.0), 255);
        assert_eq!(sample_to_byte(-1.0), 0);
        assert_eq!(sample_to_byte(4.0), 255);
        assert_eq!(magnitude_to_byte(0.0), 0);
        assert_eq!(magnitude_to_byte(1e-6), 0); // -120 dB
        assert_eq!(magnitude_to_byte(1.0), 255); // 0 dB
        // -65 dB is the middle of the range
        assert_eq!(magnitude_to_byte(10f32.powf(-65.0 / 20.0)), 127);
    }

    #[test]
    fn silence_reads_flat() {
        let mut analyser = feed(core::iter::repeat(0.0).take(FFT_SIZE));
        let mut time = vec![0u8; FFT_SIZE];
        let mut freq = vec![255u8; FREQUENCY_BIN_COUNT];
        analyser.time_domain_into(&mut time);
        analyser.frequency_into(&mut freq);
        assert!(time.iter().all(|s| *s == 128));
        assert!(freq.iter().all(|m| *m == 0));
    }

    #[test]
    fn tone_peaks_at_its_bin_and_smooths_across_reads() {
        let mut analyser = feed(sine(64, 0.01));
        let mut first = vec![0u8; FREQUENCY_BIN_COUNT];
        analyser.frequency_into(&mut first);
        let mut second = vec![0u8; FREQUENCY_BIN_COUNT];
        analyser.frequency_into(&mut second);

        let peak = second
            .iter()
            .enumerate()
            .max_by_key(|(_, m)| **m)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 64);
        // smoothing: the same input read twice grows toward its steady state
        assert!(second[64] > first[64]);
        assert!(second[64] > 100);
        assert_eq!(second[400], 0);
    }

    #[test]
    fn window_keeps_most_recent_samples() {
        let samples = (0..FFT_SIZE + 10).map(|i| if i < 10 { -1.0 } else { 0.5 });
        let mut analyser = feed(samples);
        let mut time = vec![0u8; FFT_SIZE];
        analyser.time_domain_into(&mut time);
        assert!(time.iter().all(|s| *s == sample_to_byte(0.5)));
    }

    #[test]
    fn unread_backlog_never_hides_the_newest_audio() {
        let (mut tap, mut analyser) = default_tap();
        for _ in 0..200 {
            tap.publish(&[0.1; 64]);
        }
        for _ in 0..50 {
            tap.publish(&[0.9; 64]);
        }
        let mut time = vec![0u8; FFT_SIZE];
        analyser.time_domain_into(&mut time);
        assert!(time.iter().all(|s| *s == sample_to_byte(0.9)));
        assert_eq!(time[FFT_SIZE - 1], 243);
    }

    #[test]
    fn graph_without_a_reader_still_reports_current_audio() {
        use crate::graph::AudioGraph;
        use crate::nodes::CaptureSource;
        use dasp_graph::Buffer;
        use rtrb::RingBuffer;

        let (mut tx, rx) = RingBuffer::new(8192);
        let (tap, mut analyser) = default_tap();
        let mut graph = AudioGraph::new(48_000);
        let source = graph.add(CaptureSource::new(rx, 48_000).with_cushion(128));
        let tap = graph.add(tap);
        graph.connect(&source, &tap);
        graph.set_terminal(&tap);
        for _ in 0..128 {
            tx.push(0.1).unwrap();
        }

        let mut run = |level: f32, blocks: usize| {
            for _ in 0..blocks {
                for _ in 0..Buffer::LEN {
                    tx.push(level).unwrap();
                }
                graph.process();
            }
        };
        run(0.1, 200);
        run(0.9, 50);

        let mut time = vec![0u8; FFT_SIZE];
        analyser.time_domain_into(&mut time);
        assert_eq!(time[FFT_SIZE - 1], 243);
        assert_eq!(time[0], 243);
    }

    #[test]
    fn blocks_written_during_a_read_arrive_with_the_next_block() {
        let (mut tap, mut analyser) = default_tap();
        {
            let _reading = analyser.shared.lock();
            tap.publish(&[0.9; 64]);
        }
        tap.publish(&[0.5; 64]);

        let mut time = vec![0u8; FFT_SIZE];
        analyser.time_domain_into(&mut time);
        assert!(time[FFT_SIZE - 128..FFT_SIZE - 64].iter().all(|s| *s == sample_to_byte(0.9)));
        assert!(time[FFT_SIZE - 64..].iter().all(|s| *s == sample_to_byte(0.5)));
        assert_eq!(time[0], SILENT_SAMPLE);
    }

    #[test]
    fn detached_sampler_returns_flat_reading() {
        let sampler = AnalysisSampler::new();
        assert_eq!(sampler.sample_time_domain(), vec![128; FFT_SIZE]);
        assert_eq!(sampler.sample_frequency(), vec![0; FREQUENCY_BIN_COUNT]);

        sampler.attach(feed(core::iter::repeat(0.75).take(FFT_SIZE)));
        assert!(sampler.is_attached());
        assert!(!sampler.snapshot().is_silent());

        sampler.detach();
        assert!(sampler.snapshot().is_silent());
    }
}
