//! Headless platform: a test tone for a microphone and a clocked pump for a
//! speaker.
//!
//! Counts every resource it hands out, which makes leaks observable, and can
//! be told to fail or to hold acquisition until permission is granted.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use dasp_signal::Signal;
use parking_lot::Mutex;
use rtrb::Consumer;
use tracing::{debug, trace};

use super::{AudioPlatform, OutputContext};
use crate::capture::{feed_ring, CaptureConstraints, CaptureProcessor, CaptureStream};
use crate::error::{MonitorError, Result};
use crate::settings::LatencyHint;
use crate::signal_graph::GraphRunner;

/// Failure a [`SyntheticPlatform`] can be told to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticFailure {
    /// `acquire` reports [`MonitorError::PermissionDenied`].
    Permission,
    /// `acquire` reports [`MonitorError::DeviceUnavailable`].
    Device,
    /// `acquire` reports [`MonitorError::Constraint`].
    Constraint,
    /// `open_output` reports [`MonitorError::GraphConstruction`].
    Output,
}

/// Shape of the synthetic devices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub output_channels: usize,
    pub tone_hz: f64,
    pub amplitude: f64,
    /// How often the generator and the output pump wake up.
    pub period: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 48_000,
            output_sample_rate: 48_000,
            output_channels: 2,
            tone_hz: 440.0,
            amplitude: 0.5,
            period: Duration::from_millis(5),
        }
    }
}

#[derive(Default)]
struct Counters {
    live_outputs: AtomicUsize,
    live_inputs: AtomicUsize,
    outputs_opened: AtomicUsize,
    acquisitions: AtomicUsize,
    /// f32 bits of the loudest sample in the last output block
    output_peak: AtomicU32,
}

struct Shared {
    config: SyntheticConfig,
    failure: Mutex<Option<SyntheticFailure>>,
    last_latency: Mutex<Option<LatencyHint>>,
    gate: Option<Receiver<bool>>,
    counters: Counters,
}

/// In-process [`AudioPlatform`] with no hardware behind it.
///
/// Clones share counters and configuration, so a test can keep one while
/// the monitor owns another.
#[derive(Clone)]
pub struct SyntheticPlatform {
    shared: Arc<Shared>,
}

/// Decides pending acquisitions of a gated [`SyntheticPlatform`].
///
/// Each `grant` or `deny` answers one acquisition. Dropping the gate denies
/// everything still waiting.
pub struct PermissionGate {
    answers: Sender<bool>,
}

impl PermissionGate {
    pub fn grant(&self) {
        let _ = self.answers.send(true);
    }

    pub fn deny(&self) {
        let _ = self.answers.send(false);
    }
}

impl Default for SyntheticPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticPlatform {
    pub fn new() -> Self {
        Self::with_config(SyntheticConfig::default())
    }

    pub fn with_config(config: SyntheticConfig) -> Self {
        Self::build(config, None)
    }

    /// A platform whose acquisitions wait for a [`PermissionGate`] answer.
    pub fn with_permission_gate() -> (Self, PermissionGate) {
        let (answers, gate) = unbounded();
        (Self::build(SyntheticConfig::default(), Some(gate)), PermissionGate { answers })
    }

    fn build(config: SyntheticConfig, gate: Option<Receiver<bool>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                failure: Mutex::new(None),
                last_latency: Mutex::new(None),
                gate,
                counters: Counters::default(),
            }),
        }
    }

    /// Fail every following call of the affected kind.
    pub fn failing(self, failure: SyntheticFailure) -> Self {
        self.set_failure(Some(failure));
        self
    }

    pub fn set_failure(&self, failure: Option<SyntheticFailure>) {
        *self.shared.failure.lock() = failure;
    }

    pub fn config(&self) -> SyntheticConfig {
        self.shared.config
    }

    pub fn live_outputs(&self) -> usize {
        self.shared.counters.live_outputs.load(Ordering::SeqCst)
    }

    pub fn live_inputs(&self) -> usize {
        self.shared.counters.live_inputs.load(Ordering::SeqCst)
    }

    /// Open outputs plus live microphone streams.
    pub fn live_resources(&self) -> usize {
        self.live_outputs() + self.live_inputs()
    }

    pub fn outputs_opened(&self) -> usize {
        self.shared.counters.outputs_opened.load(Ordering::SeqCst)
    }

    /// Successful microphone acquisitions so far.
    pub fn acquisitions(&self) -> usize {
        self.shared.counters.acquisitions.load(Ordering::SeqCst)
    }

    /// Loudest sample of the most recent output block.
    pub fn output_peak(&self) -> f32 {
        f32::from_bits(self.shared.counters.output_peak.load(Ordering::Relaxed))
    }

    /// Latency class of the most recent `open_output` request.
    pub fn requested_latency(&self) -> Option<LatencyHint> {
        *self.shared.last_latency.lock()
    }

    fn failure(&self) -> Option<SyntheticFailure> {
        *self.shared.failure.lock()
    }
}

impl AudioPlatform for SyntheticPlatform {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open_output(&self, latency: LatencyHint) -> Result<Box<dyn OutputContext>> {
        let counters = &self.shared.counters;
        counters.outputs_opened.fetch_add(1, Ordering::SeqCst);
        *self.shared.last_latency.lock() = Some(latency);
        if self.failure() == Some(SyntheticFailure::Output) {
            return Err(MonitorError::graph("synthetic output refused to open"));
        }

        counters.live_outputs.fetch_add(1, Ordering::SeqCst);
        debug!(%latency, "synthetic output opened");
        Ok(Box::new(SyntheticOutput {
            shared: self.shared.clone(),
            pump: None,
            open: true,
        }))
    }

    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
        if let Some(gate) = &self.shared.gate {
            trace!("waiting for microphone permission");
            if !gate.recv().unwrap_or(false) {
                return Err(MonitorError::PermissionDenied("permission request dismissed".into()));
            }
        }

        match self.failure() {
            Some(SyntheticFailure::Permission) => {
                return Err(MonitorError::PermissionDenied("synthetic permission denied".into()))
            }
            Some(SyntheticFailure::Device) => {
                return Err(MonitorError::DeviceUnavailable("no synthetic input device".into()))
            }
            Some(SyntheticFailure::Constraint) => {
                return Err(MonitorError::Constraint("synthetic device rejects constraints".into()))
            }
            _ => {}
        }

        let config = self.shared.config;
        let (mut producer, feed) = feed_ring(config.input_sample_rate);
        let mut processor = CaptureProcessor::new(constraints, config.input_sample_rate);

        let (stop, stopped) = bounded::<()>(0);
        let frames = (config.input_sample_rate as f64 * config.period.as_secs_f64()).ceil() as usize;
        let generator = std::thread::Builder::new()
            .name("sidetone-synthetic-mic".into())
            .spawn(move || {
                let mut tone = dasp_signal::rate(config.input_sample_rate as f64)
                    .const_hz(config.tone_hz)
                    .sine()
                    .scale_amp(config.amplitude);
                let mut block = vec![0.0f32; frames];
                let ticker = tick(config.period);
                loop {
                    select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            for sample in block.iter_mut() {
                                *sample = tone.next() as f32;
                            }
                            processor.push(&block, 1, &mut producer);
                        }
                    }
                }
            })
            .map_err(|err| MonitorError::DeviceUnavailable(format!("cannot start synthetic input: {err}")))?;

        let counters = &self.shared.counters;
        counters.live_inputs.fetch_add(1, Ordering::SeqCst);
        counters.acquisitions.fetch_add(1, Ordering::SeqCst);
        debug!(sample_rate = config.input_sample_rate, "synthetic microphone acquired");

        Ok(Box::new(SyntheticCapture {
            shared: self.shared.clone(),
            sample_rate: config.input_sample_rate,
            feed: Some(feed),
            generator: Some((stop, generator)),
        }))
    }
}

struct SyntheticCapture {
    shared: Arc<Shared>,
    sample_rate: u32,
    feed: Option<Consumer<f32>>,
    generator: Option<(Sender<()>, JoinHandle<()>)>,
}

impl CaptureStream for SyntheticCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_feed(&mut self) -> Option<Consumer<f32>> {
        self.feed.take()
    }

    fn stop_tracks(&mut self) {
        if let Some((stop, generator)) = self.generator.take() {
            drop(stop);
            let _ = generator.join();
            self.shared.counters.live_inputs.fetch_sub(1, Ordering::SeqCst);
            debug!("synthetic microphone stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.generator.is_some()
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

struct SyntheticOutput {
    shared: Arc<Shared>,
    pump: Option<(Sender<()>, JoinHandle<()>)>,
    open: bool,
}

impl OutputContext for SyntheticOutput {
    fn sample_rate(&self) -> u32 {
        self.shared.config.output_sample_rate
    }

    fn channels(&self) -> usize {
        self.shared.config.output_channels.max(1)
    }

    fn start(&mut self, mut runner: GraphRunner) -> Result<()> {
        if !self.open {
            return Err(MonitorError::graph("synthetic output is closed"));
        }

        let config = self.shared.config;
        let shared = self.shared.clone();
        let channels = self.channels();
        let frames = (config.output_sample_rate as f64 * config.period.as_secs_f64()).ceil() as usize;

        let (stop, stopped) = bounded::<()>(0);
        let pump = std::thread::Builder::new()
            .name("sidetone-synthetic-out".into())
            .spawn(move || {
                let mut block = vec![0.0f32; frames * channels];
                let ticker = tick(config.period);
                loop {
                    select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            runner.fill(&mut block);
                            let peak = block.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
                            shared.counters.output_peak.store(peak.to_bits(), Ordering::Relaxed);
                        }
                    }
                }
            })
            .map_err(|err| MonitorError::graph(format!("cannot start synthetic output: {err}")))?;

        self.pump = Some((stop, pump));
        Ok(())
    }

    fn close(&mut self) {
        if let Some((stop, pump)) = self.pump.take() {
            drop(stop);
            let _ = pump.join();
        }
        if self.open {
            self.open = false;
            self.shared.counters.output_peak.store(0, Ordering::Relaxed);
            self.shared.counters.live_outputs.fetch_sub(1, Ordering::SeqCst);
            debug!("synthetic output closed");
        }
    }
}

impl Drop for SyntheticOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_resources_until_released() {
        let platform = SyntheticPlatform::new();
        assert_eq!(platform.requested_latency(), None);
        let mut output = platform.open_output(LatencyHint::Interactive).unwrap();
        assert_eq!(platform.requested_latency(), Some(LatencyHint::Interactive));
        let mut capture = platform.acquire(&CaptureConstraints::default()).unwrap();
        assert_eq!(platform.live_resources(), 2);
        assert!(capture.take_feed().is_some());
        assert!(capture.take_feed().is_none());

        capture.stop_tracks();
        capture.stop_tracks();
        assert!(!capture.is_live());
        output.close();
        output.close();
        assert_eq!(platform.live_resources(), 0);
        assert_eq!(platform.acquisitions(), 1);
    }

    #[test]
    fn injected_failures_map_to_error_kinds() {
        let platform = SyntheticPlatform::new().failing(SyntheticFailure::Constraint);
        let err = platform.acquire(&CaptureConstraints::default()).err();
        assert!(matches!(err, Some(MonitorError::Constraint(_))));

        platform.set_failure(Some(SyntheticFailure::Output));
        let err = platform.open_output(LatencyHint::Balanced).err();
        assert!(matches!(err, Some(MonitorError::GraphConstruction(_))));
        assert_eq!(platform.requested_latency(), Some(LatencyHint::Balanced));
        assert_eq!(platform.live_resources(), 0);
    }

    #[test]
    fn permission_gate_answers_one_request_each() {
        let (platform, gate) = SyntheticPlatform::with_permission_gate();
        gate.deny();
        gate.grant();
        let denied = platform.acquire(&CaptureConstraints::default()).err();
        assert!(matches!(denied, Some(MonitorError::PermissionDenied(_))));
        assert!(platform.acquire(&CaptureConstraints::default()).is_ok());

        drop(gate);
        let dismissed = platform.acquire(&CaptureConstraints::default()).err();
        assert!(matches!(dismissed, Some(MonitorError::PermissionDenied(_))));
    }

    #[test]
    fn microphone_produces_the_tone() {
        let platform = SyntheticPlatform::new();
        let mut capture = platform.acquire(&CaptureConstraints::default()).unwrap();
        let mut feed = capture.take_feed().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut peak = 0.0f32;
        while let Ok(sample) = feed.pop() {
            peak = peak.max(sample.abs());
        }
        assert!(peak > 0.4 && peak <= 0.5 + 1e-3, "peak {peak}");
    }
}
