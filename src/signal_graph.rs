//! Lifecycle of the monitoring graph.
//!
//! ```text
//! capture feed -> CaptureSource -> Gain -> AnalysisTap -> OutputSink -> output device
//! ```
//!
//! Device handles are not `Send`, so each [`SignalGraph`] owns an audio host
//! thread that opens the output, acquires the microphone, wires the graph and
//! then parks until the graph is stopped. Only the gain handle and the
//! analyser come back to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use dasp_graph::Buffer;
use dasp_sample::{FromSample, Sample};
use rtrb::{Consumer, RingBuffer};
use tracing::{debug, info, warn};

use crate::analysis::{self, Analyser};
use crate::capture::{CaptureConstraints, CaptureStream};
use crate::error::{MonitorError, Result};
use crate::graph::{AudioGraph, NodeHandle};
use crate::nodes::{CaptureSource, Gain, GainMessage, OutputSink};
use crate::platform::{AudioPlatform, OutputContext};
use crate::settings::{clamp_gain, Settings, GAIN_RAMP_SECONDS};

/// Rendered blocks buffered between the graph and the device callback.
const RENDER_AHEAD_BLOCKS: usize = 4;

/// Drives an [`AudioGraph`] from an output device callback.
///
/// Each call to [`fill`](GraphRunner::fill) processes as many 64-frame blocks
/// as needed to cover the device buffer. Dropping the runner tears the graph
/// down.
pub struct GraphRunner {
    graph: AudioGraph,
    rendered: Consumer<f32>,
}

impl GraphRunner {
    pub(crate) fn new(graph: AudioGraph, rendered: Consumer<f32>) -> Self {
        Self { graph, rendered }
    }

    /// Fill an interleaved device buffer; anything the graph cannot provide
    /// is written as silence.
    pub fn fill<T>(&mut self, out: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let mut written = 0;
        while written < out.len() {
            if self.rendered.is_empty() {
                self.graph.process();
                if self.rendered.is_empty() {
                    break;
                }
            }
            while written < out.len() {
                match self.rendered.pop() {
                    Ok(sample) => {
                        out[written] = sample.to_sample::<T>();
                        written += 1;
                    }
                    Err(_) => break,
                }
            }
        }
        for sample in &mut out[written..] {
            *sample = T::EQUILIBRIUM;
        }
    }
}

impl Drop for GraphRunner {
    fn drop(&mut self) {
        let removed = self.graph.teardown();
        debug!(connections = removed, "graph disconnected");
    }
}

/// Platform resources of a running graph, released in acquisition order's
/// reverse: microphone tracks first, then the output.
struct LiveResources {
    capture: Box<dyn CaptureStream>,
    output: Box<dyn OutputContext>,
}

impl LiveResources {
    fn release(&mut self) {
        self.capture.stop_tracks();
        self.output.close();
    }
}

impl Drop for LiveResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// What the host thread hands back once audio is flowing.
struct Ready {
    gain: NodeHandle<GainMessage>,
    analyser: Analyser,
    sample_rate: u32,
    overruns: Arc<AtomicU64>,
}

/// A running monitoring graph.
///
/// Stopping (or dropping) it stops the microphone, disconnects every node
/// and closes the output before returning.
pub struct SignalGraph {
    gain_handle: NodeHandle<GainMessage>,
    gain: f32,
    sample_rate: u32,
    overruns: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    host: Option<JoinHandle<()>>,
}

impl SignalGraph {
    /// Build and start a graph for `settings`.
    ///
    /// Blocks until the output runs or construction fails. On failure every
    /// resource acquired so far has already been released.
    pub fn start(platform: Arc<dyn AudioPlatform>, settings: &Settings) -> Result<(SignalGraph, Analyser)> {
        let settings = settings.clamped();
        let (ready_tx, ready_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let host = std::thread::Builder::new()
            .name("sidetone-audio".into())
            .spawn(move || host_thread(platform, settings, ready_tx, shutdown_rx))
            .map_err(|err| MonitorError::graph(format!("cannot spawn audio thread: {err}")))?;

        let ready = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(err)) => {
                let _ = host.join();
                return Err(err);
            }
            Err(_) => {
                let _ = host.join();
                return Err(MonitorError::graph("audio thread exited during construction"));
            }
        };

        info!(sample_rate = ready.sample_rate, gain = settings.gain, latency = %settings.latency_hint, "monitoring graph running");

        let graph = SignalGraph {
            gain_handle: ready.gain,
            gain: settings.gain,
            sample_rate: ready.sample_rate,
            overruns: ready.overruns,
            shutdown: Some(shutdown_tx),
            host: Some(host),
        };
        Ok((graph, ready.analyser))
    }

    /// Ramp toward `value` (clamped to `[0, 2]`). Returns the applied value.
    ///
    /// On a stopped graph the value is only recorded.
    pub fn set_gain(&mut self, value: f32) -> f32 {
        let gain = clamp_gain(value);
        self.gain = gain;
        if self.is_running() && self.gain_handle.send(GainMessage::SetGain(gain)).is_err() {
            warn!(gain, "gain queue full, change dropped");
        }
        gain
    }

    /// Target gain (the ramp may still be converging).
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output blocks dropped because the device fell behind.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.host.is_some()
    }

    /// Stop the graph and wait for its resources to be released. Idempotent.
    pub fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(host) = self.host.take() {
            if host.join().is_err() {
                warn!("audio thread panicked during shutdown");
            }
            info!(overruns = self.overruns(), "monitoring graph stopped");
        }
    }
}

impl Drop for SignalGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

impl core::fmt::Debug for SignalGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SignalGraph")
            .field("gain", &self.gain)
            .field("sample_rate", &self.sample_rate)
            .field("running", &self.is_running())
            .finish()
    }
}

fn host_thread(
    platform: Arc<dyn AudioPlatform>,
    settings: Settings,
    ready: Sender<Result<Ready>>,
    shutdown: Receiver<()>,
) {
    let live = match build(platform.as_ref(), &settings) {
        Ok((live, r)) => {
            if ready.send(Ok(r)).is_err() {
                return;
            }
            live
        }
        Err(err) => {
            warn!(platform = platform.name(), error = %err, "graph construction failed");
            let _ = ready.send(Err(err));
            return;
        }
    };

    // parked until the graph is stopped (sender dropped)
    let _ = shutdown.recv();
    drop(live);
}

fn build(platform: &dyn AudioPlatform, settings: &Settings) -> Result<(LiveResources, Ready)> {
    let mut output = platform.open_output(settings.latency_hint)?;

    let constraints = CaptureConstraints::from(settings);
    let capture = match platform.acquire(&constraints) {
        Ok(capture) => capture,
        Err(err) => {
            output.close();
            return Err(err);
        }
    };
    let mut live = LiveResources { capture, output };

    let feed = live
        .capture
        .take_feed()
        .ok_or_else(|| MonitorError::graph("capture stream has no sample feed"))?;

    let sample_rate = live.output.sample_rate();
    let channels = live.output.channels().max(1);

    let mut graph = AudioGraph::new(sample_rate);
    let source = graph.add(
        CaptureSource::new(feed, live.capture.sample_rate()).with_cushion(constraints.cushion_frames()),
    );
    let gain = graph.add(Gain::new(settings.gain).with_ramp(GAIN_RAMP_SECONDS, sample_rate));
    let (tap, analyser) = analysis::default_tap();
    let tap = graph.add(tap);
    let (producer, rendered) = RingBuffer::new(Buffer::LEN * channels * RENDER_AHEAD_BLOCKS);
    let sink = OutputSink::new(producer, channels);
    let overruns = sink.overruns();
    let sink = graph.add(sink);

    graph.connect(&source, &gain);
    graph.connect(&gain, &tap);
    graph.connect(&tap, &sink);
    graph.set_terminal(&sink);

    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        input_rate = live.capture.sample_rate(),
        output_rate = sample_rate,
        channels,
        "graph wired"
    );

    live.output.start(GraphRunner::new(graph, rendered))?;

    Ok((live, Ready { gain, analyser, sample_rate, overruns }))
}
