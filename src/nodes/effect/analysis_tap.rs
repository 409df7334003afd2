//! Non-destructive observation point for the analysis sampler

use std::sync::Arc;

use dasp_graph::{Buffer, Input};
use dasp_ring_buffer::Fixed;
use parking_lot::Mutex;

use crate::node::{AudioNode, ProcessContext};

/// The most recent samples seen by a tap, oldest first.
pub(crate) type SharedWindow = Arc<Mutex<Fixed<Vec<f32>>>>;

/// Passes audio through unchanged while publishing it to the analysis side.
///
/// The tap keeps its own copy of the latest window and publishes into the
/// window shared with [`Analyser`](crate::analysis::Analyser) whenever the
/// lock is free. A contended block is published with the next one, so the
/// reader always sees the newest audio no matter how rarely it reads. The
/// monitored signal is never affected.
pub struct AnalysisTap {
    local: Fixed<Vec<f32>>,
    /// Samples in `local` not yet published.
    pending: usize,
    shared: SharedWindow,
}

impl AnalysisTap {
    pub(crate) fn new(shared: SharedWindow, len: usize) -> Self {
        Self {
            local: Fixed::from(vec![0.0; len.max(1)]),
            pending: 0,
            shared,
        }
    }

    pub(crate) fn publish(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.local.push(sample);
        }
        let len = self.local.len();
        self.pending = (self.pending + samples.len()).min(len);

        // never block the audio thread on a reader
        let Some(mut shared) = self.shared.try_lock() else { return };
        for &sample in self.local.iter().skip(len - self.pending) {
            shared.push(sample);
        }
        self.pending = 0;
    }
}

impl AudioNode for AnalysisTap {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        let in_buffers = match inputs.first() {
            Some(input) if !input.buffers().is_empty() => input.buffers(),
            _ => {
                for buffer in outputs.iter_mut() {
                    buffer.silence();
                }
                return;
            }
        };

        for (ch, out_buffer) in outputs.iter_mut().enumerate() {
            out_buffer.copy_from_slice(&in_buffers[ch.min(in_buffers.len() - 1)]);
        }

        // analysis looks at the first channel only
        self.publish(&in_buffers[0]);
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 1 }
}
