//! Terminal node handing rendered audio to the output device

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{AudioNode, ProcessContext};

/// Interleaves the monitored signal into the ring the device callback drains
/// (see [`GraphRunner`](crate::signal_graph::GraphRunner)).
///
/// Mono input is duplicated onto every device channel. A block that does not
/// fit is dropped whole and counted as an overrun, so frames never tear.
pub struct OutputSink {
    producer: Producer<f32>,
    channels: usize,
    overruns: Arc<AtomicU64>,
}

impl OutputSink {
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
            overruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of dropped blocks, readable after the sink moves into a graph.
    pub fn overruns(&self) -> Arc<AtomicU64> {
        self.overruns.clone()
    }
}

impl AudioNode for OutputSink {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        let Some(input) = inputs.first() else { return };
        let buffers = input.buffers();
        if buffers.is_empty() {
            return;
        }

        let frames = buffers[0].len();
        let Ok(mut chunk) = self.producer.write_chunk(frames * self.channels) else {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let (head, tail) = chunk.as_mut_slices();
        let mut slots = head.iter_mut().chain(tail.iter_mut());
        for i in 0..frames {
            for ch in 0..self.channels {
                if let Some(slot) = slots.next() {
                    *slot = buffers[ch.min(buffers.len() - 1)][i];
                }
            }
        }
        chunk.commit_all();
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AudioGraph;
    use crate::nodes::CaptureSource;
    use rtrb::RingBuffer;

    #[test]
    fn full_ring_drops_whole_blocks_and_counts_them() {
        let (mut feed, rx) = RingBuffer::new(1024);
        for i in 0..512 {
            feed.push(i as f32 / 1024.0).unwrap();
        }
        let (producer, mut rendered) = RingBuffer::new(Buffer::LEN * 2);
        let sink = OutputSink::new(producer, 2);
        let overruns = sink.overruns();

        let mut graph = AudioGraph::new(48_000);
        let source = graph.add(CaptureSource::new(rx, 48_000));
        let sink = graph.add(sink);
        graph.connect(&source, &sink);
        graph.set_terminal(&sink);

        graph.process();
        assert_eq!(rendered.slots(), Buffer::LEN * 2);
        assert_eq!(overruns.load(Ordering::Relaxed), 0);

        graph.process();
        assert_eq!(rendered.slots(), Buffer::LEN * 2);
        assert_eq!(overruns.load(Ordering::Relaxed), 1);

        // channels carry the same mono sample, frame by frame
        let left = rendered.pop().unwrap();
        let right = rendered.pop().unwrap();
        assert_eq!(left, right);
    }
}
