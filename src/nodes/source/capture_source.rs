//! Microphone source node
//!
//! Consumes the mono capture feed from a ring buffer at the input device's
//! sample rate and outputs at the graph's (output device's) sample rate.

use dasp_graph::{Buffer, Input};
use rtrb::Consumer;

use crate::node::{AudioNode, ProcessContext};

/// A source that reads captured audio and resamples it to the graph's rate
///
/// Uses linear interpolation. Input and output devices run on independent
/// clocks, so the source keeps a small cushion of captured samples before it
/// starts reading and discards backlog that grows past `max_backlog`; the
/// monitoring delay therefore stays bounded no matter how the clocks drift.
pub struct CaptureSource {
    consumer: Consumer<f32>,
    input_sample_rate: u32,

    /// Fractional position between `prev` and `curr`
    position: f64,
    prev: f32,
    curr: f32,

    /// Samples required in the feed before reading starts (or restarts)
    cushion: usize,
    max_backlog: usize,

    primed: bool,
}

impl CaptureSource {
    /// - `consumer`: ring buffer consumer with mono samples at `input_sample_rate`
    pub fn new(consumer: Consumer<f32>, input_sample_rate: u32) -> Self {
        Self {
            consumer,
            input_sample_rate: input_sample_rate.max(1),
            position: 0.0,
            prev: 0.0,
            curr: 0.0,
            cushion: Buffer::LEN * 2,
            max_backlog: Buffer::LEN * 16,
            primed: false,
        }
    }

    /// Set the priming cushion; backlog beyond `4 * cushion` is dropped.
    pub fn with_cushion(mut self, cushion: usize) -> Self {
        self.cushion = cushion.max(2);
        self.max_backlog = self.cushion * 4;
        self
    }

    #[inline]
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    fn skip_backlog(&mut self) {
        let available = self.consumer.slots();
        if available > self.max_backlog {
            let excess = available - self.cushion;
            if let Ok(chunk) = self.consumer.read_chunk(excess) {
                chunk.commit_all();
            }
        }
    }

    fn read_sample(&mut self) -> bool {
        match self.consumer.pop() {
            Ok(sample) => {
                self.prev = self.curr;
                self.curr = sample;
                true
            }
            Err(_) => false, // underrun
        }
    }
}

impl AudioNode for CaptureSource {
    type Message = ();

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if outputs.is_empty() {
            return;
        }

        if !self.primed {
            if self.consumer.slots() < self.cushion {
                for buffer in outputs.iter_mut() {
                    buffer.silence();
                }
                return;
            }
            self.read_sample();
            self.read_sample();
            self.position = 0.0;
            self.primed = true;
        }

        self.skip_backlog();

        let rate_ratio = self.input_sample_rate as f64 / ctx.sample_rate.max(1) as f64;
        let buffer_len = outputs[0].len();

        for i in 0..buffer_len {
            while self.position >= 1.0 {
                self.position -= 1.0;
                if !self.read_sample() {
                    // Underrun - silence for the rest of the block, then re-prime
                    for buffer in outputs.iter_mut() {
                        buffer[i..].iter_mut().for_each(|s| *s = 0.0);
                    }
                    self.primed = false;
                    return;
                }
            }

            let t = self.position as f32;
            let value = self.prev + t * (self.curr - self.prev);
            for buffer in outputs.iter_mut() {
                buffer[i] = value;
            }

            self.position += rate_ratio;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 0 }

    #[inline]
    fn num_outputs(&self) -> usize { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    fn ctx(sample_rate: u32) -> ProcessContext {
        ProcessContext { sample_rate, buffer_size: Buffer::LEN }
    }

    fn run(source: &mut CaptureSource, sample_rate: u32) -> Buffer {
        let mut out = [Buffer::SILENT];
        source.process(&ctx(sample_rate), core::iter::empty(), &[], &mut out);
        out[0].clone()
    }

    #[test]
    fn stays_silent_until_cushion_is_filled() {
        let (mut tx, rx) = RingBuffer::new(1024);
        let mut source = CaptureSource::new(rx, 48_000).with_cushion(128);
        for _ in 0..100 {
            tx.push(0.5).unwrap();
        }
        let out = run(&mut source, 48_000);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(!source.is_primed());

        for _ in 0..100 {
            tx.push(0.5).unwrap();
        }
        let out = run(&mut source, 48_000);
        assert!(source.is_primed());
        assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn consumes_input_at_rate_ratio() {
        let (mut tx, rx) = RingBuffer::new(4096);
        let mut source = CaptureSource::new(rx, 96_000).with_cushion(2);
        for i in 0..1024 {
            tx.push(i as f32).unwrap();
        }
        run(&mut source, 48_000);
        // two input samples per output sample, plus the two priming reads
        let consumed = tx.slots() - (tx.buffer().capacity() - 1024);
        assert!((consumed as i64 - (Buffer::LEN as i64 * 2 + 2)).abs() <= 2, "consumed {consumed}");
    }

    #[test]
    fn drops_backlog_beyond_bound() {
        let (mut tx, rx) = RingBuffer::new(8192);
        let mut source = CaptureSource::new(rx, 48_000).with_cushion(256);
        for _ in 0..4000 {
            tx.push(0.25).unwrap();
        }
        run(&mut source, 48_000);
        let remaining = tx.buffer().capacity() - tx.slots();
        assert!(remaining <= 256, "remaining backlog {remaining}");
    }
}
