//! Monitoring gain with a click-free ramp

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};
use crate::settings::clamp_gain;

/// Messages to control gain
#[derive(Clone, Copy, Debug)]
pub enum GainMessage {
    /// Ramp toward a new gain multiplier (clamped to `[0, 2]`)
    SetGain(f32),
}

/// Linear amplitude multiplier applied to the monitored signal.
///
/// Target changes are approached exponentially with a fixed time constant,
/// the same curve as Web Audio's `setTargetAtTime`, so a step on the control
/// side never reaches the speakers as a step.
pub struct Gain {
    gain: f32,
    smoothed_gain: f32,
    /// Per-sample smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
}

impl Gain {
    /// Create a new gain node starting at `gain` (no ramp on the first block)
    pub fn new(gain: f32) -> Self {
        let gain = clamp_gain(gain);
        Self {
            gain,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~4ms at 48kHz
        }
    }

    /// Set the ramp time constant in seconds
    pub fn with_ramp(mut self, seconds: f32, sample_rate: u32) -> Self {
        // After `seconds`, ~63% of the distance to the target is covered
        let samples = seconds * sample_rate as f32;
        self.smooth_coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    /// Target gain
    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioNode for Gain {
    type Message = GainMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = GainMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                GainMessage::SetGain(g) => self.gain = clamp_gain(g),
            }
        }

        let in_buffers = match inputs.first() {
            Some(input) if !input.buffers().is_empty() => input.buffers(),
            _ => {
                for buffer in outputs.iter_mut() {
                    buffer.silence();
                }
                return;
            }
        };

        let smooth_coeff = self.smooth_coeff;
        let target_gain = self.gain;
        let start_gain = self.smoothed_gain;
        let mut end_gain = start_gain;

        for (ch, out_buffer) in outputs.iter_mut().enumerate() {
            let in_buffer = &in_buffers[ch.min(in_buffers.len() - 1)];

            // every channel walks the same ramp
            let mut gain = start_gain;
            for (out_sample, &in_sample) in out_buffer.iter_mut().zip(in_buffer.iter()) {
                gain = target_gain + smooth_coeff * (gain - target_gain);
                *out_sample = in_sample * gain;
            }
            end_gain = gain;
        }

        self.smoothed_gain = end_gain;
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AudioGraph;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Ones;

    impl AudioNode for Ones {
        type Message = ();

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            _messages: impl Iterator<Item = ()>,
            _inputs: &[Input],
            outputs: &mut [Buffer],
        ) {
            for buffer in outputs.iter_mut() {
                buffer.iter_mut().for_each(|s| *s = 1.0);
            }
        }
    }

    /// Remembers the first and last sample of the latest block.
    struct Recorder {
        first: Arc<AtomicU32>,
        last: Arc<AtomicU32>,
    }

    impl AudioNode for Recorder {
        type Message = ();

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            _messages: impl Iterator<Item = ()>,
            inputs: &[Input],
            _outputs: &mut [Buffer],
        ) {
            if let Some(buffer) = inputs.first().and_then(|i| i.buffers().first()) {
                self.first.store(buffer[0].to_bits(), Ordering::Relaxed);
                self.last.store(buffer[Buffer::LEN - 1].to_bits(), Ordering::Relaxed);
            }
        }

        fn num_inputs(&self) -> usize { 1 }

        fn num_outputs(&self) -> usize { 0 }
    }

    fn read(cell: &AtomicU32) -> f32 {
        f32::from_bits(cell.load(Ordering::Relaxed))
    }

    #[test]
    fn constructor_clamps() {
        assert_eq!(Gain::new(3.0).gain(), 2.0);
        assert_eq!(Gain::new(-1.0).gain(), 0.0);
    }

    #[test]
    fn ramp_follows_time_constant_and_clamps() {
        let sample_rate = 48_000;
        let first = Arc::new(AtomicU32::new(0));
        let last = Arc::new(AtomicU32::new(0));

        let mut graph = AudioGraph::new(sample_rate);
        let ones = graph.add(Ones);
        let mut gain = graph.add(Gain::new(0.0).with_ramp(0.1, sample_rate));
        let recorder = graph.add(Recorder { first: first.clone(), last: last.clone() });
        graph.connect(&ones, &gain);
        graph.connect(&gain, &recorder);
        graph.set_terminal(&recorder);

        gain.send(GainMessage::SetGain(1.0)).unwrap();
        graph.process();
        // no step: the first sample after the change barely moves
        assert!(read(&first) < 0.01);

        // one time constant = 4800 samples = 75 blocks
        for _ in 1..75 {
            graph.process();
        }
        assert!((read(&last) - 0.632).abs() < 0.01, "gain after 100ms = {}", read(&last));

        gain.send(GainMessage::SetGain(5.0)).unwrap();
        for _ in 0..1500 {
            graph.process();
        }
        assert!((read(&last) - 2.0).abs() < 1e-3);
    }

    #[test]
    fn without_input_outputs_silence() {
        let mut gain = Gain::new(1.5).without_smoothing();
        let mut out = [Buffer::default()];
        out[0].iter_mut().for_each(|s| *s = 1.0);
        gain.process(
            &ProcessContext { sample_rate: 48_000, buffer_size: Buffer::LEN },
            core::iter::empty(),
            &[],
            &mut out,
        );
        assert!(out[0].iter().all(|s| *s == 0.0));
    }
}
