//! Core node trait and context types.

use dasp_graph::{Buffer, Input};

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz, i.e. the output device rate
    pub sample_rate: u32,
    /// Number of samples per buffer (always [`Buffer::LEN`])
    pub buffer_size: usize,
}

/// Unique identifier for a node within a graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// A processing stage of the monitoring graph.
///
/// Nodes come in three flavours:
/// - **Sources** produce audio (0 inputs), e.g. the microphone feed
/// - **Effects** transform audio, e.g. gain or the analysis tap
/// - **Sinks** consume audio (0 outputs), e.g. the device output
///
/// # Message-Based Parameters
///
/// The graph runs on the audio device's callback thread, so nodes never share
/// mutable state with the control side. Parameter changes arrive as messages
/// that are drained at the start of every block:
///
/// ```
/// use sidetone::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum MuteMessage {
///     SetMuted(bool),
/// }
///
/// struct Mute {
///     muted: bool,
/// }
///
/// impl AudioNode for Mute {
///     type Message = MuteMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = MuteMessage>,
///         inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for msg in messages {
///             match msg {
///                 MuteMessage::SetMuted(m) => self.muted = m,
///             }
///         }
///
///         let Some(input) = inputs.first() else { return };
///         for (out, inp) in outputs.iter_mut().zip(input.buffers()) {
///             for (o, i) in out.iter_mut().zip(inp.iter()) {
///                 *o = if self.muted { 0.0 } else { *i };
///             }
///         }
///     }
///
///     fn num_inputs(&self) -> usize { 1 }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates, `()` if the node has none.
    type Message: Send + 'static;

    /// Process one block of audio.
    ///
    /// 1. Drain and handle all pending messages
    /// 2. Read from `inputs` (if any)
    /// 3. Write to `outputs`
    ///
    /// Runs on the real-time thread: no locks, no allocation, no logging.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio input channels (0 for sources).
    fn num_inputs(&self) -> usize { 0 }

    /// Number of audio output channels (0 for sinks).
    fn num_outputs(&self) -> usize { 1 }
}
