//! Nodes of the monitoring graph.
//!
//! The monitoring chain is always
//! `CaptureSource -> Gain -> AnalysisTap -> OutputSink`:
//!
//! ## Sources ([`source`])
//! - [`CaptureSource`] - microphone feed, resampled to the output rate
//!
//! ## Effects ([`effect`])
//! - [`Gain`] - monitoring volume with a 100 ms ramp ([`GainMessage`])
//! - [`AnalysisTap`] - copies the post-gain signal to the analysis sampler
//!
//! ## Sinks ([`sink`])
//! - [`OutputSink`] - interleaves into the ring drained by the output device
//!
//! Gain sits before the tap so the visualization shows what is heard.

pub mod source;
pub mod effect;
pub mod sink;

pub use source::CaptureSource;
pub use effect::{AnalysisTap, Gain, GainMessage};
pub use sink::OutputSink;
