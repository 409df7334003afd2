//! Host audio systems.
//!
//! An [`AudioPlatform`] opens the output side and acquires microphone
//! streams. Both calls happen on the session's audio host thread, so the
//! returned objects never cross threads and may wrap `!Send` device handles.

use crate::capture::{CaptureConstraints, CaptureStream};
use crate::error::Result;
use crate::settings::LatencyHint;
use crate::signal_graph::GraphRunner;

#[cfg(feature = "cpal_backend")]
pub mod cpal;
pub mod synthetic;

#[cfg(feature = "cpal_backend")]
pub use self::cpal::CpalPlatform;
pub use self::synthetic::{PermissionGate, SyntheticConfig, SyntheticFailure, SyntheticPlatform};

/// Access to the host's audio devices.
pub trait AudioPlatform: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Open the output side with the given latency class.
    ///
    /// Failures are reported as [`MonitorError::GraphConstruction`](crate::MonitorError::GraphConstruction).
    fn open_output(&self, latency: LatencyHint) -> Result<Box<dyn OutputContext>>;

    /// Ask for a microphone stream. May block while the user decides on
    /// access.
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>>;
}

/// The output half of a session: pulls rendered audio from a
/// [`GraphRunner`] at the device's pace.
pub trait OutputContext {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// Start pulling from `runner`. The runner is dropped when the context
    /// closes.
    fn start(&mut self, runner: GraphRunner) -> Result<()>;

    /// Stop the device and drop the runner. Idempotent.
    fn close(&mut self);
}
