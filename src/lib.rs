//! sidetone - live microphone monitoring
//!
//! Design principles:
//! - One session at a time; starting again replaces the running graph
//! - The graph runs on the output device's callback and is controlled only
//!   through message ring buffers
//! - Device handles never leave the session's audio host thread
//! - Visualization reads the post-gain signal, so it shows what is heard

pub mod analysis;
pub mod capture;
pub mod error;
mod graph;
mod monitor;
mod node;
pub mod nodes;
pub mod platform;
pub mod render;
mod session;
pub mod settings;
pub mod signal_graph;

pub use analysis::{AnalysisSampler, AnalysisSnapshot};
pub use error::{MonitorError, Result};
pub use graph::{AudioGraph, NodeHandle};
pub use monitor::{Monitor, MonitorConfig};
pub use node::{AudioNode, NodeId, ProcessContext};
pub use platform::{AudioPlatform, OutputContext, SyntheticPlatform};
#[cfg(feature = "cpal_backend")]
pub use platform::CpalPlatform;
pub use render::{RecordingSurface, Surface, VisualizerMode};
pub use session::{MonitorEvent, MonitorStatus, SessionState};
pub use settings::{LatencyHint, Settings, SettingsPatch};
