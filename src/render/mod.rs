//! Waveform and spectrum rendering.
//!
//! - [`surface`] - the drawing seam and a recording implementation
//! - [`draw`] - frame layout for each [`VisualizerMode`]
//! - [`render_loop`] - the periodic redraw thread

pub mod draw;
pub mod render_loop;
pub mod surface;

pub use draw::{Visualizer, VisualizerMode};
pub use render_loop::{RenderLoop, RenderTarget};
pub use surface::{Color, DrawCommand, DrawLog, Fill, Point, RecordingSurface, Rect, Size, Stroke, Surface};
