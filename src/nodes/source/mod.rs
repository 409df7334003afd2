//! Audio source nodes (no audio inputs)

mod capture_source;

pub use capture_source::CaptureSource;
