//! Processing nodes (audio inputs -> audio outputs)

pub(crate) mod analysis_tap;
mod gain;

pub use analysis_tap::AnalysisTap;
pub use gain::{Gain, GainMessage};
