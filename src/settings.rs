//! Monitoring settings and the constants they default from.

use core::fmt;
use core::str::FromStr;

/// Lowest gain the monitor will apply.
pub const MIN_GAIN: f32 = 0.0;
/// Highest gain the monitor will apply.
pub const MAX_GAIN: f32 = 2.0;
/// Time constant of the gain ramp, in seconds.
pub const GAIN_RAMP_SECONDS: f32 = 0.1;
/// Analysis window length.
pub const FFT_SIZE: usize = 2048;
/// Number of frequency bins exposed by the analysis tap.
pub const FREQUENCY_BIN_COUNT: usize = FFT_SIZE / 2;
/// Averaging factor applied to frequency magnitudes across reads.
pub const ANALYSIS_SMOOTHING: f32 = 0.8;

/// Clamp a requested gain into `[MIN_GAIN, MAX_GAIN]`.
///
/// NaN maps to silence.
#[inline]
pub fn clamp_gain(value: f32) -> f32 {
    if value.is_nan() {
        return MIN_GAIN;
    }
    value.clamp(MIN_GAIN, MAX_GAIN)
}

/// Coarse trade-off between buffer size and scheduling latency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LatencyHint {
    /// Smallest buffers, lowest latency.
    #[default]
    Interactive,
    Balanced,
    /// Largest buffers, most resilient to scheduling hiccups.
    Playback,
}

impl LatencyHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyHint::Interactive => "interactive",
            LatencyHint::Balanced => "balanced",
            LatencyHint::Playback => "playback",
        }
    }

    /// Device buffer size to request, `None` for the device default.
    pub fn buffer_frames(&self) -> Option<u32> {
        match self {
            LatencyHint::Interactive => Some(128),
            LatencyHint::Balanced => Some(512),
            LatencyHint::Playback => None,
        }
    }

    /// Captured samples held back before monitoring starts, absorbing
    /// scheduling jitter between the input and output callbacks.
    pub fn cushion_frames(&self) -> usize {
        match self {
            LatencyHint::Interactive => 256,
            LatencyHint::Balanced => 1024,
            LatencyHint::Playback => 4096,
        }
    }
}

impl fmt::Display for LatencyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LatencyHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(LatencyHint::Interactive),
            "balanced" => Ok(LatencyHint::Balanced),
            "playback" => Ok(LatencyHint::Playback),
            other => Err(format!(
                "unknown latency hint '{other}' (expected interactive, balanced or playback)"
            )),
        }
    }
}

/// Settings a session is started with.
///
/// A running session keeps the snapshot it was started with; only `gain`
/// can change while audio is flowing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settings {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub latency_hint: LatencyHint,
    pub gain: f32,
}

impl Default for Settings {
    /// Processing is off by default so the monitored signal is unaltered.
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            latency_hint: LatencyHint::Interactive,
            gain: 1.0,
        }
    }
}

impl Settings {
    /// Copy of these settings with `gain` clamped into range.
    pub fn clamped(mut self) -> Self {
        self.gain = clamp_gain(self.gain);
        self
    }

    /// Whether moving from `self` to `other` needs a stop/start cycle.
    pub fn requires_restart(&self, other: &Settings) -> bool {
        self.echo_cancellation != other.echo_cancellation
            || self.noise_suppression != other.noise_suppression
            || self.auto_gain_control != other.auto_gain_control
            || self.latency_hint != other.latency_hint
    }

    /// Merge a partial update into these settings.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.echo_cancellation {
            self.echo_cancellation = v;
        }
        if let Some(v) = patch.noise_suppression {
            self.noise_suppression = v;
        }
        if let Some(v) = patch.auto_gain_control {
            self.auto_gain_control = v;
        }
        if let Some(v) = patch.latency_hint {
            self.latency_hint = v;
        }
        if let Some(v) = patch.gain {
            self.gain = clamp_gain(v);
        }
    }
}

/// Partial settings update; `None` fields are left untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SettingsPatch {
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
    pub latency_hint: Option<LatencyHint>,
    pub gain: Option<f32>,
}

impl SettingsPatch {
    pub fn gain(value: f32) -> Self {
        Self {
            gain: Some(value),
            ..Default::default()
        }
    }
}
