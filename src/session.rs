//! Session state and the status reported to collaborators.

use std::fmt;

use crate::render::VisualizerMode;
use crate::settings::Settings;
use crate::signal_graph::SignalGraph;

/// Lifecycle of the monitoring session.
///
/// ```text
/// Idle -> Starting -> Active -> Stopping -> Idle
///            |
///            +-> Error -> Idle
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    /// Output opened or microphone being acquired.
    Starting,
    /// Audio flows and the render loop is scheduled.
    Active,
    /// Waiting for the graph, or an in-flight start, to wind down.
    Stopping,
    /// A start failed; passes straight through to `Idle`.
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        }
    }

    pub fn is_listening(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a UI needs to render the monitor's controls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MonitorStatus {
    pub state: SessionState,
    pub is_listening: bool,
    /// Message of the most recent failed start, cleared by the next
    /// successful one.
    pub error: Option<String>,
    /// `None` until the microphone was requested at least once.
    pub has_permission: Option<bool>,
}

/// Notification sent to every subscriber, one per mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorEvent {
    State {
        state: SessionState,
        error: Option<String>,
    },
    Gain(f32),
    Settings {
        settings: Settings,
        /// The running session still uses older processing settings.
        restart_required: bool,
    },
    Mode(VisualizerMode),
}

/// A running session: the settings it was started with and its graph.
#[derive(Debug)]
pub(crate) struct Session {
    pub settings: Settings,
    pub graph: SignalGraph,
}

impl Session {
    pub fn new(settings: Settings, graph: SignalGraph) -> Self {
        Self { settings, graph }
    }

    /// Release every platform resource of the session.
    pub fn close(mut self) {
        self.graph.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_is_listening() {
        assert!(SessionState::Active.is_listening());
        for state in [
            SessionState::Idle,
            SessionState::Starting,
            SessionState::Stopping,
            SessionState::Error,
        ] {
            assert!(!state.is_listening(), "{state}");
        }
    }
}
