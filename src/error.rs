//! Error taxonomy shared by capture, graph construction and rendering.

/// Result alias carrying [`MonitorError`].
pub type Result<T> = core::result::Result<T, MonitorError>;

/// Everything that can go wrong while monitoring.
///
/// Capture and graph errors abort a start and are surfaced through
/// [`Monitor::current_state`](crate::Monitor::current_state). Render errors
/// never leave the render loop; the affected frame is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// The user or the OS refused microphone access.
    #[error("microphone access was denied: {0}")]
    PermissionDenied(String),
    /// No input device, or the hardware failed.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// No device can satisfy the requested capture constraints.
    #[error("capture constraints cannot be satisfied: {0}")]
    Constraint(String),
    /// Output context or node creation failed.
    #[error("could not build the audio graph: {0}")]
    GraphConstruction(String),
    /// The drawing surface is gone or unusable.
    #[error("render surface unavailable: {0}")]
    RenderSurface(String),
}

impl MonitorError {
    pub fn graph<T: Into<String>>(msg: T) -> Self {
        Self::GraphConstruction(msg.into())
    }

    pub fn surface<T: Into<String>>(msg: T) -> Self {
        Self::RenderSurface(msg.into())
    }

    /// Short machine-friendly label, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::PermissionDenied(_) => "permission_denied",
            MonitorError::DeviceUnavailable(_) => "device_unavailable",
            MonitorError::Constraint(_) => "constraint",
            MonitorError::GraphConstruction(_) => "graph_construction",
            MonitorError::RenderSurface(_) => "render_surface",
        }
    }
}
