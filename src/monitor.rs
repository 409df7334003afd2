//! The monitor: one session at a time, its render loop and its observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisSampler, AnalysisSnapshot};
use crate::error::{MonitorError, Result};
use crate::platform::AudioPlatform;
use crate::render::{RenderLoop, RenderTarget, Surface, VisualizerMode};
use crate::session::{MonitorEvent, MonitorStatus, Session, SessionState};
use crate::settings::{clamp_gain, Settings, SettingsPatch};
use crate::signal_graph::SignalGraph;

/// Tuning that is not part of [`Settings`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between render ticks.
    pub frame_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_micros(16_667),
        }
    }
}

struct Inner {
    state: SessionState,
    settings: Settings,
    session: Option<Session>,
    last_error: Option<String>,
    has_permission: Option<bool>,

    /// Bumped by every start and stop; a start that finds it changed was
    /// superseded.
    generation: u64,
    in_flight: usize,

    mode: VisualizerMode,
    /// Parked here while no render loop owns it.
    target: Option<RenderTarget>,
    render: Option<RenderLoop>,

    subscribers: Vec<Sender<MonitorEvent>>,
}

/// Live microphone monitoring.
///
/// Owns at most one session. `start` blocks while the microphone is being
/// acquired but never holds the internal lock meanwhile, so `stop`,
/// `set_gain` and the getters stay responsive. Graph construction is
/// serialized: overlapping starts build one at a time.
pub struct Monitor {
    platform: Arc<dyn AudioPlatform>,
    config: MonitorConfig,
    sampler: AnalysisSampler,
    frames: Arc<AtomicU64>,
    /// Held while a start builds or releases its graph.
    building: Mutex<()>,
    inner: Mutex<Inner>,
}

impl Monitor {
    pub fn new(platform: impl AudioPlatform) -> Self {
        Self::with_config(platform, MonitorConfig::default())
    }

    pub fn with_config(platform: impl AudioPlatform, config: MonitorConfig) -> Self {
        Self {
            platform: Arc::new(platform),
            config,
            sampler: AnalysisSampler::new(),
            frames: Arc::new(AtomicU64::new(0)),
            building: Mutex::new(()),
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                settings: Settings::default(),
                session: None,
                last_error: None,
                has_permission: None,
                generation: 0,
                in_flight: 0,
                mode: VisualizerMode::default(),
                target: None,
                render: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Start monitoring with `settings`, replacing any running session.
    ///
    /// Returns the capture or graph error that aborted the start; the
    /// monitor is back to `Idle` by then. A start overtaken by `stop` or by
    /// another start returns `Ok(())` after releasing what it built.
    pub fn start(&self, settings: Settings) -> Result<()> {
        let settings = settings.clamped();

        let (generation, previous) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.in_flight += 1;
            let previous = self.detach_session(&mut inner);
            inner.settings = settings;
            self.set_state(&mut inner, SessionState::Starting);
            (inner.generation, previous)
        };

        if let Some(previous) = previous {
            debug!("replacing running session");
            previous.close();
        }

        let building = self.building.lock();
        let result = if self.inner.lock().generation == generation {
            Some(SignalGraph::start(self.platform.clone(), &settings))
        } else {
            None
        };

        let mut inner = self.inner.lock();
        let result = match result {
            Some(result) if inner.generation == generation => result,
            result => {
                drop(inner);
                // releases the graph if one was built
                drop(result);
                drop(building);
                debug!("start superseded");
                let mut inner = self.inner.lock();
                inner.in_flight -= 1;
                self.settle(&mut inner);
                return Ok(());
            }
        };
        inner.in_flight -= 1;

        match result {
            Ok((mut graph, analyser)) => {
                // gain may have moved while we were starting
                let gain = inner.settings.gain;
                if gain != settings.gain {
                    graph.set_gain(gain);
                }
                info!(sample_rate = graph.sample_rate(), gain, "monitoring");
                self.sampler.attach(analyser);
                inner.session = Some(Session::new(Settings { gain, ..settings }, graph));
                inner.last_error = None;
                inner.has_permission = Some(true);
                self.set_state(&mut inner, SessionState::Active);
                self.schedule_render(&mut inner);
                Ok(())
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "start failed");
                inner.last_error = Some(err.to_string());
                if let MonitorError::PermissionDenied(_) = err {
                    inner.has_permission = Some(false);
                }
                self.set_state(&mut inner, SessionState::Error);
                self.finish_idle(&mut inner);
                Err(err)
            }
        }
    }

    /// Stop monitoring and release every resource. No-op while idle.
    pub fn stop(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.session.is_none() && inner.in_flight == 0 {
                if inner.state != SessionState::Idle {
                    self.finish_idle(&mut inner);
                }
                return;
            }
            inner.generation += 1;
            let previous = self.detach_session(&mut inner);
            self.set_state(&mut inner, SessionState::Stopping);
            previous
        };

        if let Some(previous) = previous {
            previous.close();
        }

        let mut inner = self.inner.lock();
        self.settle(&mut inner);
    }

    /// Set the monitoring gain (clamped to `[0, 2]`), ramping if audio is
    /// flowing. Returns the applied value.
    pub fn set_gain(&self, value: f32) -> f32 {
        let gain = clamp_gain(value);
        let mut inner = self.inner.lock();
        inner.settings.gain = gain;
        if let Some(session) = inner.session.as_mut() {
            session.graph.set_gain(gain);
            session.settings.gain = gain;
        }
        debug!(requested = value, gain, "gain set");
        self.emit(&mut inner, MonitorEvent::Gain(gain));
        gain
    }

    pub fn applied_gain(&self) -> f32 {
        self.inner.lock().settings.gain
    }

    /// Merge `patch` into the current settings.
    ///
    /// Gain applies immediately; anything else is used by the next start.
    /// Returns whether the running session needs a restart to pick up the
    /// change.
    pub fn update_settings(&self, patch: SettingsPatch) -> bool {
        let mut inner = self.inner.lock();
        inner.settings.apply(&patch);
        let settings = inner.settings;

        let mut restart_required = false;
        if let Some(session) = inner.session.as_mut() {
            if patch.gain.is_some() {
                session.graph.set_gain(settings.gain);
                session.settings.gain = settings.gain;
            }
            restart_required = session.settings.requires_restart(&settings);
        }
        if restart_required {
            info!("capture settings changed; restart to apply");
        }
        self.emit(&mut inner, MonitorEvent::Settings { settings, restart_required });
        restart_required
    }

    /// Settings the next start will use (and, for gain, the current one).
    pub fn settings(&self) -> Settings {
        self.inner.lock().settings
    }

    pub fn mode(&self) -> VisualizerMode {
        self.inner.lock().mode
    }

    /// Switch visualizer mode; a scheduled render loop is restarted.
    pub fn set_mode(&self, mode: VisualizerMode) {
        let mut inner = self.inner.lock();
        if inner.mode == mode {
            return;
        }
        inner.mode = mode;
        let rescheduled = self.cancel_render(&mut inner);
        if let Some(target) = inner.target.as_mut() {
            target.set_mode(mode);
        }
        if rescheduled {
            self.schedule_render(&mut inner);
        }
        self.emit(&mut inner, MonitorEvent::Mode(mode));
    }

    /// Draw on `surface` from now on, replacing any previous one.
    pub fn attach_surface(&self, surface: Box<dyn Surface>) {
        let mut inner = self.inner.lock();
        let rescheduled = self.cancel_render(&mut inner);
        inner.target = Some(RenderTarget::new(surface, inner.mode));
        if rescheduled {
            self.schedule_render(&mut inner);
        } else if let Some(target) = inner.target.as_mut() {
            if let Err(err) = target.draw(None) {
                debug!(error = %err, "idle frame skipped");
            }
        }
    }

    /// Take the surface back; the render loop keeps its schedule.
    pub fn detach_surface(&self) -> Option<Box<dyn Surface>> {
        let mut inner = self.inner.lock();
        let rescheduled = self.cancel_render(&mut inner);
        let target = inner.target.take();
        if rescheduled {
            self.schedule_render(&mut inner);
        }
        target.map(RenderTarget::into_surface)
    }

    /// Current analysis reading; flat while nothing is monitored.
    pub fn snapshot(&self) -> AnalysisSnapshot {
        self.sampler.snapshot()
    }

    /// Shared handle for collaborators that read the analysis themselves.
    pub fn sampler(&self) -> AnalysisSampler {
        self.sampler.clone()
    }

    pub fn current_state(&self) -> MonitorStatus {
        let inner = self.inner.lock();
        MonitorStatus {
            state: inner.state,
            is_listening: inner.state.is_listening(),
            error: inner.last_error.clone(),
            has_permission: inner.has_permission,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Receive a [`MonitorEvent`] for every change from now on.
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        let (tx, rx) = unbounded();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Frames drawn since the monitor was created.
    pub fn render_frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_render_scheduled(&self) -> bool {
        self.inner.lock().render.is_some()
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state == state {
            return;
        }
        debug!(from = %inner.state, to = %state, "session state");
        inner.state = state;
        let error = inner.last_error.clone();
        self.emit(inner, MonitorEvent::State { state, error });
    }

    fn emit(&self, inner: &mut Inner, event: MonitorEvent) {
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Cancel the render loop, then detach the analyser, then hand back the
    /// session for the caller to close.
    fn detach_session(&self, inner: &mut Inner) -> Option<Session> {
        self.cancel_render(inner);
        self.sampler.detach();
        inner.session.take()
    }

    /// Returns whether a loop was scheduled.
    fn cancel_render(&self, inner: &mut Inner) -> bool {
        match inner.render.take() {
            Some(mut render) => {
                if let Some(target) = render.cancel() {
                    inner.target = Some(target);
                }
                true
            }
            None => false,
        }
    }

    fn schedule_render(&self, inner: &mut Inner) {
        let target = inner.target.take();
        match RenderLoop::spawn(target, self.sampler.clone(), self.config.frame_interval, self.frames.clone()) {
            Ok(render) => inner.render = Some(render),
            Err(err) => warn!(error = %err, "render loop not scheduled"),
        }
    }

    /// Finish a stop once no start is in flight any more.
    fn settle(&self, inner: &mut Inner) {
        if inner.in_flight == 0 && inner.state == SessionState::Stopping {
            self.finish_idle(inner);
        }
    }

    fn finish_idle(&self, inner: &mut Inner) {
        self.set_state(inner, SessionState::Idle);
        if let Some(target) = inner.target.as_mut() {
            if let Err(err) = target.draw(None) {
                debug!(error = %err, "idle frame skipped");
            }
        }
        info!("monitor idle");
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
