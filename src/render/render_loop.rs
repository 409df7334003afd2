//! Periodic redraw on a dedicated thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};
use tracing::{debug, trace, warn};

use crate::analysis::AnalysisSampler;
use crate::error::{MonitorError, Result};

use super::draw::{Visualizer, VisualizerMode};
use super::surface::Surface;

/// A surface together with the visualizer state that belongs to it.
pub struct RenderTarget {
    surface: Box<dyn Surface>,
    visualizer: Visualizer,
}

impl RenderTarget {
    pub fn new(surface: Box<dyn Surface>, mode: VisualizerMode) -> Self {
        Self {
            surface,
            visualizer: Visualizer::new(mode),
        }
    }

    pub fn mode(&self) -> VisualizerMode {
        self.visualizer.mode()
    }

    pub fn set_mode(&mut self, mode: VisualizerMode) {
        self.visualizer.set_mode(mode);
    }

    /// Draw one frame from `sampler`, or the idle line for `None`.
    pub fn draw(&mut self, sampler: Option<&AnalysisSampler>) -> Result<()> {
        self.visualizer.draw(self.surface.as_mut(), sampler)
    }

    pub fn into_surface(self) -> Box<dyn Surface> {
        self.surface
    }
}

impl core::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RenderTarget").field("visualizer", &self.visualizer).finish()
    }
}

/// A scheduled render loop.
///
/// Draws one frame per tick until [`cancel`](RenderLoop::cancel)led. Frames
/// that fail are skipped; the loop keeps going.
pub struct RenderLoop {
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<Option<RenderTarget>>>,
}

impl RenderLoop {
    /// Start drawing `target` every `interval`. With no target the loop still
    /// runs (and counts nothing) until a surface is attached.
    pub fn spawn(
        target: Option<RenderTarget>,
        sampler: AnalysisSampler,
        interval: Duration,
        frames: Arc<AtomicU64>,
    ) -> Result<Self> {
        let (cancel, cancelled) = bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name("sidetone-render".into())
            .spawn(move || run(target, sampler, interval, frames, cancelled))
            .map_err(|err| MonitorError::surface(format!("cannot spawn render thread: {err}")))?;

        debug!(?interval, "render loop scheduled");
        Ok(Self {
            cancel: Some(cancel),
            thread: Some(thread),
        })
    }

    pub fn is_scheduled(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the loop, wait for any frame in progress and hand the target back.
    ///
    /// No frame is drawn after this returns.
    pub fn cancel(&mut self) -> Option<RenderTarget> {
        drop(self.cancel.take());
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(target) => {
                debug!("render loop cancelled");
                target
            }
            Err(_) => {
                warn!("render thread panicked; surface dropped");
                None
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run(
    mut target: Option<RenderTarget>,
    sampler: AnalysisSampler,
    interval: Duration,
    frames: Arc<AtomicU64>,
    cancelled: Receiver<()>,
) -> Option<RenderTarget> {
    let ticker = tick(interval);
    let mut failing = false;

    loop {
        select! {
            recv(cancelled) -> _ => break,
            recv(ticker) -> _ => {
                // a tick and the cancellation can be ready together
                if matches!(cancelled.try_recv(), Err(TryRecvError::Disconnected)) {
                    break;
                }
                if let Some(target) = target.as_mut() {
                    match target.draw(Some(&sampler)) {
                        Ok(()) => {
                            frames.fetch_add(1, Ordering::Relaxed);
                            if failing {
                                debug!("surface recovered");
                                failing = false;
                            }
                        }
                        Err(err) if !failing => {
                            warn!(error = %err, "frame skipped");
                            failing = true;
                        }
                        Err(err) => trace!(error = %err, "frame skipped"),
                    }
                }
            }
        }
    }

    target
}
