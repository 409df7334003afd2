//! Drawing surfaces.
//!
//! All coordinates handed to a [`Surface`] are logical units; the surface
//! maps them to backing pixels through the scale set by
//! [`Surface::configure`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MonitorError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fill {
    Solid(Color),
    /// Linear gradient from the top edge of the shape to its bottom edge.
    VerticalGradient { top: Color, bottom: Color },
}

/// Something the render loop can draw a frame on.
///
/// Surfaces are moved onto the render thread while a loop is scheduled.
/// Any error skips the current frame only.
pub trait Surface: Send {
    /// Current size in logical units.
    fn logical_size(&self) -> Size;

    /// Backing pixels per logical unit.
    fn pixel_ratio(&self) -> f32;

    /// Resize the backing store to `backing` pixels and scale drawing so
    /// logical coordinates cover it.
    fn configure(&mut self, backing: Size, scale: f32) -> Result<()>;

    fn clear(&mut self, color: Color) -> Result<()>;

    /// Stroke an open polyline.
    fn stroke_path(&mut self, points: &[Point], stroke: Stroke) -> Result<()>;

    fn fill_rect(&mut self, rect: Rect, fill: Fill) -> Result<()>;

    /// Finish the frame.
    fn present(&mut self) -> Result<()>;
}

/// One recorded drawing call.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Clear(Color),
    StrokePath { points: Vec<Point>, stroke: Stroke },
    FillRect { rect: Rect, fill: Fill },
}

#[derive(Debug, Default)]
struct Recording {
    pending: Vec<DrawCommand>,
    last_frame: Vec<DrawCommand>,
    frames_presented: u64,
    configurations: Vec<(Size, f32)>,
    context_lost: bool,
}

/// Read side of a [`RecordingSurface`], usable after the surface has moved
/// to the render thread.
#[derive(Clone, Debug, Default)]
pub struct DrawLog {
    inner: Arc<Mutex<Recording>>,
}

impl DrawLog {
    /// Commands of the most recently presented frame.
    pub fn last_frame(&self) -> Vec<DrawCommand> {
        self.inner.lock().last_frame.clone()
    }

    pub fn frames_presented(&self) -> u64 {
        self.inner.lock().frames_presented
    }

    /// Every `(backing size, scale)` the surface was configured with.
    pub fn configurations(&self) -> Vec<(Size, f32)> {
        self.inner.lock().configurations.clone()
    }

    /// Make every following drawing call fail, as if the GPU context was
    /// lost.
    pub fn lose_context(&self) {
        self.inner.lock().context_lost = true;
    }

    pub fn restore_context(&self) {
        self.inner.lock().context_lost = false;
    }
}

/// Surface that records drawing commands instead of rasterizing them.
#[derive(Debug)]
pub struct RecordingSurface {
    size: Size,
    pixel_ratio: f32,
    log: DrawLog,
}

impl RecordingSurface {
    pub fn new(size: Size, pixel_ratio: f32) -> Self {
        Self {
            size,
            pixel_ratio,
            log: DrawLog::default(),
        }
    }

    pub fn log(&self) -> DrawLog {
        self.log.clone()
    }

    pub fn resize(&mut self, size: Size) {
        self.size = size;
    }

    fn record(&mut self, command: DrawCommand) -> Result<()> {
        let mut rec = self.log.inner.lock();
        if rec.context_lost {
            return Err(MonitorError::surface("drawing context lost"));
        }
        rec.pending.push(command);
        Ok(())
    }
}

impl Surface for RecordingSurface {
    fn logical_size(&self) -> Size {
        self.size
    }

    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn configure(&mut self, backing: Size, scale: f32) -> Result<()> {
        let mut rec = self.log.inner.lock();
        if rec.context_lost {
            return Err(MonitorError::surface("drawing context lost"));
        }
        rec.configurations.push((backing, scale));
        Ok(())
    }

    fn clear(&mut self, color: Color) -> Result<()> {
        self.record(DrawCommand::Clear(color))
    }

    fn stroke_path(&mut self, points: &[Point], stroke: Stroke) -> Result<()> {
        self.record(DrawCommand::StrokePath {
            points: points.to_vec(),
            stroke,
        })
    }

    fn fill_rect(&mut self, rect: Rect, fill: Fill) -> Result<()> {
        self.record(DrawCommand::FillRect { rect, fill })
    }

    fn present(&mut self) -> Result<()> {
        let mut rec = self.log.inner.lock();
        if rec.context_lost {
            rec.pending.clear();
            return Err(MonitorError::surface("drawing context lost"));
        }
        let frame = std::mem::take(&mut rec.pending);
        rec.last_frame = frame;
        rec.frames_presented += 1;
        Ok(())
    }
}
