//! A character-grid surface drawn to the terminal.

use std::io::{self, Stdout, Write};

use sidetone::error::{MonitorError, Result};
use sidetone::render::{Color, Fill, Point, Rect, Size, Stroke, Surface};

const HEADER: &str = "sidetone  [+/-] gain  [w/f] view  [s/x] start/stop  [q] quit";

/// Draws frames as text, one cell per logical unit.
pub struct TerminalSurface {
    size: Size,
    cols: usize,
    rows: usize,
    scale: f32,
    cells: Vec<char>,
    out: Stdout,
}

impl TerminalSurface {
    pub fn new(cols: u16, rows: u16) -> Self {
        let (cols, rows) = (cols.max(8) as usize, rows.max(4) as usize);
        Self {
            size: Size::new(cols as f32, rows as f32),
            cols,
            rows,
            scale: 1.0,
            cells: vec![' '; cols * rows],
            out: io::stdout(),
        }
    }

    fn plot(&mut self, x: f32, y: f32, glyph: char) {
        let (col, row) = ((x * self.scale).floor(), (y * self.scale).floor());
        if col < 0.0 || row < 0.0 {
            return;
        }
        let (col, row) = ((col as usize).min(self.cols - 1), (row as usize).min(self.rows - 1));
        self.cells[row * self.cols + col] = glyph;
    }
}

fn io_error(err: io::Error) -> MonitorError {
    MonitorError::surface(format!("terminal write failed: {err}"))
}

impl Surface for TerminalSurface {
    fn logical_size(&self) -> Size {
        self.size
    }

    fn pixel_ratio(&self) -> f32 {
        1.0
    }

    fn configure(&mut self, backing: Size, scale: f32) -> Result<()> {
        self.cols = (backing.width.round() as usize).max(1);
        self.rows = (backing.height.round() as usize).max(1);
        self.scale = scale;
        self.cells = vec![' '; self.cols * self.rows];
        write!(self.out, "\x1b[2J").map_err(io_error)
    }

    fn clear(&mut self, _color: Color) -> Result<()> {
        self.cells.fill(' ');
        Ok(())
    }

    fn stroke_path(&mut self, points: &[Point], _stroke: Stroke) -> Result<()> {
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let steps = ((b.x - a.x).abs().max((b.y - a.y).abs()) * 2.0).ceil().max(1.0) as usize;
            for step in 0..=steps {
                let t = step as f32 / steps as f32;
                self.plot(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t, '*');
            }
        }
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect, fill: Fill) -> Result<()> {
        if rect.height <= 0.0 {
            return Ok(());
        }
        let glyph = match fill {
            Fill::Solid(_) => '#',
            Fill::VerticalGradient { .. } => '|',
        };
        let mut y = rect.y;
        while y < rect.bottom() {
            self.plot(rect.x, y, glyph);
            y += 1.0 / self.scale.max(f32::EPSILON);
        }
        self.plot(rect.x, rect.bottom() - f32::EPSILON, glyph);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        let mut frame = String::with_capacity((self.cols + 1) * (self.rows + 2));
        frame.push_str("\x1b[H");
        frame.push_str(HEADER);
        frame.push('\n');
        for row in self.cells.chunks(self.cols) {
            frame.extend(row.iter());
            frame.push('\n');
        }
        self.out.write_all(frame.as_bytes()).map_err(io_error)?;
        self.out.flush().map_err(io_error)
    }
}
