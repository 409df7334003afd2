//! Frame drawing for the two visualizer modes.

use std::fmt;
use std::str::FromStr;

use crate::analysis::AnalysisSampler;
use crate::error::Result;
use crate::settings::{FFT_SIZE, FREQUENCY_BIN_COUNT};

use super::surface::{Color, Fill, Point, Rect, Size, Stroke, Surface};

pub const BACKGROUND: Color = Color::rgb(30, 41, 59);
pub const IDLE_LINE: Color = Color::rgb(71, 85, 105);
pub const WAVEFORM_LINE: Color = Color::rgb(99, 102, 241);
pub const BAR_TOP: Color = Color::rgb(79, 70, 229);
pub const BAR_BOTTOM: Color = Color::rgb(129, 140, 248);

pub const LINE_WIDTH: f32 = 2.0;
/// Bar width relative to an even split of the surface width.
pub const BAR_WIDTH_FACTOR: f32 = 2.5;
pub const BAR_GAP: f32 = 1.0;

/// What the render loop draws.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VisualizerMode {
    /// Oscilloscope line of the time-domain samples.
    #[default]
    Waveform,
    /// Bar chart of the frequency magnitudes.
    Frequency,
}

impl VisualizerMode {
    /// Caption shown next to the visualization.
    pub fn label(&self) -> &'static str {
        match self {
            VisualizerMode::Waveform => "TIME DOMAIN",
            VisualizerMode::Frequency => "FREQUENCY DOMAIN",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            VisualizerMode::Waveform => VisualizerMode::Frequency,
            VisualizerMode::Frequency => VisualizerMode::Waveform,
        }
    }
}

impl fmt::Display for VisualizerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VisualizerMode::Waveform => "waveform",
            VisualizerMode::Frequency => "frequency",
        })
    }
}

impl FromStr for VisualizerMode {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waveform" | "time" | "w" => Ok(VisualizerMode::Waveform),
            "frequency" | "spectrum" | "f" => Ok(VisualizerMode::Frequency),
            other => Err(format!("unknown visualizer mode '{other}' (expected waveform or frequency)")),
        }
    }
}

/// Oscilloscope polyline for time-domain bytes.
///
/// Byte 128 sits on the center line; the path always ends at the right edge
/// of the center line.
pub fn waveform_path(samples: &[u8], size: Size, out: &mut Vec<Point>) {
    out.clear();
    let (width, height) = (size.width, size.height);
    let slice = if samples.is_empty() { 0.0 } else { width / samples.len() as f32 };

    let mut x = 0.0;
    for &sample in samples {
        let y = (sample as f32 / 128.0) * height / 2.0;
        out.push(Point::new(x, y));
        x += slice;
    }
    out.push(Point::new(width, height / 2.0));
}

/// Bars for frequency bytes, left to right, growing up from the bottom edge.
///
/// Bars that would start past the right edge are not produced.
pub fn frequency_bars(magnitudes: &[u8], size: Size, out: &mut Vec<Rect>) {
    out.clear();
    if magnitudes.is_empty() {
        return;
    }
    let (width, height) = (size.width, size.height);
    let bar_width = width / magnitudes.len() as f32 * BAR_WIDTH_FACTOR;

    let mut x = 0.0;
    for &magnitude in magnitudes {
        if x >= width {
            break;
        }
        let bar_height = magnitude as f32 / 255.0 * height;
        out.push(Rect::new(x, height - bar_height, bar_width, bar_height));
        x += bar_width + BAR_GAP;
    }
}

/// Flat line across the vertical center.
pub fn idle_line(size: Size) -> [Point; 2] {
    [Point::new(0.0, size.height / 2.0), Point::new(size.width, size.height / 2.0)]
}

/// Draws frames in one mode and keeps the surface's backing store in step
/// with its logical size and pixel ratio.
#[derive(Debug)]
pub struct Visualizer {
    mode: VisualizerMode,
    configured_for: Option<(Size, f32)>,
    time_domain: Vec<u8>,
    frequency: Vec<u8>,
    points: Vec<Point>,
    bars: Vec<Rect>,
}

impl Visualizer {
    pub fn new(mode: VisualizerMode) -> Self {
        Self {
            mode,
            configured_for: None,
            time_domain: vec![0; FFT_SIZE],
            frequency: vec![0; FREQUENCY_BIN_COUNT],
            points: Vec::with_capacity(FFT_SIZE + 1),
            bars: Vec::with_capacity(FREQUENCY_BIN_COUNT),
        }
    }

    pub fn mode(&self) -> VisualizerMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: VisualizerMode) {
        self.mode = mode;
    }

    /// Size the backing store to logical size times pixel ratio. Only talks
    /// to the surface when either changed since the last call.
    pub fn prepare(&mut self, surface: &mut dyn Surface) -> Result<()> {
        let size = surface.logical_size();
        let ratio = match surface.pixel_ratio() {
            r if r.is_finite() && r > 0.0 => r,
            _ => 1.0,
        };
        if self.configured_for != Some((size, ratio)) {
            surface.configure(size.scaled(ratio), ratio)?;
            self.configured_for = Some((size, ratio));
            tracing::debug!(width = size.width, height = size.height, ratio, "surface configured");
        }
        Ok(())
    }

    /// Draw and present one frame. Without an attached sampler the idle line
    /// is drawn.
    pub fn draw(&mut self, surface: &mut dyn Surface, sampler: Option<&AnalysisSampler>) -> Result<()> {
        self.prepare(surface)?;
        let size = surface.logical_size();
        if size.is_empty() {
            return Ok(());
        }

        surface.clear(BACKGROUND)?;
        let drawn = match sampler {
            Some(sampler) => match self.mode {
                VisualizerMode::Waveform => self.draw_waveform(surface, sampler, size)?,
                VisualizerMode::Frequency => self.draw_frequency(surface, sampler, size)?,
            },
            None => false,
        };
        if !drawn {
            surface.stroke_path(&idle_line(size), Stroke { color: IDLE_LINE, width: LINE_WIDTH })?;
        }
        surface.present()
    }

    fn draw_waveform(&mut self, surface: &mut dyn Surface, sampler: &AnalysisSampler, size: Size) -> Result<bool> {
        if !sampler.fill_time_domain(&mut self.time_domain) {
            return Ok(false);
        }
        waveform_path(&self.time_domain, size, &mut self.points);
        surface.stroke_path(&self.points, Stroke { color: WAVEFORM_LINE, width: LINE_WIDTH })?;
        Ok(true)
    }

    fn draw_frequency(&mut self, surface: &mut dyn Surface, sampler: &AnalysisSampler, size: Size) -> Result<bool> {
        if !sampler.fill_frequency(&mut self.frequency) {
            return Ok(false);
        }
        frequency_bars(&self.frequency, size, &mut self.bars);
        let fill = Fill::VerticalGradient { top: BAR_TOP, bottom: BAR_BOTTOM };
        for bar in &self.bars {
            surface.fill_rect(*bar, fill)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::surface::{DrawCommand, RecordingSurface};

    #[test]
    fn silence_draws_a_flat_centered_waveform() {
        let size = Size::new(300.0, 150.0);
        let mut points = Vec::new();
        waveform_path(&vec![128; FFT_SIZE], size, &mut points);
        assert_eq!(points.len(), FFT_SIZE + 1);
        assert!(points.iter().all(|p| p.y == 75.0));
        assert_eq!(points[0].x, 0.0);
        assert_eq!(*points.last().unwrap(), Point::new(300.0, 75.0));
    }

    #[test]
    fn bar_heights_span_zero_to_full() {
        let size = Size::new(1024.0, 200.0);
        let mut bars = Vec::new();

        frequency_bars(&vec![0; FREQUENCY_BIN_COUNT], size, &mut bars);
        assert!(!bars.is_empty());
        assert!(bars.iter().all(|b| b.height == 0.0 && b.y == 200.0));

        frequency_bars(&vec![255; FREQUENCY_BIN_COUNT], size, &mut bars);
        assert!(bars.iter().all(|b| b.height == 200.0 && b.y == 0.0));
        assert_eq!(bars[0].width, 2.5);
        assert_eq!(bars[1].x, 3.5);
    }

    #[test]
    fn bars_past_the_right_edge_are_culled() {
        let size = Size::new(1024.0, 100.0);
        let mut bars = Vec::new();
        frequency_bars(&vec![200; FREQUENCY_BIN_COUNT], size, &mut bars);
        // 3.5 units per bar: ceil(1024 / 3.5)
        assert_eq!(bars.len(), 293);
        assert!(bars.iter().all(|b| b.x < size.width));
    }

    #[test]
    fn detached_sampler_draws_idle_line() {
        let mut surface = RecordingSurface::new(Size::new(200.0, 100.0), 1.0);
        let log = surface.log();
        let mut visualizer = Visualizer::new(VisualizerMode::Frequency);
        visualizer.draw(&mut surface, Some(&AnalysisSampler::new())).unwrap();

        let frame = log.last_frame();
        assert_eq!(frame.len(), 2);
        assert_eq!(
            frame[1],
            DrawCommand::StrokePath {
                points: vec![Point::new(0.0, 50.0), Point::new(200.0, 50.0)],
                stroke: Stroke { color: IDLE_LINE, width: LINE_WIDTH },
            }
        );
    }

    #[test]
    fn reconfigures_only_when_size_changes() {
        let mut surface = RecordingSurface::new(Size::new(200.0, 100.0), 2.0);
        let log = surface.log();
        let mut visualizer = Visualizer::new(VisualizerMode::Waveform);

        visualizer.draw(&mut surface, None).unwrap();
        visualizer.draw(&mut surface, None).unwrap();
        assert_eq!(log.configurations(), vec![(Size::new(400.0, 200.0), 2.0)]);

        surface.resize(Size::new(300.0, 100.0));
        visualizer.draw(&mut surface, None).unwrap();
        assert_eq!(log.configurations().len(), 2);
        assert_eq!(log.configurations()[1], (Size::new(600.0, 200.0), 2.0));
        assert_eq!(log.frames_presented(), 3);
    }

    #[test]
    fn mode_labels_and_parsing() {
        assert_eq!(VisualizerMode::Waveform.label(), "TIME DOMAIN");
        assert_eq!(VisualizerMode::Frequency.label(), "FREQUENCY DOMAIN");
        assert_eq!("Spectrum".parse::<VisualizerMode>(), Ok(VisualizerMode::Frequency));
        assert_eq!(VisualizerMode::Waveform.toggled(), VisualizerMode::Frequency);
    }
}
