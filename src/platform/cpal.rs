//! Host audio through cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, BuildStreamError, Device, SampleFormat, SizedSample, Stream, StreamConfig,
    SupportedBufferSize, SupportedStreamConfig,
};
use dasp_sample::{FromSample, ToSample};
use rtrb::Consumer;
use tracing::{debug, error, info, warn};

use super::{AudioPlatform, OutputContext};
use crate::capture::{feed_ring, CaptureConstraints, CaptureProcessor, CaptureStream};
use crate::error::{MonitorError, Result};
use crate::settings::LatencyHint;
use crate::signal_graph::GraphRunner;

/// The system's default host.
///
/// Uses the default output device and either the default or a named input
/// device.
#[derive(Clone, Debug, Default)]
pub struct CpalPlatform {
    input_device: Option<String>,
}

impl CpalPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from the input device called `name` instead of the default.
    pub fn with_input_device(name: impl Into<String>) -> Self {
        Self {
            input_device: Some(name.into()),
        }
    }

    /// Names of every input device the default host can see.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| MonitorError::DeviceUnavailable(err.to_string()))?;
        Ok(devices
            .map(|d| d.name().unwrap_or_else(|_| "Unknown".into()))
            .collect())
    }

    fn input_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.input_device {
            None => host
                .default_input_device()
                .ok_or_else(|| MonitorError::DeviceUnavailable("no default input device".into())),
            Some(name) => host
                .input_devices()
                .map_err(|err| MonitorError::DeviceUnavailable(err.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| MonitorError::DeviceUnavailable(format!("no input device named '{name}'"))),
        }
    }
}

impl AudioPlatform for CpalPlatform {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open_output(&self, latency: LatencyHint) -> Result<Box<dyn OutputContext>> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| MonitorError::graph("no default output device"))?;
        let supported = device
            .default_output_config()
            .map_err(|err| MonitorError::graph(err.to_string()))?;
        let config = stream_config(&supported, latency);

        info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".into()),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            buffer = ?config.buffer_size,
            "output opened"
        );

        Ok(Box::new(CpalOutput {
            device,
            format: supported.sample_format(),
            config,
            stream: None,
        }))
    }

    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
        let device = self.input_device()?;
        let supported = device.default_input_config().map_err(|err| match err {
            cpal::DefaultStreamConfigError::BackendSpecific { err } => backend_error(&err.description),
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                MonitorError::DeviceUnavailable("device cannot capture".into())
            }
            other => MonitorError::DeviceUnavailable(other.to_string()),
        })?;
        let config = stream_config(&supported, constraints.latency);
        let sample_rate = config.sample_rate.0;

        let (producer, feed) = feed_ring(sample_rate);
        let processor = CaptureProcessor::new(constraints, sample_rate);
        let channels = config.channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_input::<f32>(&device, &config, channels, processor, producer),
            SampleFormat::I16 => build_input::<i16>(&device, &config, channels, processor, producer),
            SampleFormat::U16 => build_input::<u16>(&device, &config, channels, processor, producer),
            SampleFormat::I32 => build_input::<i32>(&device, &config, channels, processor, producer),
            other => {
                return Err(MonitorError::Constraint(format!("unsupported input sample format {other:?}")))
            }
        }
        .map_err(capture_build_error)?;

        stream.play().map_err(|err| match err {
            cpal::PlayStreamError::BackendSpecific { err } => backend_error(&err.description),
            other => MonitorError::DeviceUnavailable(other.to_string()),
        })?;

        info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".into()),
            sample_rate,
            channels,
            buffer = ?config.buffer_size,
            "microphone acquired"
        );

        Ok(Box::new(CpalCapture {
            stream: Some(stream),
            feed: Some(feed),
            sample_rate,
        }))
    }
}

/// Request the latency class's buffer size, clamped to what the device
/// supports.
fn stream_config(supported: &SupportedStreamConfig, latency: LatencyHint) -> StreamConfig {
    let mut config = supported.config();
    config.buffer_size = match (latency.buffer_frames(), supported.buffer_size()) {
        (Some(frames), SupportedBufferSize::Range { min, max }) => BufferSize::Fixed(frames.clamp(*min, *max)),
        _ => BufferSize::Default,
    };
    config
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    mut processor: CaptureProcessor,
    mut producer: rtrb::Producer<f32>,
) -> core::result::Result<Stream, BuildStreamError>
where
    T: SizedSample + ToSample<f32>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            processor.push(data, channels, &mut producer);
        },
        |err| error!(%err, "input stream error"),
        None,
    )
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut runner: GraphRunner,
) -> core::result::Result<Stream, BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| runner.fill(data),
        |err| error!(%err, "output stream error"),
        None,
    )
}

/// Backends only report access problems as text.
fn backend_error(description: &str) -> MonitorError {
    let lower = description.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        MonitorError::PermissionDenied(description.to_string())
    } else {
        MonitorError::DeviceUnavailable(description.to_string())
    }
}

fn capture_build_error(err: BuildStreamError) -> MonitorError {
    match err {
        BuildStreamError::BackendSpecific { err } => backend_error(&err.description),
        BuildStreamError::StreamConfigNotSupported | BuildStreamError::InvalidArgument => {
            MonitorError::Constraint(err.to_string())
        }
        other => MonitorError::DeviceUnavailable(other.to_string()),
    }
}

struct CpalCapture {
    stream: Option<Stream>,
    feed: Option<Consumer<f32>>,
    sample_rate: u32,
}

impl CaptureStream for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_feed(&mut self) -> Option<Consumer<f32>> {
        self.feed.take()
    }

    fn stop_tracks(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                warn!(%err, "could not pause input stream");
            }
            debug!("microphone released");
        }
    }

    fn is_live(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

struct CpalOutput {
    device: Device,
    format: SampleFormat,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl OutputContext for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn channels(&self) -> usize {
        self.config.channels as usize
    }

    fn start(&mut self, runner: GraphRunner) -> Result<()> {
        let stream = match self.format {
            SampleFormat::F32 => build_output::<f32>(&self.device, &self.config, runner),
            SampleFormat::I16 => build_output::<i16>(&self.device, &self.config, runner),
            SampleFormat::U16 => build_output::<u16>(&self.device, &self.config, runner),
            SampleFormat::I32 => build_output::<i32>(&self.device, &self.config, runner),
            other => return Err(MonitorError::graph(format!("unsupported output sample format {other:?}"))),
        }
        .map_err(|err| MonitorError::graph(err.to_string()))?;

        stream.play().map_err(|err| MonitorError::graph(err.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                warn!(%err, "could not pause output stream");
            }
            debug!("output closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_text_is_classified() {
        assert!(matches!(
            backend_error("Access denied by the system"),
            MonitorError::PermissionDenied(_)
        ));
        assert!(matches!(backend_error("device unplugged"), MonitorError::DeviceUnavailable(_)));
    }

    #[test]
    fn unsupported_config_is_a_constraint_error() {
        assert!(matches!(
            capture_build_error(BuildStreamError::StreamConfigNotSupported),
            MonitorError::Constraint(_)
        ));
        assert!(matches!(
            capture_build_error(BuildStreamError::DeviceNotAvailable),
            MonitorError::DeviceUnavailable(_)
        ));
    }
}
