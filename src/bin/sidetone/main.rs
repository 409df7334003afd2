//! Command-line monitor: hear the microphone and watch it in the terminal.
//!
//! Commands are read from stdin, one or more per line:
//! `+`/`-` gain, `w`/`f` view, `s` start, `x` stop, `q` quit.

mod terminal;

use std::io::BufRead;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{after, never, select, unbounded, Receiver};
use sidetone::{LatencyHint, Monitor, MonitorConfig, Settings, SyntheticPlatform, VisualizerMode};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::terminal::TerminalSurface;

const GAIN_STEP: f32 = 0.1;

#[derive(Parser, Debug)]
#[command(author, version, about = "Live microphone monitoring with a waveform or spectrum view", long_about = None)]
struct Cli {
    /// Monitoring gain, clamped to 0.0..=2.0.
    #[arg(short, long, env = "SIDETONE_GAIN", default_value_t = 1.0)]
    gain: f32,

    /// interactive, balanced or playback.
    #[arg(short, long, env = "SIDETONE_LATENCY", default_value_t = LatencyHint::Interactive)]
    latency: LatencyHint,

    #[arg(long, env = "SIDETONE_ECHO_CANCELLATION")]
    echo_cancellation: bool,

    #[arg(long, env = "SIDETONE_NOISE_SUPPRESSION")]
    noise_suppression: bool,

    #[arg(long, env = "SIDETONE_AUTO_GAIN")]
    auto_gain_control: bool,

    /// waveform or frequency.
    #[arg(short, long, default_value_t = VisualizerMode::Waveform)]
    mode: VisualizerMode,

    /// Use a generated test tone instead of the sound card.
    #[arg(long, env = "SIDETONE_SYNTHETIC")]
    synthetic: bool,

    /// Input device name (see --list-devices).
    #[arg(short, long, env = "SIDETONE_INPUT_DEVICE")]
    device: Option<String>,

    /// Print the input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Frames drawn per second.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 72)]
    width: u16,

    #[arg(long, default_value_t = 16)]
    height: u16,

    /// Quit after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
            latency_hint: self.latency,
            gain: self.gain,
        }
    }

    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            frame_interval: Duration::from_secs_f64(1.0 / self.fps.max(1) as f64),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Louder,
    Quieter,
    Waveform,
    Frequency,
    Start,
    Stop,
    Quit,
}

impl Command {
    fn parse(c: char) -> Option<Self> {
        match c {
            '+' | '=' => Some(Command::Louder),
            '-' | '_' => Some(Command::Quieter),
            'w' => Some(Command::Waveform),
            'f' => Some(Command::Frequency),
            's' => Some(Command::Start),
            'x' => Some(Command::Stop),
            'q' => Some(Command::Quit),
            _ => None,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = err.kind(), "{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> sidetone::Result<()> {
    if cli.list_devices {
        return list_devices();
    }

    let monitor = build_monitor(&cli);
    monitor.set_mode(cli.mode);
    monitor.attach_surface(Box::new(TerminalSurface::new(cli.width, cli.height)));

    if let Err(err) = monitor.start(cli.settings()) {
        warn!("{err}; press 's' to retry");
    }

    let mut commands = Some(spawn_stdin_reader());
    let deadline = match cli.seconds {
        Some(secs) => after(Duration::from_secs(secs)),
        None => never(),
    };

    loop {
        let input = commands.clone().unwrap_or_else(never);
        select! {
            recv(input) -> command => match command {
                Ok(Command::Quit) => break,
                Ok(command) => apply(&monitor, command),
                Err(_) if cli.seconds.is_some() => commands = None,
                Err(_) => break,
            },
            recv(deadline) -> _ => break,
        }
    }

    monitor.stop();
    info!(frames = monitor.render_frames(), "bye");
    Ok(())
}

#[cfg(feature = "cpal_backend")]
fn build_monitor(cli: &Cli) -> Monitor {
    use sidetone::CpalPlatform;

    let config = cli.monitor_config();
    if cli.synthetic {
        return Monitor::with_config(SyntheticPlatform::new(), config);
    }
    let platform = match &cli.device {
        Some(name) => CpalPlatform::with_input_device(name.clone()),
        None => CpalPlatform::new(),
    };
    Monitor::with_config(platform, config)
}

#[cfg(not(feature = "cpal_backend"))]
fn build_monitor(cli: &Cli) -> Monitor {
    if !cli.synthetic {
        warn!("built without the cpal backend; using the synthetic platform");
    }
    Monitor::with_config(SyntheticPlatform::new(), cli.monitor_config())
}

#[cfg(feature = "cpal_backend")]
fn list_devices() -> sidetone::Result<()> {
    let devices = sidetone::CpalPlatform::list_input_devices()?;
    if devices.is_empty() {
        println!("No audio input devices found.");
    }
    for (i, name) in devices.iter().enumerate() {
        println!("  [{i}] {name}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal_backend"))]
fn list_devices() -> sidetone::Result<()> {
    println!("Built without the cpal backend; no devices to list.");
    Ok(())
}

fn apply(monitor: &Monitor, command: Command) {
    match command {
        Command::Louder => {
            monitor.set_gain(monitor.applied_gain() + GAIN_STEP);
        }
        Command::Quieter => {
            monitor.set_gain(monitor.applied_gain() - GAIN_STEP);
        }
        Command::Waveform => monitor.set_mode(VisualizerMode::Waveform),
        Command::Frequency => monitor.set_mode(VisualizerMode::Frequency),
        Command::Start => {
            if let Err(err) = monitor.start(monitor.settings()) {
                warn!("{err}");
            }
        }
        Command::Stop => monitor.stop(),
        Command::Quit => {}
    }
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    let spawned = std::thread::Builder::new()
        .name("sidetone-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                for command in line.trim().chars().filter_map(Command::parse) {
                    if tx.send(command).is_err() {
                        return;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        warn!(%err, "stdin commands unavailable");
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_into_settings() {
        let cli = Cli::parse_from(["sidetone", "--gain", "3", "--latency", "balanced", "--noise-suppression"]);
        let settings = cli.settings().clamped();
        assert_eq!(settings.gain, 2.0);
        assert_eq!(settings.latency_hint, LatencyHint::Balanced);
        assert!(settings.noise_suppression);
        assert!(!settings.echo_cancellation);
    }

    #[test]
    fn command_characters() {
        let parsed: Vec<_> = "+-wfsxq?".chars().filter_map(Command::parse).collect();
        assert_eq!(parsed.len(), 7);
        assert_eq!(parsed[0], Command::Louder);
        assert_eq!(parsed[6], Command::Quit);
    }
}
