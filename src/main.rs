//! n3dsxl-capture - N3DSXL USB capture CLI

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use n3dsxl_capture::audio::CpalOutput;
use n3dsxl_capture::config::{Args, Command, RunArgs, Settings};
use n3dsxl_capture::device::{DeviceLink, SimulatedDevice};
use n3dsxl_capture::pipeline::{Pipeline, PipelineHandle, SlotPool};
use n3dsxl_capture::video::{FrameSink, VideoFrame};

/// Frame rate of the simulated board
const SIMULATED_FPS: u32 = 60;

/// Interval between throughput reports
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.clone().unwrap_or_default();

    let safe = matches!(&command, Command::Run(run) if run.safe);
    let (settings, load_error) = if safe {
        (Settings::default(), None)
    } else {
        match Settings::load_default() {
            Ok(settings) => (settings, None),
            Err(e) => (Settings::default(), Some(e)),
        }
    };

    init_logging(&args, &settings)?;
    let load_failed = load_error.is_some();
    if let Some(e) = load_error {
        warn!("{}; using defaults", e);
    }

    match command {
        Command::Run(run) => cmd_run(run, settings, load_failed),
        Command::Probe { simulate } => cmd_probe(simulate),
        Command::Config { write } => cmd_config(&settings, write),
    }
}

fn init_logging(args: &Args, settings: &Settings) -> Result<()> {
    let level = match args.log_level() {
        Some(level) => level.to_string(),
        None => settings.log_level.clone(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| (!settings.log_file.is_empty()).then(|| settings.log_file.clone()));

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)
            .with_context(|| format!("Failed to create log file '{}'", log_file))?;
        subscriber.with_ansi(false).with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn open_link(simulate: bool) -> Result<Box<dyn DeviceLink>> {
    if simulate {
        info!("Using simulated board at {} fps", SIMULATED_FPS);
        return Ok(Box::new(SimulatedDevice::paced(SIMULATED_FPS)));
    }
    hardware_link()
}

#[cfg(feature = "ftd3xx")]
fn hardware_link() -> Result<Box<dyn DeviceLink>> {
    Ok(Box::new(n3dsxl_capture::device::Ftd3xxLink::new()))
}

#[cfg(not(feature = "ftd3xx"))]
fn hardware_link() -> Result<Box<dyn DeviceLink>> {
    bail!("Built without the `ftd3xx` feature; rebuild with it or pass --simulate")
}

/// Frame sink for running without a display: counts frames and reports
/// throughput
struct HeadlessSink {
    placeholder: Option<VideoFrame>,
    showing_placeholder: bool,
    frames: u64,
    window_frames: u64,
    window_start: Instant,
}

impl HeadlessSink {
    fn new(placeholder: Option<VideoFrame>) -> Self {
        Self {
            placeholder,
            showing_placeholder: false,
            frames: 0,
            window_frames: 0,
            window_start: Instant::now(),
        }
    }

    fn report(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed < REPORT_INTERVAL {
            return;
        }
        let fps = self.window_frames as f64 / elapsed.as_secs_f64();
        info!("Video: {:.1} fps ({} frames total)", fps, self.frames);
        self.window_frames = 0;
        self.window_start = Instant::now();
    }
}

impl FrameSink for HeadlessSink {
    fn present(&mut self, _frame: &VideoFrame) {
        if self.showing_placeholder {
            info!("Signal acquired");
            self.showing_placeholder = false;
        }
        self.frames += 1;
        self.window_frames += 1;
        self.report();
    }

    fn present_placeholder(&mut self) {
        if !self.showing_placeholder {
            info!("No signal");
            self.showing_placeholder = true;
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Read single-letter commands from stdin until the pipeline stops
fn spawn_console(handle: PipelineHandle) -> Result<()> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "c" => handle.toggle_connection(),
                    "a" => handle.set_auto_connect(!handle.auto_connect()),
                    "m" => {
                        let muted = handle.volume().toggle_mute();
                        info!("Mute {}", if muted { "on" } else { "off" });
                    }
                    "+" => info!("Volume {}", handle.volume().step_up()),
                    "-" => info!("Volume {}", handle.volume().step_down()),
                    "s" => info!("Connection: {}", handle.connection_state()),
                    "q" => {
                        handle.stop();
                        break;
                    }
                    "" => {}
                    other => warn!("Unknown command '{}' (c, a, m, +, -, s, q)", other),
                }
                if !handle.is_running() {
                    break;
                }
            }
            debug!("Console closed");
        })?;
    Ok(())
}

/// Capture until interrupted
fn cmd_run(run: RunArgs, mut settings: Settings, settings_load_failed: bool) -> Result<()> {
    println!("n3dsxl-capture {}\n", n3dsxl_capture::VERSION);

    let mut config = settings.to_pipeline_config();
    config.auto_connect |= run.auto;

    let placeholder_path = run.placeholder.clone().or_else(|| settings.placeholder_path());
    let placeholder = match placeholder_path {
        Some(path) => match VideoFrame::load_png(&path) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Placeholder {:?} not used: {}", path, e);
                None
            }
        },
        None => None,
    };

    let link = open_link(run.simulate)?;
    let mut pipeline = Pipeline::new(config);
    let handle = pipeline.handle();

    {
        let handle = handle.clone();
        ctrlc::set_handler(move || {
            println!("\nReceived Ctrl+C, stopping...");
            handle.stop();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    if run.no_audio {
        pipeline.start_video_only(link)?;
    } else {
        pipeline.start(link, CpalOutput::new)?;
    }

    spawn_console(handle.clone())?;
    println!("Capture running. Commands: c=connect/disconnect a=auto m=mute +/-=volume q=quit\n");

    let mut sink = HeadlessSink::new(placeholder);
    let consumer = pipeline.run_video(&mut sink);

    // Volume and mute carry over to the next run
    settings.volume = handle.volume().volume();
    settings.mute = handle.volume().is_muted();

    pipeline.shutdown()?;
    println!(
        "Stopped ({} frames presented, {} discarded).",
        consumer.presented(),
        consumer.discarded()
    );

    if let Some(path) = &run.snapshot {
        let placeholder = sink.placeholder.as_ref();
        save_snapshot(path, consumer.presented() > 0, consumer.frame(), placeholder)?;
    }

    if run.persist_on_exit(settings_load_failed) {
        if let Err(e) = settings.save_default() {
            error!("Failed to save settings: {}", e);
        }
    } else if settings_load_failed {
        warn!("Settings file could not be loaded, leaving it unchanged");
    }

    Ok(())
}

fn save_snapshot(
    path: &Path,
    has_frame: bool,
    frame: &VideoFrame,
    placeholder: Option<&VideoFrame>,
) -> Result<()> {
    let image = match (has_frame, placeholder) {
        (true, _) => frame,
        (false, Some(placeholder)) => placeholder,
        (false, None) => {
            warn!("No frame captured, snapshot is black");
            frame
        }
    };
    image
        .save_png(path)
        .with_context(|| format!("Failed to save snapshot {:?}", path))?;
    println!("Snapshot saved to {}", path.display());
    Ok(())
}

/// Connect once, reap one transfer and disconnect
fn cmd_probe(simulate: bool) -> Result<()> {
    let mut link = open_link(simulate)?;
    let slots = SlotPool::new();

    println!("Probing {} board...", link.name());
    if let Err(e) = link.connect(&slots) {
        println!("Connect failed: {}", e);
        return Err(e.into());
    }
    println!("Connected and identified.");

    let result = link.reap_or_abort(0, &slots);
    link.disconnect();

    match result {
        Ok(()) => {
            println!(
                "First transfer: {} of {} bytes.",
                slots.received(0),
                slots.capacity()
            );
            Ok(())
        }
        Err(e) => {
            println!("Transfer failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the effective configuration or write a sample file
fn cmd_config(settings: &Settings, write: bool) -> Result<()> {
    let path = Settings::default_path();

    if write {
        let Some(path) = path else {
            bail!("No user configuration directory on this platform");
        };
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Settings::sample_config())?;
        println!("Wrote sample configuration to {}", path.display());
        return Ok(());
    }

    match &path {
        Some(path) if path.exists() => println!("# {}\n", path.display()),
        Some(path) => println!("# {} (not present, defaults)\n", path.display()),
        None => println!("# defaults\n"),
    }
    print!("{}", toml::to_string_pretty(settings)?);
    Ok(())
}
