//! uvc-capture binary: stream a UVC camera and report what arrives.

use std::borrow::Cow;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use uvc_capture::{
    CaptureConfig, DeviceContext, Frame, FrameFormat, FrameHandler, UvcBackend, V4l2Backend,
};

/// Stream frames from a USB Video Class camera.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// USB vendor id in hex, 0 for any.
    #[arg(long, value_parser = parse_hex, global = true)]
    vendor: Option<u16>,

    /// USB product id in hex, 0 for any.
    #[arg(long, value_parser = parse_hex, global = true)]
    product: Option<u16>,

    /// USB serial number.
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Device node, e.g. /dev/video0.
    #[arg(long, global = true)]
    device: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream until Ctrl-C or the deadline (default).
    Stream(StreamArgs),
    /// List attached UVC devices.
    List,
}

#[derive(Debug, Default, clap::Args)]
struct StreamArgs {
    /// Desired width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Desired height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Desired frame rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Use the desired mode even when the device reports a default one.
    #[arg(long)]
    force: bool,

    /// Frame format to request (yuyv, mjpeg, uncompressed, ...).
    #[arg(long)]
    format: Option<FrameFormat>,

    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,

    /// Number of mmap capture buffers.
    #[arg(long)]
    buffers: Option<u32>,
}

fn parse_hex(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|err| format!("'{s}' is not a hex id: {err}"))
}

/// Frame handler that counts frames and logs their shape.
#[derive(Debug, Default)]
struct FrameLogger {
    frames: Arc<AtomicU64>,
}

impl FrameHandler for FrameLogger {
    fn handle_frame(&mut self, frame: Cow<'_, Frame>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "frame {}: {} {}x{} {} bytes",
            frame.metadata.sequence,
            frame.format,
            frame.width,
            frame.height,
            frame.data_bytes()
        );
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Command::List) => list(),
        Some(Command::Stream(args)) => stream(config, &args),
        None => stream(config, &StreamArgs::default()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<CaptureConfig, uvc_capture::ConfigError> {
    let mut config = CaptureConfig::load(cli.config.as_deref())?;
    if let Some(vendor) = cli.vendor {
        config.device.vendor_id = vendor;
    }
    if let Some(product) = cli.product {
        config.device.product_id = product;
    }
    if cli.serial.is_some() {
        config.device.serial.clone_from(&cli.serial);
    }
    if cli.device.is_some() {
        config.device.path.clone_from(&cli.device);
    }
    Ok(config)
}

fn list() -> uvc_capture::traits::Result<()> {
    let mut backend = V4l2Backend::new();
    let session = backend.init()?;
    let devices = backend.devices(&session)?;
    if devices.is_empty() {
        println!("No UVC devices found");
    }
    for device in devices {
        println!("{device}");
    }
    backend.exit(Some(session));
    Ok(())
}

fn stream(mut config: CaptureConfig, args: &StreamArgs) -> uvc_capture::traits::Result<()> {
    if let Some(width) = args.width {
        config.stream.width = width;
    }
    if let Some(height) = args.height {
        config.stream.height = height;
    }
    if let Some(fps) = args.fps {
        config.stream.fps = fps;
    }
    if args.force {
        config.stream.force = true;
    }
    if args.format.is_some() {
        config.stream.format = args.format;
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    if let Err(err) = ctrlc::set_handler(move || handler_running.store(false, Ordering::SeqCst)) {
        log::warn!("failed to install Ctrl-C handler: {err}");
    }

    let logger = FrameLogger::default();
    let frames = Arc::clone(&logger.frames);
    let backend = args
        .buffers
        .map_or_else(V4l2Backend::new, |count| V4l2Backend::new().with_buffer_count(count));
    let mut context = DeviceContext::new(backend, config);

    if let Err(err) = context.init(logger) {
        context.teardown();
        return Err(err);
    }

    let deadline = args
        .seconds
        .map(|seconds| Instant::now() + Duration::from_secs(seconds));
    while running.load(Ordering::SeqCst) && deadline.is_none_or(|end| Instant::now() < end) {
        thread::sleep(Duration::from_millis(100));
    }

    context.teardown();
    log::info!("{} frames delivered", frames.load(Ordering::Relaxed));
    Ok(())
}
