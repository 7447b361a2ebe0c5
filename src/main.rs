//! cam-session binary: list cameras or capture from one.

use std::thread;
use std::time::Duration;

use cam_session::{
    CaptureError, CaptureSession, Device, DiscardPolicy, DriverContext, FeatureSync,
    OperationMode, Options, V4l2Driver,
};
use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture frames from a V4L2 camera")]
struct Args {
    /// Device name, or a fragment of it. Defaults to the first device found.
    #[arg(long, env = "CAM_SESSION_DEVICE")]
    device: Option<String>,

    /// Index into the device's mode list (see --list). Defaults to the first mode.
    #[arg(long, env = "CAM_SESSION_MODE")]
    mode: Option<usize>,

    /// Use the legacy link operation mode.
    #[arg(long)]
    legacy: bool,

    /// Skip queued frames so each capture is the newest one.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    discard_backlog: bool,

    /// Frames to capture before exiting; 0 runs until interrupted.
    #[arg(long, default_value_t = 100)]
    frames: u64,

    /// List devices and their modes, then exit.
    #[arg(long)]
    list: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> cam_session::Result<()> {
    let context = DriverContext::new(V4l2Driver::new());

    if args.list {
        for device in context.devices(false)? {
            print_device(&device);
        }
        return Ok(());
    }

    let device = select_device(&context, args.device.as_deref())?;
    let mut options = Options::default()
        .with_operation_mode(if args.legacy {
            OperationMode::Legacy
        } else {
            OperationMode::Extended
        })
        .with_discard_policy(if args.discard_backlog {
            DiscardPolicy::DropBacklog
        } else {
            DiscardPolicy::OldestFirst
        });
    if let Some(index) = args.mode {
        let mode = device.modes.get(index).copied().ok_or_else(|| {
            CaptureError::InitFailure(format!(
                "{} has {} modes, no mode {index}",
                device.name,
                device.modes.len()
            ))
        })?;
        options = options.with_video_mode(mode);
    }

    let mut session = CaptureSession::create(&context, options, Some(&device))?;
    let mut features = FeatureSync::new(session.controls())?;
    for feature in features.features() {
        let state = feature.applied();
        log::info!(
            "{}: {} ({}), value {}",
            feature.name(),
            if state.on { "on" } else { "off" },
            state.mode,
            state.value
        );
    }

    println!("Device: {}", device.name);
    println!("Mode: {}", session.video_mode());
    session.start()?;

    let mut captured = 0u64;
    while args.frames == 0 || captured < args.frames {
        let report = features.sync();
        if !report.is_clean() {
            log::debug!("{} feature update(s) failed", report.errors.len());
        }

        if !session.check_new_frame()? {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        let Some(frame) = session.get_frame() else {
            continue;
        };

        let center = frame.rgb_at(frame.width() / 2, frame.height() / 2);
        println!(
            "Frame {}: {}x{}, timestamp: {:?}, center: {center:?}",
            frame.sequence(),
            frame.width(),
            frame.height(),
            frame.timestamp()
        );
        captured += 1;
    }

    session.stop();
    if let Some(err) = session.cleanup_error() {
        log::warn!("cleanup failed: {err}");
    }
    Ok(())
}

fn select_device(
    context: &DriverContext<V4l2Driver>,
    name: Option<&str>,
) -> cam_session::Result<Device> {
    let found = match name {
        Some(name) => match context.find_device_by_name(name)? {
            Some(device) => Some(device),
            None => context.find_device_by_name_contains(name)?,
        },
        None => context.devices(false)?.into_iter().next(),
    };
    found.ok_or(CaptureError::NoDeviceAvailable)
}

fn print_device(device: &Device) {
    let state = if device.connected { "" } else { " (disconnected)" };
    println!("{} {}{state}", device.id, device.name);
    for (index, mode) in device.modes.iter().enumerate() {
        println!("  {index:>3}: {mode}");
    }
}
