// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use depthwatch::config::{Config, DEFAULT_CONFIG_FILE};
use depthwatch::controller::{ControlShared, Controller, Timings};
use depthwatch::device::DepthDevice;
use depthwatch::device::synthetic::SyntheticDevice;
use depthwatch::errors::{AppResult, DeviceError};
use depthwatch::hub::StreamHub;
use depthwatch::maskgen::{self, Click};
use depthwatch::motion::{DETECTOR_DECIMATE, MotionPipeline};
use depthwatch::notify::MailNotifier;
use depthwatch::sounder::{AudioSounder, SerialSounder, Sounder};
use depthwatch::web::WebServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "depthwatch")]
#[command(about = "Depth-camera intrusion alarm with a web control surface")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alarm daemon (default)
    Run {
        /// Stream a generated scene instead of real hardware
        #[arg(long)]
        synthetic: bool,
    },

    /// Generate the depth clip mask from three selected pixels
    Mask {
        /// Selected pixel as U,V,RAW; pass exactly three
        #[arg(long = "point", value_name = "U,V,RAW", required = true, value_parser = Click::parse_arg)]
        points: Vec<Click>,
    },

    /// Run only the motion detector, logging per-frame scores
    Motion {
        /// Stream a generated scene instead of real hardware
        #[arg(long)]
        synthetic: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=depthwatch=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run { synthetic: false }) {
        Commands::Run { synthetic } => run(config, synthetic),
        Commands::Mask { points } => generate_mask(points),
        Commands::Motion { synthetic } => watch_motion(config, synthetic),
    }
}

fn open_device(synthetic: bool) -> AppResult<Box<dyn DepthDevice>> {
    if synthetic {
        info!("Using the synthetic scene device");
        Ok(Box::new(SyntheticDevice::new()))
    } else {
        // The hardware binding is provided by an out-of-tree driver crate
        Err(DeviceError::NoBackend.into())
    }
}

fn run(config: Config, synthetic: bool) -> Result<(), Box<dyn std::error::Error>> {
    let device = open_device(synthetic)?;
    let hub = StreamHub::start(device, config.invert_camera);
    let shared = Arc::new(ControlShared::new());
    let mut web = match WebServer::start(&config.web, Arc::clone(&hub), Arc::clone(&shared)) {
        Ok(web) => web,
        Err(e) => {
            hub.stop();
            return Err(e.into());
        }
    };

    let notifier = Box::new(MailNotifier::new(config.smtp.clone()));
    let sounder: Box<dyn Sounder> = match &config.serial_port {
        Some(port) => Box::new(SerialSounder::new(port.clone())),
        None => Box::new(AudioSounder::new(config.playback_command.clone())),
    };

    let mut controller = Controller::new(
        Arc::clone(&hub),
        Arc::clone(&shared),
        config.detector.clone(),
        Timings::from_config(&config),
        notifier,
        sounder,
    );

    let ctrlc_shared = Arc::clone(&shared);
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        ctrlc_shared.shutdown();
    })?;

    controller.run();

    // The hub goes first: closing its subscriptions ends any live preview
    // bodies, which lets the web server drain its connections
    hub.stop();
    web.stop();
    Ok(())
}

fn generate_mask(points: Vec<Click>) -> Result<(), Box<dyn std::error::Error>> {
    let points: [Click; 3] = points
        .try_into()
        .map_err(|points: Vec<Click>| format!("expected exactly 3 points, got {}", points.len()))?;
    maskgen::generate_and_save(&points)?;
    Ok(())
}

fn watch_motion(config: Config, synthetic: bool) -> Result<(), Box<dyn std::error::Error>> {
    let device = open_device(synthetic)?;
    let hub = StreamHub::start(device, config.invert_camera);

    let keep_running = Arc::new(AtomicBool::new(true));
    let ctrlc_flag = Arc::clone(&keep_running);
    ctrlc::set_handler(move || {
        ctrlc_flag.store(false, Ordering::SeqCst);
    })?;

    let mut stream = hub.subscribe_depth(DETECTOR_DECIMATE)?;
    let mut pipeline = MotionPipeline::new(config.detector, MotionPipeline::load_clip_mask());

    while keep_running.load(Ordering::SeqCst) {
        let Ok(raw) = stream.recv() else {
            break;
        };
        match pipeline.observe(&raw) {
            Some(obs) => info!(
                motion = obs.motion,
                lost = obs.lost,
                triggered = obs.triggered,
                "Frame scored"
            ),
            None => debug!("Detector warming up"),
        }
    }

    drop(stream);
    hub.stop();
    Ok(())
}
