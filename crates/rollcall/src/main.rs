use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::AttendanceLog;
use rollcall_hw::Camera;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod session;
mod shell;

#[cfg(test)]
mod testing;

use app::App;
use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam face recognition with daily attendance logging")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive console (start/stop capture, register faces)
    Run,
    /// Add a known face from an image containing exactly one face
    Register {
        /// Name recorded in the attendance log
        #[arg(short, long)]
        label: String,
        /// Image file to register
        image: PathBuf,
    },
    /// List known faces
    Faces,
    /// Print attendance records for a day
    Attendance {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Number of frames to capture
        #[arg(short, long, default_value_t = 10)]
        frames: u32,
    },
    /// Show configuration and file status as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Run => {
            let app = App::open(config)?;
            shell::Shell::new(app).run().await?;
        }
        Commands::Register { label, image } => {
            let app = App::open(config)?;
            let count = app
                .register(&label, &image)
                .with_context(|| format!("registering {label} from {}", image.display()))?;
            println!("registered {label}; {count} known faces");
        }
        Commands::Faces => {
            let app = App::open(config)?;
            let labels = app.store.labels();
            println!("{} known faces in {}", labels.len(), app.store.dir().display());
            for label in labels {
                println!("  {label}");
            }
        }
        Commands::Attendance { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let log = AttendanceLog::new(&config.attendance_log);
            let records = log
                .records_on(date)
                .with_context(|| format!("reading {}", config.attendance_log.display()))?;
            if records.is_empty() {
                println!("no attendance recorded on {date}");
            }
            for record in records {
                println!("{record}");
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test { frames } => camera_test(&config, frames)?,
        Commands::Status => {
            let status = status(&config)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Capture a few frames and report size, brightness, and frame rate.
fn camera_test(config: &Config, frames: u32) -> Result<()> {
    let mut camera = Camera::open(
        &config.camera_device,
        config.display_width,
        config.display_height,
    )
    .with_context(|| format!("opening {}", config.camera_device))?;
    println!(
        "{}: {}x{} {:?}",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );

    let started = std::time::Instant::now();
    for _ in 0..frames {
        let frame = camera.capture_frame()?;
        println!(
            "frame {:>4}  {}x{}  brightness {:>5.1}",
            frame.sequence,
            frame.image.width(),
            frame.image.height(),
            frame.avg_brightness()
        );
    }
    let elapsed = started.elapsed().as_secs_f32();
    if frames > 0 && elapsed > 0.0 {
        println!("{:.1} fps", frames as f32 / elapsed);
    }
    Ok(())
}

/// Everything here is read from disk; no models are loaded.
fn status(config: &Config) -> Result<serde_json::Value> {
    let reference_images = rollcall_core::store::image_files(&config.known_faces_dir)
        .map(|files| files.len())
        .unwrap_or(0);
    let today = chrono::Local::now().date_naive();
    let recorded_today = AttendanceLog::new(&config.attendance_log)
        .records_on(today)
        .map(|records| records.len())
        .with_context(|| format!("reading {}", config.attendance_log.display()))?;
    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();

    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "camera": {
            "device": config.camera_device,
            "present": Path::new(&config.camera_device).exists(),
        },
        "models": {
            "scrfd": { "path": scrfd, "present": Path::new(&scrfd).exists() },
            "arcface": { "path": arcface, "present": Path::new(&arcface).exists() },
        },
        "known_faces": {
            "dir": config.known_faces_dir,
            "images": reference_images,
        },
        "attendance": {
            "log": config.attendance_log,
            "today": recorded_today,
        },
        "match_threshold": config.match_threshold,
        "downsample": config.downsample,
    }))
}
