//! Interactive console: start/stop a capture session, register faces, and
//! keep an annotated preview image on disk while a session runs.

use crate::app::{self, App};
use crate::session::{Session, SessionEvent};
use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use rollcall_core::ProcessedFrame;
use rollcall_hw::Camera;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;

const HELP: &str = "\
commands:
  start                      open the camera and begin recognizing
  stop                       end the capture session
  register <label> <image>   add a known face from an image file
  faces                      list known faces
  today                      show today's attendance
  help                       show this message
  quit | exit                stop and leave";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Register { label: String, image: PathBuf },
    Faces,
    Today,
    Help,
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
///
/// The label is the first word after `register`; the rest of the line is
/// the image path, so paths may contain spaces.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "" => return Ok(None),
        "start" => Command::Start,
        "stop" => Command::Stop,
        "faces" => Command::Faces,
        "today" => Command::Today,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "register" => {
            let Some((label, image)) = rest.split_once(char::is_whitespace) else {
                return Err("usage: register <label> <image>".to_string());
            };
            Command::Register {
                label: label.to_string(),
                image: PathBuf::from(image.trim()),
            }
        }
        other => return Err(format!("unknown command {other:?}; type 'help'")),
    };
    Ok(Some(command))
}

pub struct Shell {
    app: App,
    session: Option<Session>,
    /// Last frame written to the preview file.
    shown: Option<Arc<ProcessedFrame>>,
    /// Labels already announced during this session.
    seen: HashSet<String>,
    preview_failed: bool,
}

impl Shell {
    pub fn new(app: App) -> Self {
        Self {
            app,
            session: None,
            shown: None,
            seen: HashSet::new(),
            preview_failed: false,
        }
    }

    /// Run until `quit`, end of input, or Ctrl-C. Any running session is
    /// stopped before returning.
    pub async fn run(mut self) -> Result<()> {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut lines = spawn_stdin_reader()?;

        let period = Duration::from_millis(self.app.config.refresh_interval_ms.max(1));
        let mut refresh = tokio::time::interval(period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        println!("{} known faces. {HELP}", self.app.store.len());

        loop {
            tokio::select! {
                _ = refresh.tick() => self.refresh(),
                Some(event) = events.recv() => report(&event),
                line = lines.recv() => {
                    let Some(line) = line else {
                        break;
                    };
                    let line = line.context("reading console input")?;
                    match parse_command(&line) {
                        Ok(Some(Command::Quit)) => break,
                        Ok(Some(command)) => self.execute(command, &events_tx).await,
                        Ok(None) => {}
                        Err(msg) => eprintln!("{msg}"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            }
        }

        self.stop_session().await;
        tracing::info!("rollcall shutting down");
        Ok(())
    }

    async fn execute(&mut self, command: Command, events: &UnboundedSender<SessionEvent>) {
        match command {
            Command::Start => self.start_session(events).await,
            Command::Stop => {
                if self.session.is_none() {
                    println!("no session running");
                }
                self.stop_session().await;
            }
            Command::Register { label, image } => self.register(label, image).await,
            Command::Faces => {
                let labels = self.app.store.labels();
                println!("{} known faces", labels.len());
                for label in labels {
                    println!("  {label}");
                }
            }
            Command::Today => {
                let today = chrono::Local::now().date_naive();
                match self.app.log.records_on(today) {
                    Ok(records) if records.is_empty() => println!("no attendance recorded today"),
                    Ok(records) => {
                        for record in records {
                            println!("  {}  {}", record.time, record.label);
                        }
                    }
                    Err(e) => eprintln!("cannot read attendance log: {e}"),
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }

    async fn start_session(&mut self, events: &UnboundedSender<SessionEvent>) {
        if self.session.is_some() {
            println!("session already running");
            return;
        }

        let config = &self.app.config;
        let (device, width, height) = (
            config.camera_device.clone(),
            config.display_width,
            config.display_height,
        );
        let opened = tokio::task::spawn_blocking(move || Camera::open(&device, width, height)).await;
        let camera = match opened {
            Ok(Ok(camera)) => camera,
            Ok(Err(e)) => {
                eprintln!("cannot open camera {}: {e}", config.camera_device);
                return;
            }
            Err(e) => {
                eprintln!("cannot open camera: {e}");
                return;
            }
        };

        match Session::start(camera, self.app.session_context(Some(events.clone()))) {
            Ok(session) => {
                self.session = Some(session);
                self.preview_failed = false;
                println!("session started");
            }
            Err(e) => eprintln!("cannot start session: {e}"),
        }
    }

    async fn stop_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        // Joining waits out the current frame and inference pass.
        if let Err(e) = tokio::task::spawn_blocking(move || session.stop()).await {
            tracing::error!(error = %e, "session teardown failed");
        }
        self.shown = None;
        self.seen.clear();
        println!("session stopped");
    }

    async fn register(&mut self, label: String, image: PathBuf) {
        let analyzer = Arc::clone(&self.app.analyzer);
        let store = Arc::clone(&self.app.store);
        let result = {
            let label = label.clone();
            tokio::task::spawn_blocking(move || app::register(&analyzer, &store, &label, &image)).await
        };
        match result {
            Ok(Ok(count)) => println!("registered {label}; {count} known faces"),
            Ok(Err(e)) => eprintln!("registration failed: {e}"),
            Err(e) => eprintln!("registration failed: {e}"),
        }
    }

    /// Timer tick: show the newest annotated frame, if any.
    fn refresh(&mut self) {
        if let Some(frame) = self.session.as_ref().and_then(|s| s.annotated().snapshot()) {
            self.show(frame);
        }
    }

    /// Rewrite the preview and announce labels not seen yet this session.
    /// A frame already shown is skipped. Returns the newly announced labels.
    fn show(&mut self, frame: Arc<ProcessedFrame>) -> Vec<String> {
        if self.shown.as_ref().is_some_and(|shown| Arc::ptr_eq(shown, &frame)) {
            return Vec::new();
        }

        if let Some(path) = &self.app.config.preview_path {
            match write_preview(path, &frame.image) {
                Ok(()) => self.preview_failed = false,
                Err(e) if !self.preview_failed => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot write preview");
                    self.preview_failed = true;
                }
                Err(_) => {}
            }
        }

        let mut announced = Vec::new();
        for label in frame.labels() {
            if self.seen.insert(label.to_string()) {
                println!("recognized {label}");
                announced.push(label.to_string());
            }
        }
        self.shown = Some(frame);
        announced
    }
}

/// Console lines from a plain thread; a blocked stdin read must not hold
/// up runtime shutdown. The channel closes at end of input.
fn spawn_stdin_reader() -> Result<UnboundedReceiver<std::io::Result<String>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawning console reader")?;
    Ok(rx)
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::Marked { label, time } => {
            println!("attendance recorded: {label} at {}", time.format("%H:%M:%S"));
        }
    }
}

/// Replace the preview JPEG so viewers never see a partial file.
pub fn write_preview(path: &Path, image: &RgbImage) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("jpg.tmp");
    image
        .save_with_format(&tmp, ImageFormat::Jpeg)
        .with_context(|| format!("encoding {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::{FakeCamera, OneFace};
    use rollcall_core::{BoundingBox, Recognition};
    use std::time::Instant;

    /// A shell whose known faces are `Alice` and whose preview goes to
    /// `dir/preview/latest.jpg`.
    fn shell(dir: &Path) -> Shell {
        let faces = dir.join("faces");
        std::fs::create_dir(&faces).unwrap();
        RgbImage::new(32, 32).save(faces.join("Alice.png")).unwrap();

        let config = Config {
            known_faces_dir: faces,
            attendance_log: dir.join("attendance.csv"),
            preview_path: Some(dir.join("preview/latest.jpg")),
            font_path: None,
            // Downsampled by 4 to the 32-wide frames OneFace recognizes.
            display_width: 128,
            display_height: 96,
            ..Config::default()
        };
        let app = App::with_analyzer(config, rollcall_core::shared(OneFace::new(32))).unwrap();
        Shell::new(app)
    }

    fn processed(width: u32, labels: &[&str]) -> Arc<ProcessedFrame> {
        let recognitions = labels
            .iter()
            .map(|label| Recognition {
                region: BoundingBox {
                    x: 0.0, y: 0.0, width: 4.0, height: 4.0, confidence: 0.9, landmarks: None,
                },
                label: Some(label.to_string()),
                distance: 0.0,
            })
            .collect();
        Arc::new(ProcessedFrame {
            image: RgbImage::new(width, 24),
            recognitions,
        })
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("start"), Ok(Some(Command::Start)));
        assert_eq!(parse_command("  stop \n"), Ok(Some(Command::Stop)));
        assert_eq!(parse_command("faces"), Ok(Some(Command::Faces)));
        assert_eq!(parse_command("today"), Ok(Some(Command::Today)));
        assert_eq!(parse_command("exit"), Ok(Some(Command::Quit)));
        assert_eq!(parse_command("quit"), Ok(Some(Command::Quit)));
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn test_parse_register() {
        assert_eq!(
            parse_command("register Alice /tmp/my photos/alice.png"),
            Ok(Some(Command::Register {
                label: "Alice".to_string(),
                image: PathBuf::from("/tmp/my photos/alice.png"),
            }))
        );
        assert!(parse_command("register Alice").is_err());
        assert!(parse_command("register").is_err());
    }

    #[test]
    fn test_parse_unknown() {
        let err = parse_command("launch").unwrap_err();
        assert!(err.contains("launch"));
    }

    #[test]
    fn test_write_preview_replaces_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache/preview.jpg");

        write_preview(&path, &RgbImage::new(8, 6)).unwrap();
        write_preview(&path, &RgbImage::new(16, 12)).unwrap();

        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (16, 12));
        assert!(!path.with_extension("jpg.tmp").exists());
    }

    #[test]
    fn test_show_writes_preview_once_per_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let mut shell = shell(tmp.path());
        let preview = tmp.path().join("preview/latest.jpg");

        let first = processed(32, &["Alice"]);
        assert_eq!(shell.show(Arc::clone(&first)), vec!["Alice"]);
        assert_eq!(image::open(&preview).unwrap().width(), 32);

        // The same frame again is neither rewritten nor re-announced.
        std::fs::remove_file(&preview).unwrap();
        assert!(shell.show(Arc::clone(&first)).is_empty());
        assert!(!preview.exists());

        // A new frame is written; Alice was already announced.
        let second = processed(48, &["Alice", "Bob"]);
        assert_eq!(shell.show(second), vec!["Bob"]);
        assert_eq!(image::open(&preview).unwrap().width(), 48);
    }

    #[test]
    fn test_refresh_without_session_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut shell = shell(tmp.path());
        shell.refresh();
        assert!(!tmp.path().join("preview/latest.jpg").exists());
        assert!(shell.seen.is_empty());
    }

    #[test]
    fn test_refresh_shows_session_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let mut shell = shell(tmp.path());
        let ctx = shell.app.session_context(None);
        let session = Session::start(FakeCamera::new(256, 192), ctx).unwrap();
        shell.session = Some(session);

        let deadline = Instant::now() + Duration::from_secs(5);
        while shell.seen.is_empty() && Instant::now() < deadline {
            shell.refresh();
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(shell.seen.contains("Alice"));
        let preview = image::open(tmp.path().join("preview/latest.jpg")).unwrap();
        assert_eq!((preview.width(), preview.height()), (128, 96));

        if let Some(session) = shell.session.take() {
            session.stop();
        }
    }
}
