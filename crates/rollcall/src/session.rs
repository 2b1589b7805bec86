//! A capture session: one thread pulling camera frames, one thread
//! recognizing faces in them.
//!
//! The threads only meet through two [`LatestSlot`]s. Capture overwrites
//! the raw frame slot; processing takes whatever is newest, so frames are
//! dropped under load rather than queued.

use image::RgbImage;
use rollcall_core::{
    AttendanceLog, EmbeddingStore, LatestSlot, MarkOutcome, ProcessedFrame, RecognitionPipeline,
    SharedAnalyzer,
};
use rollcall_hw::{frame, Camera, CameraError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Sleep between polls of an empty frame slot.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Anything that yields camera frames. `next_frame` may block.
pub trait FrameSource: Send + 'static {
    type Error: std::fmt::Display;

    fn next_frame(&mut self) -> Result<RgbImage, Self::Error>;
}

impl FrameSource for Camera {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
        self.capture_frame().map(|f| f.image)
    }
}

/// Cooperative stop signal shared by the session workers.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reported to the shell as attendance is recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Marked { label: String, time: chrono::NaiveTime },
}

/// Long-lived state the processing worker needs.
#[derive(Clone)]
pub struct SessionContext {
    pub analyzer: SharedAnalyzer,
    pub store: Arc<EmbeddingStore>,
    pub log: Arc<AttendanceLog>,
    pub pipeline: Arc<RecognitionPipeline>,
    /// Frames are resized to this size on capture.
    pub display: (u32, u32),
    pub events: Option<UnboundedSender<SessionEvent>>,
}

pub type FrameSlot = LatestSlot<Arc<RgbImage>>;
pub type AnnotatedSlot = LatestSlot<Arc<ProcessedFrame>>;

/// A running capture + processing pair. Stopping (or dropping) the session
/// cancels both workers, waits for them, releases the camera and clears
/// both slots.
pub struct Session {
    cancel: CancelToken,
    workers: Vec<JoinHandle<()>>,
    frames: Arc<FrameSlot>,
    annotated: Arc<AnnotatedSlot>,
}

impl Session {
    /// Spawn the capture and processing threads.
    pub fn start<S: FrameSource>(source: S, ctx: SessionContext) -> std::io::Result<Self> {
        let cancel = CancelToken::new();
        let frames = Arc::new(FrameSlot::new());
        let annotated = Arc::new(AnnotatedSlot::new());

        let mut session = Self {
            cancel: cancel.clone(),
            workers: Vec::with_capacity(2),
            frames: Arc::clone(&frames),
            annotated: Arc::clone(&annotated),
        };

        let capture = {
            let cancel = cancel.clone();
            let frames = Arc::clone(&frames);
            let display = ctx.display;
            std::thread::Builder::new()
                .name("rollcall-capture".into())
                .spawn(move || run_capture(source, &frames, display, &cancel))?
        };
        session.workers.push(capture);

        // On failure `session` drops here, which stops the capture thread.
        let processing = std::thread::Builder::new()
            .name("rollcall-process".into())
            .spawn(move || run_processing(&ctx, &frames, &annotated, &cancel))?;
        session.workers.push(processing);

        tracing::info!("session started");
        Ok(session)
    }

    /// Most recent annotated frame, for the preview refresh.
    pub fn annotated(&self) -> &Arc<AnnotatedSlot> {
        &self.annotated
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                tracing::error!(thread = %name, "session thread panicked");
            }
        }
        self.frames.clear();
        self.annotated.clear();
        tracing::info!("session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Publish frames until cancelled. Failed reads are retried immediately.
fn run_capture<S: FrameSource>(
    mut source: S,
    frames: &FrameSlot,
    (width, height): (u32, u32),
    cancel: &CancelToken,
) {
    tracing::debug!("capture thread started");
    while !cancel.is_cancelled() {
        match source.next_frame() {
            Ok(image) => {
                frames.publish(Arc::new(frame::fit_display(image, width, height)));
            }
            Err(e) => tracing::trace!(error = %e, "frame capture failed; retrying"),
        }
    }
    drop(source);
    tracing::debug!("capture thread exiting; camera released");
}

/// Recognize the newest frame, mark attendance, publish the annotation.
fn run_processing(
    ctx: &SessionContext,
    frames: &FrameSlot,
    annotated: &AnnotatedSlot,
    cancel: &CancelToken,
) {
    tracing::debug!("processing thread started");
    while !cancel.is_cancelled() {
        let Some(frame) = frames.take() else {
            std::thread::sleep(IDLE_POLL);
            continue;
        };

        let gallery = ctx.store.faces();
        let result = {
            let mut analyzer = ctx.analyzer.lock().unwrap_or_else(PoisonError::into_inner);
            ctx.pipeline.run_pass(&frame, &mut *analyzer, &gallery, &ctx.log)
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "recognition pass failed");
                continue;
            }
        };

        if let Some(events) = &ctx.events {
            for (label, outcome) in &report.marks {
                if let MarkOutcome::Recorded(time) = outcome {
                    let _ = events.send(SessionEvent::Marked {
                        label: label.clone(),
                        time: *time,
                    });
                }
            }
        }

        annotated.publish(Arc::new(report.frame));
    }
    tracing::debug!("processing thread exiting");
}
