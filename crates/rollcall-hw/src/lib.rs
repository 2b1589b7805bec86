//! rollcall-hw — Webcam capture.
//!
//! Opens a V4L2 device, streams frames through mmap buffers and converts
//! them to RGB images for the recognition pipeline.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
