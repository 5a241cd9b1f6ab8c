//! rollcall-hw — Camera capture for the attendance station.
//!
//! Provides V4L2-based camera access, grayscale conversion, and the
//! `FrameSource` seam the recognition session reads from.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureSettings, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
