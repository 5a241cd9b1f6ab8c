//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
}

/// Anything that yields grayscale frames: a camera, a recording, a test
/// script. The source is released when dropped.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
            _ => None,
        }
    }

    fn to_gray(self, buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
        match self {
            PixelFormat::Yuyv => frame::yuyv_to_gray(buf, width, height),
            PixelFormat::Grey => frame::grey_to_gray(buf, width, height),
            PixelFormat::Y16 => frame::y16_to_gray(buf, width, height),
        }
    }
}

/// Requested capture geometry and per-frame processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    /// Apply CLAHE to every non-dark frame.
    pub enhance_contrast: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            enhance_contrast: false,
        }
    }
}

/// Buffers queued on the capture stream.
const STREAM_BUFFERS: u32 = 4;

/// V4L2 camera device handle. The capture stream is started on first read
/// and kept until the camera is dropped.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    enhance_contrast: bool,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, settings: &CaptureSettings) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; drivers may hand back GREY or Y16 instead.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = settings.width;
        fmt.height = settings.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            enhance_contrast: settings.enhance_contrast,
        })
    }

    /// Capture a single frame, converted to grayscale.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (sequence, image) = {
            let format = self.pixel_format;
            let (width, height) = (self.width, self.height);
            let stream = self.stream()?;
            let (buf, meta) = stream.next().map_err(dequeue_failed)?;
            (meta.sequence, format.to_gray(buf, width, height)?)
        };
        Ok(finish_frame(image, sequence, self.enhance_contrast))
    }

    /// Capture up to `count` non-dark frames, trying at most `count * 3`
    /// buffers. Returns the frames and the number of dark ones dropped.
    pub fn capture_frames(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError> {
        let mut good = Vec::with_capacity(count);
        let mut dark = 0usize;

        for _ in 0..count * 3 {
            if good.len() >= count {
                break;
            }
            let frame = self.capture_frame()?;
            if frame.is_dark {
                dark += 1;
                tracing::debug!(seq = frame.sequence, "skipping dark frame");
                continue;
            }
            good.push(frame);
        }

        Ok((good, dark))
    }

    /// Discard frames while auto-exposure settles. Uses the same stream
    /// later reads come from.
    pub fn warm_up(&mut self, frames: usize) -> Result<(), CameraError> {
        if frames == 0 {
            return Ok(());
        }
        tracing::info!(count = frames, "discarding warmup frames");
        let stream = self.stream()?;
        for _ in 0..frames {
            stream.next().map_err(dequeue_failed)?;
        }
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut MmapStream<'static>, CameraError> {
        if self.stream.is_none() {
            let stream =
                MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| {
                        CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                    })?;
            tracing::debug!(device = %self.device_path, "capture stream started");
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(CameraError::StreamingNotSupported)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

fn dequeue_failed(e: std::io::Error) -> CameraError {
    CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
}

/// Dark check first, then optional CLAHE on frames worth enhancing.
fn finish_frame(mut image: GrayImage, sequence: u32, enhance_contrast: bool) -> Frame {
    let dark = frame::is_dark_frame(&image, frame::DARK_FRACTION);
    if enhance_contrast && !dark {
        frame::clahe_enhance(&mut image, 8, 0.02);
    }
    Frame {
        image,
        timestamp: std::time::Instant::now(),
        sequence,
        is_dark: dark,
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}
