//! Frame type and pixel conversion: YUYV/Y16 to grayscale, dark-frame
//! detection, CLAHE.

use image::GrayImage;

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&image, DARK_FRACTION);
        Self {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let raw = self.image.as_raw();
        if raw.is_empty() {
            return 0.0;
        }
        raw.iter().map(|&b| b as f32).sum::<f32>() / raw.len() as f32
    }
}

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRACTION: f32 = 0.95;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn to_image(
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: &'static str,
) -> Result<GrayImage, FrameError> {
    let actual = data.len();
    GrayImage::from_raw(width, height, data).ok_or(FrameError::InvalidLength {
        format,
        expected: (width * height) as usize,
        actual,
    })
}

/// Packed YUYV (4:2:2): two pixels per 4 bytes `[Y0, U, Y1, V]`; the Y
/// samples are every even byte.
pub fn yuyv_to_gray(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("YUYV", yuyv, expected)?;
    let luma = yuyv[..expected].iter().step_by(2).copied().collect();
    to_image(luma, width, height, "YUYV")
}

/// 16-bit little-endian grayscale, keeping the high byte.
pub fn y16_to_gray(y16: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("Y16", y16, expected)?;
    let luma = y16[..expected]
        .chunks_exact(2)
        .map(|px| (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8)
        .collect();
    to_image(luma, width, height, "Y16")
}

pub fn grey_to_gray(grey: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    check_len("GREY", grey, expected)?;
    to_image(grey[..expected].to_vec(), width, height, "GREY")
}

/// True when more than `threshold_pct` of pixels fall in the darkest
/// eighth of the range (0–31).
pub fn is_dark_frame(gray: &GrayImage, threshold_pct: f32) -> bool {
    let raw = gray.as_raw();
    if raw.is_empty() {
        return true;
    }
    let dark = raw.iter().filter(|&&p| p < 32).count();
    (dark as f32 / raw.len() as f32) > threshold_pct
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// A `tiles × tiles` grid of clipped-histogram CDFs, bilinearly blended
/// between tile centres.
pub fn clahe_enhance(gray: &mut GrayImage, tiles: u32, clip_limit: f32) {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let t = tiles.max(1) as usize;
    let (tile_w, tile_h) = (w / t, h / t);
    if tile_w == 0 || tile_h == 0 {
        return;
    }

    let mut cdfs = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            cdfs.push(tile_cdf(gray, col * tile_w, row * tile_h, tile_w, tile_h, clip_limit));
        }
    }

    for (x, y, pixel) in gray.enumerate_pixels_mut() {
        let v = pixel.0[0] as usize;
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, (t - 1) as f32);
        let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, (t - 1) as f32);
        let (r0, c0) = (fy as usize, fx as usize);
        let (r1, c1) = ((r0 + 1).min(t - 1), (c0 + 1).min(t - 1));
        let (dy, dx) = (fy - r0 as f32, fx - c0 as f32);

        let top = cdfs[r0 * t + c0][v] * (1.0 - dx) + cdfs[r0 * t + c1][v] * dx;
        let bottom = cdfs[r1 * t + c0][v] * (1.0 - dx) + cdfs[r1 * t + c1][v] * dx;
        pixel.0[0] = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
    }
}

fn tile_cdf(
    gray: &GrayImage,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
    clip_limit: f32,
) -> [f32; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            hist[gray.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
        }
    }

    // Clip and spread the excess evenly.
    let pixels = (w * h) as f32;
    let clip = ((clip_limit * pixels) as u32).max(1);
    let excess: u32 = hist.iter_mut().map(|bin| {
        let over = bin.saturating_sub(clip);
        *bin -= over;
        over
    }).sum();
    let (spread, leftover) = (excess / 256, (excess % 256) as usize);
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += spread + u32::from(i < leftover);
    }

    let mut cdf = [0f32; 256];
    let mut running = 0f32;
    for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
        running += count as f32;
        *slot = running;
    }
    let cdf_min = cdf.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let denom = pixels - cdf_min;
    if denom > 0.0 {
        for v in cdf.iter_mut() {
            *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
        }
    }
    cdf
}
