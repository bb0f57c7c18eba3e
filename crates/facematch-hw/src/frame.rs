//! Frame type and raw buffer conversion: YUYV, GREY, Y16 and MJPG to grayscale.

use image::{GrayImage, ImageFormat};

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let data = self.image.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoded frame is {actual:?}, negotiated {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

fn require_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn into_image(width: u32, height: u32, data: Vec<u8>) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    let actual = data.len();
    GrayImage::from_raw(width, height, data).ok_or(FrameError::InvalidLength { expected, actual })
}

/// Packed YUYV (4:2:2) to grayscale: the Y samples are every even byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    require_len(yuyv, expected)?;
    into_image(width, height, yuyv[..expected].iter().step_by(2).copied().collect())
}

/// 8-bit grayscale, copied as is.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    require_len(buf, expected)?;
    into_image(width, height, buf[..expected].to_vec())
}

/// 16-bit little-endian grayscale, keeping the high byte.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    require_len(buf, expected)?;
    into_image(
        width,
        height,
        buf[..expected].chunks_exact(2).map(|px| px[1]).collect(),
    )
}

/// Motion-JPEG frame, decoded and converted to grayscale.
pub fn mjpg_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let gray = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_luma8();
    if gray.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
            expected: (width, height),
            actual: gray.dimensions(),
        });
    }
    Ok(gray)
}
