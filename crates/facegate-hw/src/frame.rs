//! Grayscale frames and raw pixel-format conversion.

use thiserror::Error;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data, row-major, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{format} buffer too short: expected {expected} bytes, got {actual}")]
    TooShort {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Packed YUYV 4:2:2 → grayscale: keep the Y byte of each `[Y0 U Y1 V]` pair.
pub fn yuyv_to_gray(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("YUYV", buf, expected)?;
    Ok(buf[..expected].iter().step_by(2).copied().collect())
}

/// 16-bit little-endian grayscale → 8-bit, keeping the high byte.
pub fn y16_to_gray(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("Y16", buf, expected)?;
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// 8-bit grayscale, trimmed to the frame size.
pub fn grey_to_gray(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    check_len("GREY", buf, expected)?;
    Ok(buf[..expected].to_vec())
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::TooShort {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// True if more than `ratio` of the pixels are below 32 (lens covered, camera still starting).
pub fn is_dark_frame(gray: &[u8], ratio: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > ratio
}
