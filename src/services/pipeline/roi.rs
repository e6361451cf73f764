//! Region-of-interest geometry: extraction, upscaling and mapping detector
//! boxes back into frame coordinates

use crate::domain::types::BoundingBox;
use crate::infra::config::RoiConfig;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Pixel rectangle inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn crop(&self, image: &RgbImage) -> RgbImage {
        imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image()
    }
}

/// ROI of a `frame_width` x `frame_height` frame, `None` when it is empty.
///
/// Top/left edges clamp to `[0, dim - 1]`, bottom/right to `[0, dim]`.
pub fn roi_rect(frame_width: u32, frame_height: u32, roi: &RoiConfig) -> Option<PixelRect> {
    if frame_width == 0 || frame_height == 0 {
        return None;
    }
    let w = frame_width as i64;
    let h = frame_height as i64;

    let y1 = ((h as f64 * roi.top) as i64).clamp(0, h - 1);
    let y2 = ((h as f64 * roi.bottom) as i64).clamp(0, h);
    let x1 = ((w as f64 * roi.left) as i64).clamp(0, w - 1);
    let x2 = ((w as f64 * roi.right) as i64).clamp(0, w);

    if y2 <= y1 || x2 <= x1 {
        return None;
    }
    Some(PixelRect { x: x1 as u32, y: y1 as u32, width: (x2 - x1) as u32, height: (y2 - y1) as u32 })
}

/// Enlarge `image` by `factor` with bicubic filtering. Factors that are not
/// finite and positive leave the image unchanged.
pub fn upscale(image: &RgbImage, factor: f64) -> RgbImage {
    if !factor.is_finite() || factor <= 0.0 || factor == 1.0 {
        return image.clone();
    }
    let (w, h) = image.dimensions();
    let new_w = ((w as f64 * factor).round() as u32).max(1);
    let new_h = ((h as f64 * factor).round() as u32).max(1);
    imageops::resize(image, new_w, new_h, FilterType::CatmullRom)
}

/// Map a box in upscaled-ROI coordinates to a crop of the original frame.
///
/// Corners are divided by `factor`, offset by the ROI origin, truncated and
/// clamped to `[0, dim - 1]`. Returns `None` for a degenerate result.
pub fn map_to_frame(
    bbox: &BoundingBox,
    roi: &PixelRect,
    factor: f64,
    frame_width: u32,
    frame_height: u32,
) -> Option<PixelRect> {
    if frame_width == 0 || frame_height == 0 {
        return None;
    }
    let factor = if factor.is_finite() && factor > 0.0 { factor } else { 1.0 };
    let max_x = frame_width as i64 - 1;
    let max_y = frame_height as i64 - 1;

    let x1 = ((bbox.x1 / factor + roi.x as f64) as i64).clamp(0, max_x);
    let y1 = ((bbox.y1 / factor + roi.y as f64) as i64).clamp(0, max_y);
    let x2 = ((bbox.x2 / factor + roi.x as f64) as i64).clamp(0, max_x);
    let y2 = ((bbox.y2 / factor + roi.y as f64) as i64).clamp(0, max_y);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(PixelRect { x: x1 as u32, y: y1 as u32, width: (x2 - x1) as u32, height: (y2 - y1) as u32 })
}
