//! Raster ↔ planar float conversion

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Resize to a `side`×`side` square with bilinear (triangle) filtering
///
/// Aspect ratio is not preserved, matching how the classifiers were trained.
pub fn resize_square(image: &RgbImage, side: u32) -> RgbImage {
    if image.width() == side && image.height() == side {
        return image.clone();
    }
    imageops::resize(image, side, side, FilterType::Triangle)
}

/// Convert an RGB raster into planar C×H×W values scaled to [0, 1]
pub fn to_planes(image: &RgbImage) -> Vec<f32> {
    let plane_len = (image.width() * image.height()) as usize;
    let mut planes = vec![0.0f32; 3 * plane_len];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            planes[c * plane_len + i] = pixel.0[c] as f32 / 255.0;
        }
    }
    planes
}

/// Convert planar [0, 1] values back into an RGB raster
///
/// Values are clamped before quantization. Returns `None` if the buffer does not
/// hold exactly three planes of `width`×`height`.
pub fn from_planes(planes: &[f32], width: u32, height: u32) -> Option<RgbImage> {
    let plane_len = (width * height) as usize;
    if planes.len() != 3 * plane_len {
        return None;
    }
    let mut image = RgbImage::new(width, height);
    for (i, pixel) in image.pixels_mut().enumerate() {
        let mut rgb = [0u8; 3];
        for (c, value) in rgb.iter_mut().enumerate() {
            *value = (planes[c * plane_len + i].clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        *pixel = Rgb(rgb);
    }
    Some(image)
}
