//! Jet color map

use image::{ImageBuffer, Luma, Rgb, RgbImage};

fn channel(x: f32, center: f32) -> u8 {
    let v = (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0);
    (v * 255.0).round() as u8
}

/// Map a value in [0, 1] to a jet color (blue → cyan → yellow → red)
///
/// Values outside [0, 1] are clamped; NaN maps to the low end.
pub fn jet(value: f32) -> Rgb<u8> {
    let x = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    Rgb([channel(x, 3.0), channel(x, 2.0), channel(x, 1.0)])
}

/// Color-map a single-channel [0, 1] layer
pub fn colorize(layer: &ImageBuffer<Luma<f32>, Vec<f32>>) -> RgbImage {
    RgbImage::from_fn(layer.width(), layer.height(), |x, y| jet(layer.get_pixel(x, y).0[0]))
}
