//! Heatmap upsampling, blending and panel rendering

use super::caption::{draw_caption, CAPTION_HEIGHT};
use super::grad_cam::ClassActivationMap;
use crate::error::EngineError;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, ImageFormat, Luma, Rgb, RgbImage};
use std::io::Cursor;

/// Single-channel heatmap with values in [0, 1]
pub type HeatmapLayer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Background of the comparison image
const PANEL_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Bilinearly upsample a map to `width`×`height`
///
/// # Errors
///
/// Returns `EngineError::InvalidInput` for a zero target size or a map whose
/// buffer does not match its dimensions.
pub fn upsample(cam: &ClassActivationMap, width: u32, height: u32) -> Result<HeatmapLayer, EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidInput(
            "Heatmap target size must be positive".to_string(),
        ));
    }
    let layer: HeatmapLayer =
        ImageBuffer::from_raw(cam.width as u32, cam.height as u32, cam.values.clone()).ok_or_else(
            || EngineError::InvalidInput("Activation map buffer does not match its size".to_string()),
        )?;
    if layer.dimensions() == (width, height) {
        return Ok(layer);
    }
    let mut resized = imageops::resize(&layer, width, height, FilterType::Triangle);
    for pixel in resized.pixels_mut() {
        pixel.0[0] = pixel.0[0].clamp(0.0, 1.0);
    }
    Ok(resized)
}

/// Blend two equally sized images: `original_weight·original + heatmap_weight·heatmap`
///
/// Each channel is rounded and clipped to the u8 range.
pub fn overlay(
    original: &RgbImage,
    heatmap: &RgbImage,
    original_weight: f32,
    heatmap_weight: f32,
) -> Result<RgbImage, EngineError> {
    if original.dimensions() != heatmap.dimensions() {
        return Err(EngineError::InvalidInput(format!(
            "Overlay size mismatch: {:?} vs {:?}",
            original.dimensions(),
            heatmap.dimensions()
        )));
    }
    let mut out = RgbImage::new(original.width(), original.height());
    for ((dst, o), h) in out.pixels_mut().zip(original.pixels()).zip(heatmap.pixels()) {
        for c in 0..3 {
            let v = original_weight * o.0[c] as f32 + heatmap_weight * h.0[c] as f32;
            dst.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Place captioned images left to right with `gap` background pixels between them
///
/// Each caption is drawn in a strip of [`CAPTION_HEIGHT`] pixels above its
/// panel and clipped to the panel width. Panels are top-aligned below the
/// strip; the canvas is as tall as the tallest panel plus the strip.
pub fn compose_panels(panels: &[(&str, &RgbImage)], gap: u32) -> RgbImage {
    let width = panels.iter().map(|(_, p)| p.width()).sum::<u32>()
        + gap * panels.len().saturating_sub(1) as u32;
    let height = panels.iter().map(|(_, p)| p.height()).max().unwrap_or(0) + CAPTION_HEIGHT;

    let mut canvas = RgbImage::from_pixel(width, height, PANEL_BACKGROUND);
    let mut x = 0u32;
    for (caption, panel) in panels {
        draw_caption(&mut canvas, caption, x, 0, panel.width());
        imageops::replace(&mut canvas, *panel, x as i64, CAPTION_HEIGHT as i64);
        x += panel.width() + gap;
    }
    canvas
}

/// Encode an image as PNG bytes
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, EngineError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
