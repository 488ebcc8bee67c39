//! Panel captions
//!
//! A 5×7 bitmap font covering A–Z, drawn at 2× scale in a strip above each
//! panel of the comparison image. Lowercase input is drawn as uppercase; any
//! other character advances the pen without drawing.

use image::{Rgb, RgbImage};

/// Glyph cell size before scaling
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// Pixel scale of every glyph dot
const SCALE: u32 = 2;

/// Horizontal space between glyphs, in scaled pixels
const TRACKING: u32 = 2;

/// Left and top margin of the text inside the strip
const MARGIN: u32 = 5;

/// Height of the caption strip above each panel
pub const CAPTION_HEIGHT: u32 = GLYPH_HEIGHT * SCALE + 2 * MARGIN;

/// Caption text color
pub const CAPTION_INK: Rgb<u8> = Rgb([0, 0, 0]);

/// Rows of each letter, most significant of the low five bits is the leftmost dot
const LETTERS: [[u8; 7]; 26] = [
    [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11], // A
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E], // B
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E], // C
    [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E], // D
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F], // E
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10], // F
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F], // G
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11], // H
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E], // I
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C], // J
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11], // K
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F], // L
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11], // M
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11], // N
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E], // O
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10], // P
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D], // Q
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11], // R
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E], // S
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04], // T
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E], // U
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04], // V
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A], // W
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11], // X
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04], // Y
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F], // Z
];

fn glyph(c: char) -> Option<&'static [u8; 7]> {
    let c = c.to_ascii_uppercase();
    c.is_ascii_uppercase()
        .then(|| &LETTERS[(c as u8 - b'A') as usize])
}

/// Draw `text` into the strip starting at (`x`, `y`), clipped to `max_width`
///
/// `y` is the top of the strip; the text sits inside its margins.
pub fn draw_caption(canvas: &mut RgbImage, text: &str, x: u32, y: u32, max_width: u32) {
    let right = (x + max_width).min(canvas.width());
    let top = y + MARGIN;
    let mut pen = x + MARGIN;

    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (0x10 >> col) == 0 {
                        continue;
                    }
                    for dy in 0..SCALE {
                        for dx in 0..SCALE {
                            let px = pen + col * SCALE + dx;
                            let py = top + row as u32 * SCALE + dy;
                            if px < right && py < canvas.height() {
                                canvas.put_pixel(px, py, CAPTION_INK);
                            }
                        }
                    }
                }
            }
        }
        pen += GLYPH_WIDTH * SCALE + TRACKING;
        if pen >= right {
            break;
        }
    }
}
