//! Frame annotation.
//!
//! Processed frames carry burned-in annotations: an outline around each
//! detected face, a label strip above it, and a timestamp strip in the
//! top-left corner. Labels are rendered as solid strips sized to the
//! text so the pipeline stays free of font rasterization; a richer
//! renderer can replace these helpers without touching the processor.

use crate::frame::{Frame, Region};

pub const WHITE: Rgb = Rgb(255, 255, 255);
pub const YELLOW: Rgb = Rgb(255, 255, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

const GLYPH_WIDTH: u32 = 6;
const STRIP_HEIGHT: u32 = 10;

fn put_pixel(frame: &mut Frame, x: u32, y: u32, color: Rgb) {
    if x >= frame.width || y >= frame.height {
        return;
    }
    let offset = ((y * frame.width + x) * 3) as usize;
    frame.data[offset] = color.0;
    frame.data[offset + 1] = color.1;
    frame.data[offset + 2] = color.2;
}

/// One-pixel rectangle outline, clipped to the frame.
pub fn draw_region_outline(frame: &mut Frame, region: &Region, color: Rgb) {
    for dx in 0..region.w {
        put_pixel(frame, region.x + dx, region.y, color);
        put_pixel(frame, region.x + dx, region.y + region.h.saturating_sub(1), color);
    }
    for dy in 0..region.h {
        put_pixel(frame, region.x, region.y + dy, color);
        put_pixel(frame, region.x + region.w.saturating_sub(1), region.y + dy, color);
    }
}

/// Solid strip standing in for rendered text. `x`/`y` may be negative;
/// the strip is clamped to the frame like any other annotation.
pub fn draw_label(frame: &mut Frame, text: &str, x: i32, y: i32, color: Rgb) {
    let x = x.max(0) as u32;
    let y = y.max(0) as u32;
    let width = text.chars().count() as u32 * GLYPH_WIDTH;
    for dy in 0..STRIP_HEIGHT {
        for dx in 0..width {
            put_pixel(frame, x + dx, y + dy, color);
        }
    }
}
