//! Overlay surface for labeled face boxes.
//!
//! One surface is reused for every detection pass: `prepare` clears it (and
//! resizes it if the display size changed) before the next set of boxes is
//! drawn. Label text uses a built-in 3×5 bitmap font.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const BOX_COLOR: Rgba<u8> = Rgba([0, 102, 255, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BOX_THICKNESS: i32 = 2;
const FONT_SCALE: u32 = 2;
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const LABEL_PADDING: u32 = 2;

/// Transparent RGBA surface that receives the boxes of one detection pass.
pub struct Overlay {
    surface: RgbaImage,
    boxes_drawn: usize,
}

impl Overlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: RgbaImage::new(width, height),
            boxes_drawn: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    /// Boxes drawn since the last `prepare`.
    pub fn boxes_drawn(&self) -> usize {
        self.boxes_drawn
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    /// Clear the surface for a new pass, resizing it to `width`×`height`.
    pub fn prepare(&mut self, width: u32, height: u32) {
        if self.surface.dimensions() == (width, height) {
            self.surface.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
        } else {
            self.surface = RgbaImage::new(width, height);
        }
        self.boxes_drawn = 0;
    }

    /// Draw one box outline with its label underneath.
    pub fn draw_box(&mut self, bbox: &BoundingBox, label: &str) {
        let (w, h) = self.surface.dimensions();
        if w == 0 || h == 0 {
            return;
        }

        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32;
        let bw = bbox.width.round().max(1.0) as u32;
        let bh = bbox.height.round().max(1.0) as u32;

        for t in 0..BOX_THICKNESS {
            let tw = bw.saturating_add(2 * t as u32);
            let th = bh.saturating_add(2 * t as u32);
            draw_hollow_rect_mut(
                &mut self.surface,
                Rect::at(x - t, y - t).of_size(tw, th),
                BOX_COLOR,
            );
        }

        let text_w = text_width(label).max(1);
        let band_h = GLYPH_HEIGHT * FONT_SCALE + 2 * LABEL_PADDING;
        let band_w = text_w + 2 * LABEL_PADDING;
        let band_y = (y + bh as i32 + BOX_THICKNESS).min(h as i32 - band_h as i32).max(0);
        let band_x = x.max(0).min((w as i32 - band_w as i32).max(0));

        draw_filled_rect_mut(
            &mut self.surface,
            Rect::at(band_x, band_y).of_size(band_w, band_h),
            BOX_COLOR,
        );
        draw_text(
            &mut self.surface,
            band_x + LABEL_PADDING as i32,
            band_y + LABEL_PADDING as i32,
            label,
        );

        self.boxes_drawn += 1;
    }

    /// Scale `frame` to the surface size and blend the overlay on top.
    pub fn composite(&self, frame: &GrayImage) -> RgbaImage {
        let (w, h) = self.surface.dimensions();
        let background = DynamicImage::ImageLuma8(frame.clone()).to_rgba8();
        let mut out = if background.dimensions() == (w, h) {
            background
        } else {
            imageops::resize(&background, w, h, FilterType::Triangle)
        };
        imageops::overlay(&mut out, &self.surface, 0, 0);
        out
    }
}

/// Pixel width of `text` in the bitmap font, including inter-glyph spacing.
pub fn text_width(text: &str) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        n * (GLYPH_WIDTH + 1) * FONT_SCALE - FONT_SCALE
    }
}

fn draw_text(surface: &mut RgbaImage, x: i32, y: i32, text: &str) {
    let advance = ((GLYPH_WIDTH + 1) * FONT_SCALE) as i32;
    for (i, c) in text.chars().enumerate() {
        draw_glyph(surface, x + i as i32 * advance, y, glyph(c));
    }
}

fn draw_glyph(surface: &mut RgbaImage, x: i32, y: i32, rows: [u8; 5]) {
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                continue;
            }
            let px = x + (col * FONT_SCALE) as i32;
            let py = y + (row as u32 * FONT_SCALE) as i32;
            draw_filled_rect_mut(
                surface,
                Rect::at(px, py).of_size(FONT_SCALE, FONT_SCALE),
                TEXT_COLOR,
            );
        }
    }
}

/// 3×5 glyph rows, most significant bit on the left. Letters are drawn uppercase.
fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        'A' => [2, 5, 7, 5, 5],
        'B' => [6, 5, 6, 5, 6],
        'C' => [3, 4, 4, 4, 3],
        'D' => [6, 5, 5, 5, 6],
        'E' => [7, 4, 6, 4, 7],
        'F' => [7, 4, 6, 4, 4],
        'G' => [3, 4, 5, 5, 3],
        'H' => [5, 5, 7, 5, 5],
        'I' => [7, 2, 2, 2, 7],
        'J' => [1, 1, 1, 5, 2],
        'K' => [5, 5, 6, 5, 5],
        'L' => [4, 4, 4, 4, 7],
        'M' => [5, 7, 7, 5, 5],
        'N' => [6, 5, 5, 5, 5],
        'O' => [2, 5, 5, 5, 2],
        'P' => [6, 5, 6, 4, 4],
        'Q' => [2, 5, 5, 6, 3],
        'R' => [6, 5, 6, 5, 5],
        'S' => [3, 4, 2, 1, 6],
        'T' => [7, 2, 2, 2, 2],
        'U' => [5, 5, 5, 5, 7],
        'V' => [5, 5, 5, 5, 2],
        'W' => [5, 5, 7, 7, 5],
        'X' => [5, 5, 2, 5, 5],
        'Y' => [5, 5, 2, 2, 2],
        'Z' => [7, 1, 2, 4, 7],
        '0' => [7, 5, 5, 5, 7],
        '1' => [2, 6, 2, 2, 7],
        '2' => [7, 1, 7, 4, 7],
        '3' => [7, 1, 7, 1, 7],
        '4' => [5, 5, 7, 1, 1],
        '5' => [7, 4, 7, 1, 7],
        '6' => [7, 4, 7, 5, 7],
        '7' => [7, 1, 2, 4, 4],
        '8' => [7, 5, 7, 5, 7],
        '9' => [7, 5, 7, 1, 7],
        '(' => [1, 2, 2, 2, 1],
        ')' => [4, 2, 2, 2, 4],
        '.' => [0, 0, 0, 0, 2],
        '-' => [0, 0, 7, 0, 0],
        '_' => [0, 0, 0, 0, 7],
        ' ' => [0, 0, 0, 0, 0],
        _ => [7, 1, 2, 0, 2],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    fn painted(overlay: &Overlay) -> usize {
        overlay.surface().pixels().filter(|p| p[3] > 0).count()
    }

    #[test]
    fn test_new_overlay_is_transparent() {
        let overlay = Overlay::new(64, 48);
        assert_eq!(painted(&overlay), 0);
        assert_eq!(overlay.boxes_drawn(), 0);
    }

    #[test]
    fn test_draw_box_paints_outline() {
        let mut overlay = Overlay::new(200, 200);
        overlay.draw_box(&face(20.0, 20.0, 50.0, 50.0), "alice (0.31)");
        assert_eq!(overlay.boxes_drawn(), 1);
        assert_eq!(overlay.surface().get_pixel(20, 20), &BOX_COLOR);
        // Interior stays transparent
        assert_eq!(overlay.surface().get_pixel(45, 45)[3], 0);
    }

    #[test]
    fn test_prepare_clears_previous_pass() {
        let mut overlay = Overlay::new(100, 100);
        overlay.draw_box(&face(10.0, 10.0, 30.0, 30.0), "bob");
        assert!(painted(&overlay) > 0);

        overlay.prepare(100, 100);
        assert_eq!(painted(&overlay), 0);
        assert_eq!(overlay.boxes_drawn(), 0);
    }

    #[test]
    fn test_prepare_resizes() {
        let mut overlay = Overlay::new(100, 100);
        overlay.prepare(320, 240);
        assert_eq!(overlay.dimensions(), (320, 240));
    }

    #[test]
    fn test_box_near_edge_does_not_panic() {
        let mut overlay = Overlay::new(50, 50);
        overlay.draw_box(&face(-10.0, 40.0, 80.0, 30.0), "unknown (0.92)");
        overlay.draw_box(&face(45.0, -5.0, 0.0, 0.0), "x");
        assert_eq!(overlay.boxes_drawn(), 2);
    }

    #[test]
    fn test_composite_scales_frame_to_surface() {
        let mut overlay = Overlay::new(80, 60);
        overlay.draw_box(&face(10.0, 10.0, 20.0, 20.0), "a");
        let frame = GrayImage::from_pixel(40, 30, Luma([100]));
        let out = overlay.composite(&frame);
        assert_eq!(out.dimensions(), (80, 60));
        assert_eq!(out.get_pixel(10, 10), &BOX_COLOR);
        assert_eq!(out.get_pixel(50, 5), &Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width(""), 0);
        assert_eq!(text_width("a"), GLYPH_WIDTH * FONT_SCALE);
        assert_eq!(text_width("ab"), (2 * GLYPH_WIDTH + 1) * FONT_SCALE);
    }
}
