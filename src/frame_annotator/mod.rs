//! FrameAnnotator - Label Overlay for Streamed Frames
//!
//! Burns "<label> (<pct>%)" into the top-left corner of a frame, on a dark
//! box, coloured by label. Uses the 8x8 bitmap font at 2x scale.

use crate::models::Label;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};

/// Glyph scale factor
const SCALE: u32 = 2;
/// Glyph cell size after scaling
const CELL: u32 = 8 * SCALE;
/// Top-left corner of the text box
const ORIGIN: (u32, u32) = (10, 10);
/// Padding inside the box
const PADDING: u32 = 4;

const BOX_COLOR: Rgb<u8> = Rgb([20, 20, 20]);

/// Overlay colour for a label
pub fn label_color(label: Label) -> Rgb<u8> {
    match label {
        Label::Wssv => Rgb([255, 0, 0]),
        Label::Healthy => Rgb([0, 255, 0]),
        Label::NoSubject => Rgb([0, 255, 255]),
    }
}

/// Overlay text; confidence is None when inference failed
pub fn overlay_text(label: Label, confidence: Option<f32>) -> String {
    match confidence {
        Some(c) => format!("{} ({:.1}%)", label, c * 100.0),
        None => format!("{} (n/a)", label),
    }
}

/// Draw the overlay in place, clipped to the frame
pub fn annotate(frame: &mut RgbImage, label: Label, confidence: Option<f32>) {
    let text = overlay_text(label, confidence);
    let color = label_color(label);

    let glyphs = text.chars().count() as u32;
    let box_w = glyphs * CELL + 2 * PADDING;
    let box_h = CELL + 2 * PADDING;
    fill_rect(frame, ORIGIN.0, ORIGIN.1, box_w, box_h, BOX_COLOR);

    let mut x = ORIGIN.0 + PADDING;
    let y = ORIGIN.1 + PADDING;
    for c in text.chars() {
        draw_glyph(frame, c, x, y, color);
        x += CELL;
    }
}

fn fill_rect(frame: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x1 = x0.saturating_add(w).min(frame.width());
    let y1 = y0.saturating_add(h).min(frame.height());
    for y in y0..y1 {
        for x in x0..x1 {
            frame.put_pixel(x, y, color);
        }
    }
}

fn draw_glyph(frame: &mut RgbImage, c: char, x0: u32, y0: u32, color: Rgb<u8>) {
    // Characters outside the basic set are left blank
    let Some(rows) = BASIC_FONTS.get(c) else {
        return;
    };

    for (row, bits) in rows.iter().enumerate() {
        for col in 0..8u32 {
            // Bit 0 is the leftmost pixel
            if bits & (1 << col) == 0 {
                continue;
            }
            let px = x0 + col * SCALE;
            let py = y0 + row as u32 * SCALE;
            fill_rect(frame, px, py, SCALE, SCALE, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_text() {
        assert_eq!(overlay_text(Label::Wssv, Some(0.853)), "WSSV DETECTED (85.3%)");
        assert_eq!(overlay_text(Label::Healthy, Some(0.1)), "Healthy Shrimp (10.0%)");
        assert_eq!(overlay_text(Label::NoSubject, None), "No Shrimp (n/a)");
    }

    #[test]
    fn test_annotate_draws_label_colour() {
        let mut frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        annotate(&mut frame, Label::Wssv, Some(0.9));

        let red = label_color(Label::Wssv);
        assert!(frame.pixels().any(|p| *p == red));
        assert_eq!(*frame.get_pixel(ORIGIN.0, ORIGIN.1), BOX_COLOR);

        // Outside the box is untouched
        assert_eq!(*frame.get_pixel(639, 479), Rgb([128, 128, 128]));
        assert_eq!(*frame.get_pixel(5, 5), Rgb([128, 128, 128]));
    }

    #[test]
    fn test_annotate_small_frame_is_clipped() {
        let mut frame = RgbImage::from_pixel(32, 16, Rgb([0, 0, 0]));
        annotate(&mut frame, Label::NoSubject, None);
        assert_eq!(frame.dimensions(), (32, 16));
    }

    #[test]
    fn test_label_colours_distinct() {
        let colors = [
            label_color(Label::Wssv),
            label_color(Label::Healthy),
            label_color(Label::NoSubject),
        ];
        assert_ne!(colors[0], colors[1]);
        assert_ne!(colors[1], colors[2]);
        assert_ne!(colors[0], colors[2]);
    }
}
