//! Set-of-marks annotation: numbered boxes over interactive elements.
//!
//! Markers are assigned 1..N in the exact order the elements arrive, so
//! extraction order == priority order == marker order. The oracle is told
//! that lower numbers roughly mean more important; reshuffling here would
//! break that contract.

use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as PixelRect;
use marq_common::protocol::{InteractiveElement, MarkerMapping, Rect};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

const MARK_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const LABEL_BG: Rgba<u8> = Rgba([255, 0, 0, 230]);
const LABEL_FG: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Glyph geometry: 3x5 cells scaled up, padded inside the label box.
const GLYPH_SCALE: i32 = 3;
const GLYPH_PAD: i32 = 3;
const GLYPH_W: i32 = 3 * GLYPH_SCALE;
const GLYPH_H: i32 = 5 * GLYPH_SCALE;
const LABEL_H: i32 = GLYPH_H + 2 * GLYPH_PAD;

/// Two labels closer than this (in both axes) get a local offset so they
/// do not occlude each other.
const MIN_LABEL_SEPARATION: i32 = LABEL_H + 2;

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("Failed to decode screenshot: {0}")]
    Decode(image::ImageError),
    #[error("Failed to encode marked image: {0}")]
    Encode(image::ImageError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Annotator;

impl Annotator {
    pub fn new() -> Self {
        Self
    }

    /// Produce the marked PNG and the marker mapping for one snapshot.
    ///
    /// Elements that are duplicates of an earlier element (same normalized
    /// text, same role, overlapping boxes) collapse into the earlier
    /// marker; the earlier element carries the higher priority.
    pub fn annotate(
        &self,
        screenshot_png: &[u8],
        elements: &[InteractiveElement],
    ) -> Result<(Vec<u8>, MarkerMapping), AnnotateError> {
        let deduped = collapse_duplicates(elements);

        let mut img = image::load_from_memory(screenshot_png)
            .map_err(AnnotateError::Decode)?
            .to_rgba8();

        let boxes: Vec<Rect> = deduped.iter().map(|e| e.bounding_box).collect();
        let origins = plan_label_origins(&boxes, img.width() as i32, img.height() as i32);

        let mut mapping = MarkerMapping::default();
        for (idx, element) in deduped.into_iter().enumerate() {
            let id = idx as u32 + 1;
            draw_bounding_box(&mut img, &element.bounding_box);
            draw_label(&mut img, id, origins[idx]);
            mapping.markers.insert(id, element);
        }

        debug!(markers = mapping.len(), "annotated snapshot");

        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
            .map_err(AnnotateError::Encode)?;

        Ok((out, mapping))
    }
}

/// Drop elements that render the same logical control twice. Keeps the
/// first (highest-priority) occurrence.
pub fn collapse_duplicates(elements: &[InteractiveElement]) -> Vec<InteractiveElement> {
    let mut kept: Vec<InteractiveElement> = Vec::with_capacity(elements.len());
    for candidate in elements {
        let duplicate = kept.iter().any(|existing| {
            existing.role == candidate.role
                && existing.normalized_text() == candidate.normalized_text()
                && !candidate.normalized_text().is_empty()
                && existing.bounding_box.overlaps(&candidate.bounding_box)
        });
        if !duplicate {
            kept.push(candidate.clone());
        }
    }
    kept
}

/// Choose a label origin for each box: above the box when there is room,
/// clamped to the image, nudged sideways when it would sit on top of an
/// earlier label.
pub fn plan_label_origins(boxes: &[Rect], img_w: i32, img_h: i32) -> Vec<(i32, i32)> {
    let mut origins: Vec<(i32, i32)> = Vec::with_capacity(boxes.len());
    for b in boxes {
        let mut x = (b.x as i32).clamp(0, (img_w - label_width(3)).max(0));
        let mut y = (b.y as i32 - LABEL_H - 2).max(0);
        y = y.min((img_h - LABEL_H).max(0));

        let mut shifts = 0;
        while shifts < 8
            && origins
                .iter()
                .any(|&(ox, oy)| (ox - x).abs() < MIN_LABEL_SEPARATION && (oy - y).abs() < MIN_LABEL_SEPARATION)
        {
            x += MIN_LABEL_SEPARATION;
            if x > img_w - label_width(3) {
                x = (b.x as i32).max(0);
                y += MIN_LABEL_SEPARATION;
            }
            shifts += 1;
        }
        origins.push((x, y));
    }
    origins
}

fn label_width(digits: usize) -> i32 {
    digits as i32 * (GLYPH_W + GLYPH_PAD) + GLYPH_PAD
}

fn draw_bounding_box(img: &mut RgbaImage, b: &Rect) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let x = (b.x as i32).clamp(0, w.saturating_sub(1));
    let y = (b.y as i32).clamp(0, h.saturating_sub(1));
    let bw = (b.width as i32).min(w - x).max(1);
    let bh = (b.height as i32).min(h - y).max(1);

    // Two nested hollow rects give a 2px border.
    draw_hollow_rect_mut(
        img,
        PixelRect::at(x, y).of_size(bw as u32, bh as u32),
        MARK_COLOR,
    );
    if bw > 2 && bh > 2 {
        draw_hollow_rect_mut(
            img,
            PixelRect::at(x + 1, y + 1).of_size(bw as u32 - 2, bh as u32 - 2),
            MARK_COLOR,
        );
    }
}

fn draw_label(img: &mut RgbaImage, id: u32, origin: (i32, i32)) {
    let text = id.to_string();
    let (x, y) = origin;
    let w = label_width(text.len());

    draw_filled_rect_mut(
        img,
        PixelRect::at(x, y).of_size(w as u32, LABEL_H as u32),
        LABEL_BG,
    );

    let mut cursor_x = x + GLYPH_PAD;
    for ch in text.chars() {
        draw_digit(img, ch, cursor_x, y + GLYPH_PAD);
        cursor_x += GLYPH_W + GLYPH_PAD;
    }
}

/// 3x5 bitmap digits, high-contrast white on the red label background.
/// Rendering digits from a table avoids bundling a font asset for labels
/// that are only ever numbers.
fn draw_digit(img: &mut RgbaImage, ch: char, x: i32, y: i32) {
    const GLYPHS: [[u8; 5]; 10] = [
        [0b111, 0b101, 0b101, 0b101, 0b111], // 0
        [0b010, 0b110, 0b010, 0b010, 0b111], // 1
        [0b111, 0b001, 0b111, 0b100, 0b111], // 2
        [0b111, 0b001, 0b111, 0b001, 0b111], // 3
        [0b101, 0b101, 0b111, 0b001, 0b001], // 4
        [0b111, 0b100, 0b111, 0b001, 0b111], // 5
        [0b111, 0b100, 0b111, 0b101, 0b111], // 6
        [0b111, 0b001, 0b001, 0b010, 0b010], // 7
        [0b111, 0b101, 0b111, 0b101, 0b111], // 8
        [0b111, 0b101, 0b111, 0b001, 0b111], // 9
    ];

    let Some(digit) = ch.to_digit(10) else {
        return;
    };
    let glyph = &GLYPHS[digit as usize];

    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..3 {
            if bits & (0b100 >> col) != 0 {
                draw_filled_rect_mut(
                    img,
                    PixelRect::at(x + col * GLYPH_SCALE, y + row as i32 * GLYPH_SCALE)
                        .of_size(GLYPH_SCALE as u32, GLYPH_SCALE as u32),
                    LABEL_FG,
                );
            }
        }
    }
}
