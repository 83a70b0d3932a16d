//! Video frames, detections and overlay drawing.

use super::glyphs::{self, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use serde::{Deserialize, Serialize};

/// BGR pixel color.
pub type Bgr = [u8; 3];

pub const IDENTIFIED_COLOR: Bgr = [0, 255, 0];
pub const UNIDENTIFIED_COLOR: Bgr = [0, 0, 255];
const OUTLINE_THICKNESS: u32 = 2;
/// Distance from the top of a label to the top of its box.
const LABEL_OFFSET: u32 = 10;

/// Label recognizers use for a face they could not match.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// A packed BGR24 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap raw BGR24 bytes. Returns `None` if the length does not match.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        (data.len() == expected).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Frame of a single color.
    pub fn filled(width: u32, height: u32, color: Bgr) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Bgr> {
        let offset = self.offset(x, y)?;
        Some([self.data[offset], self.data[offset + 1], self.data[offset + 2]])
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: Bgr) {
        if let Some(offset) = self.offset(x, y) {
            self.data[offset..offset + 3].copy_from_slice(&color);
        }
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * 3)
    }

    /// Luma conversion with BT.601 integer weights.
    pub fn to_gray(&self) -> GrayFrame {
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| {
                let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((29 * b + 150 * g + 77 * r) >> 8) as u8
            })
            .collect();
        GrayFrame {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Single-channel 8-bit image handed to detectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A detected face, optionally identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub rect: Rect,
    pub label: Option<String>,
    pub confidence: Option<f32>,
}

impl Detection {
    /// Unidentified face.
    pub fn face(rect: Rect) -> Self {
        Self {
            rect,
            label: None,
            confidence: None,
        }
    }

    pub fn identified(rect: Rect, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            rect,
            label: Some(label.into()),
            confidence: Some(confidence),
        }
    }

    /// True when the face carries a label other than [`UNKNOWN_LABEL`].
    pub fn is_identified(&self) -> bool {
        self.label
            .as_deref()
            .is_some_and(|label| !label.trim().eq_ignore_ascii_case(UNKNOWN_LABEL))
    }

    /// Overlay caption, `"<label> (<confidence>)"`. `None` for bare faces
    /// that never went through identification.
    pub fn caption(&self) -> Option<String> {
        match (&self.label, self.confidence) {
            (None, None) => None,
            (label, Some(confidence)) => Some(format!(
                "{} ({:.2})",
                label.as_deref().unwrap_or(UNKNOWN_LABEL),
                confidence
            )),
            (Some(label), None) => Some(label.clone()),
        }
    }
}

/// A display-ready frame with the detections drawn on it.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame_number: u64,
    pub frame: Frame,
    pub detections: Vec<Detection>,
}

/// Draw detection outlines and captions onto `frame`. Captions sit above
/// their box in the box color. Anything outside the frame is clipped.
pub fn annotate(frame: &mut Frame, detections: &[Detection]) {
    for detection in detections {
        let color = if detection.is_identified() {
            IDENTIFIED_COLOR
        } else {
            UNIDENTIFIED_COLOR
        };
        draw_outline(frame, detection.rect, color);
        if let Some(caption) = detection.caption() {
            let top = detection.rect.y.saturating_sub(LABEL_OFFSET);
            draw_text(frame, detection.rect.x, top, &caption, color);
        }
    }
}

fn draw_text(frame: &mut Frame, x: u32, y: u32, text: &str, color: Bgr) {
    let mut cursor = x;
    for ch in text.chars() {
        if cursor >= frame.width {
            break;
        }
        if let Some(rows) = glyphs::glyph(ch) {
            for (row, bits) in (0..GLYPH_HEIGHT).zip(rows) {
                for col in 0..GLYPH_WIDTH {
                    if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        frame.set_pixel(cursor + col, y.saturating_add(row), color);
                    }
                }
            }
        }
        cursor = cursor.saturating_add(GLYPH_ADVANCE);
    }
}

fn draw_outline(frame: &mut Frame, rect: Rect, color: Bgr) {
    if rect.width == 0 || rect.height == 0 || rect.x >= frame.width || rect.y >= frame.height {
        return;
    }

    let left = rect.x;
    let top = rect.y;
    let right = rect.x.saturating_add(rect.width - 1);
    let bottom = rect.y.saturating_add(rect.height - 1);
    let x_end = right.min(frame.width - 1);
    let y_end = bottom.min(frame.height - 1);

    for y in top..=y_end {
        let horizontal_edge =
            y - top < OUTLINE_THICKNESS || bottom - y < OUTLINE_THICKNESS;
        if horizontal_edge {
            for x in left..=x_end {
                frame.set_pixel(x, y, color);
            }
            continue;
        }
        for t in 0..OUTLINE_THICKNESS {
            frame.set_pixel(left.saturating_add(t), y, color);
            if let Some(x) = right.checked_sub(t) {
                frame.set_pixel(x, y, color);
            }
        }
    }
}
