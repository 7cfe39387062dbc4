//! Low-fidelity page previews
//!
//! Not a renderer: glyph, path and image boxes are painted as flat gray
//! rectangles so an operator can see where content sits and that redacted
//! areas are covered. Annotations are not drawn.

use lopdf::{Document, ObjectId};

use crate::content::{page_operations, Effect, Interpreter};
use crate::error::{RedactError, Result};
use crate::geometry::BoundingBox;
use crate::resources::{page_resources, PageSpace};

const MAX_DIMENSION: u32 = 10_000;
const IMAGE_GRAY: u8 = 200;

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; (width * height) as usize],
        }
    }

    /// Fill a rectangle given in pixel coordinates, clipped to the canvas.
    fn fill(&mut self, rect: &BoundingBox, level: u8) {
        let clip = |v: f64, max: u32| v.floor().clamp(0.0, f64::from(max)) as u32;
        let (x0, x1) = (clip(rect.x0, self.width), clip(rect.x1.ceil(), self.width));
        let (y0, y1) = (clip(rect.y0, self.height), clip(rect.y1.ceil(), self.height));
        for y in y0..y1 {
            let row = (y * self.width) as usize;
            self.pixels[row + x0 as usize..row + x1 as usize].fill(level);
        }
    }

    fn outline(&mut self, rect: &BoundingBox, level: u8) {
        let edges = [
            BoundingBox::new(rect.x0, rect.y0, rect.x1, rect.y0 + 1.0),
            BoundingBox::new(rect.x0, rect.y1 - 1.0, rect.x1, rect.y1),
            BoundingBox::new(rect.x0, rect.y0, rect.x0 + 1.0, rect.y1),
            BoundingBox::new(rect.x1 - 1.0, rect.y0, rect.x1, rect.y1),
        ];
        for edge in &edges {
            self.fill(edge, level);
        }
    }

    fn encode_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| RedactError::OperationError(format!("PNG header: {}", e)))?;
            writer
                .write_image_data(&self.pixels)
                .map_err(|e| RedactError::OperationError(format!("PNG data: {}", e)))?;
        }
        Ok(out)
    }
}

fn level(gray: f64) -> u8 {
    (gray.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Rasterize a layout preview of a page at `scale` pixels per point.
pub fn render_layout(doc: &Document, page_id: ObjectId, scale: f64) -> Result<Vec<u8>> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(RedactError::InvalidRegion(format!(
            "Render scale must be positive, got {}",
            scale
        )));
    }
    let space = PageSpace::for_page(doc, page_id)?;
    let bounds = space.bounds();
    let width = (bounds.width() * scale).ceil().max(1.0);
    let height = (bounds.height() * scale).ceil().max(1.0);
    if width > f64::from(MAX_DIMENSION) || height > f64::from(MAX_DIMENSION) {
        return Err(RedactError::InvalidRegion(format!(
            "Preview of {}x{} pixels is too large",
            width, height
        )));
    }
    let mut canvas = Canvas::new(width as u32, height as u32);

    let to_pixels = |rect: &BoundingBox| {
        let page = space.rect_to_page(rect);
        BoundingBox::new(
            page.x0 * scale,
            page.y0 * scale,
            page.x1 * scale,
            page.y1 * scale,
        )
    };

    let ops = page_operations(doc, page_id)?;
    let resources = page_resources(doc, page_id);
    Interpreter::new(doc)
        .descend_into_forms()
        .run(&ops, &resources, &mut |_, _, effect| match effect {
            Effect::Text { glyphs, .. } => {
                for glyph in glyphs.iter().filter(|g| !g.text.trim().is_empty()) {
                    canvas.fill(&to_pixels(&glyph.bbox), level(glyph.fill));
                }
            }
            Effect::Paint { bbox, fill, stroke } => match (fill, stroke) {
                (Some(fill), _) => canvas.fill(&to_pixels(bbox), level(*fill)),
                (None, Some(stroke)) => canvas.outline(&to_pixels(bbox), level(*stroke)),
                (None, None) => {}
            },
            Effect::Image { bbox } => canvas.fill(&to_pixels(bbox), IMAGE_GRAY),
            Effect::Form { .. } | Effect::None => {}
        });

    canvas.encode_png()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::tests::page_with_content;

    fn decode(png_bytes: &[u8]) -> (png::OutputInfo, Vec<u8>) {
        let decoder = png::Decoder::new(png_bytes);
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        buf.truncate(info.buffer_size());
        (info, buf)
    }

    #[test]
    fn test_preview_size_follows_scale() {
        let (doc, page_id) = page_with_content("");
        let (info, pixels) = decode(&render_layout(&doc, page_id, 0.5).unwrap());
        assert_eq!((info.width, info.height), (100, 100));
        assert!(pixels.iter().all(|p| *p == 255));
    }

    #[test]
    fn test_filled_path_is_painted_in_page_orientation() {
        // Black square in the bottom-left corner of a 200x200 page
        let (doc, page_id) = page_with_content("0 g 0 0 20 20 re f");
        let (info, pixels) = decode(&render_layout(&doc, page_id, 1.0).unwrap());
        let at = |x: u32, y: u32| pixels[(y * info.width + x) as usize];
        assert_eq!(at(5, 195), 0);
        assert_eq!(at(5, 5), 255);
    }

    #[test]
    fn test_invalid_scale_is_rejected() {
        let (doc, page_id) = page_with_content("");
        assert!(render_layout(&doc, page_id, 0.0).is_err());
        assert!(render_layout(&doc, page_id, f64::NAN).is_err());
    }
}
