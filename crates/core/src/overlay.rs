//! On-screen annotation overlay painting.
//!
//! Paints the annotations (and the pending drag preview) for one page
//! onto a transparent RGBA surface sized to the page raster. The viewer
//! composites overlay over raster; the raster itself is never touched, so
//! an annotation change only repaints this surface.

use image::{imageops, Rgba};
use tracing::warn;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use redline_engine::RgbaImage;

use crate::annotation::{Annotation, AnnotationShape, AnnotationStore, Color};
use crate::config::EditorConfig;
use crate::transform::{PageRect, PageToScreen};

/// Paint all annotations for `page_index` onto a fresh transparent
/// surface matching the raster dimensions.
pub fn paint(
    store: &AnnotationStore,
    page_index: u16,
    raster_width: u32,
    raster_height: u32,
    transform: PageToScreen,
    config: &EditorConfig,
) -> RgbaImage {
    let mut surface = RgbaImage::from_pixel(raster_width, raster_height, Rgba([0, 0, 0, 0]));

    for annotation in store.page_annotations(page_index) {
        paint_annotation(&mut surface, annotation, transform, config);
    }
    if let Some(pending) = store.pending() {
        if pending.page_index == page_index {
            paint_annotation(&mut surface, pending, transform, config);
        }
    }

    surface
}

fn paint_annotation(
    surface: &mut RgbaImage,
    annotation: &Annotation,
    transform: PageToScreen,
    config: &EditorConfig,
) {
    match &annotation.shape {
        AnnotationShape::Highlight { rect, color } => {
            fill_rect(surface, transform.apply_rect(*rect), *color);
        }
        AnnotationShape::FreeText { .. } => {
            outline_rect(surface, transform.apply_rect(annotation.bounds()), Color::BLACK);
        }
        AnnotationShape::TextEdit { .. } => {
            let screen_rect = transform.apply_rect(padded(annotation.bounds(), config.cover_padding));
            fill_rect(surface, screen_rect, Color::WHITE);
            outline_rect(surface, screen_rect, Color::BLACK);
        }
        AnnotationShape::Signature { rect, png_base64 } => {
            paint_signature(surface, transform.apply_rect(*rect), png_base64, annotation);
        }
    }
}

fn paint_signature(
    surface: &mut RgbaImage,
    screen_rect: (f32, f32, f32, f32),
    png_base64: &str,
    annotation: &Annotation,
) {
    let decoded = BASE64
        .decode(png_base64)
        .ok()
        .and_then(|bytes| image::load_from_memory(&bytes).ok());

    match decoded {
        Some(img) => {
            let (x, y, w, h) = screen_rect;
            let target_w = (w.round().max(1.0)) as u32;
            let target_h = (h.round().max(1.0)) as u32;
            let resized =
                img.resize_exact(target_w, target_h, imageops::FilterType::Triangle).to_rgba8();
            imageops::overlay(surface, &resized, x.round() as i64, y.round() as i64);
        }
        None => {
            // Unrenderable image data: keep the placement visible.
            warn!(annotation = %annotation.id, "signature image failed to decode; drawing placeholder");
            outline_rect(surface, screen_rect, Color::BLACK);
        }
    }
}

fn padded(rect: PageRect, padding: f32) -> PageRect {
    PageRect::new(
        rect.x - padding,
        rect.y - padding,
        rect.width + 2.0 * padding,
        rect.height + 2.0 * padding,
    )
}

fn clip_span(start: f32, extent: f32, limit: u32) -> Option<(u32, u32)> {
    let lo = start.round().max(0.0) as u32;
    let hi = ((start + extent).round().max(0.0) as u32).min(limit);
    (lo < hi).then_some((lo, hi))
}

fn fill_rect(surface: &mut RgbaImage, rect: (f32, f32, f32, f32), color: Color) {
    let (x, y, w, h) = rect;
    let Some((x0, x1)) = clip_span(x, w, surface.width()) else { return };
    let Some((y0, y1)) = clip_span(y, h, surface.height()) else { return };

    for py in y0..y1 {
        for px in x0..x1 {
            let pixel = surface.get_pixel_mut(px, py);
            *pixel = blend(*pixel, color);
        }
    }
}

fn outline_rect(surface: &mut RgbaImage, rect: (f32, f32, f32, f32), color: Color) {
    let (x, y, w, h) = rect;
    let Some((x0, x1)) = clip_span(x, w, surface.width()) else { return };
    let Some((y0, y1)) = clip_span(y, h, surface.height()) else { return };
    let stroke = Rgba([color.r, color.g, color.b, color.a]);

    for px in x0..x1 {
        surface.put_pixel(px, y0, stroke);
        surface.put_pixel(px, y1 - 1, stroke);
    }
    for py in y0..y1 {
        surface.put_pixel(x0, py, stroke);
        surface.put_pixel(x1 - 1, py, stroke);
    }
}

/// Source-over blend of `top` onto `bottom`.
fn blend(bottom: Rgba<u8>, top: Color) -> Rgba<u8> {
    let alpha = top.a as f32 / 255.0;
    let inv = 1.0 - alpha;
    let channel = |t: u8, b: u8| (t as f32 * alpha + b as f32 * inv).round() as u8;

    Rgba([
        channel(top.r, bottom[0]),
        channel(top.g, bottom[1]),
        channel(top.b, bottom[2]),
        ((top.a as f32 + bottom[3] as f32 * inv).round().min(255.0)) as u8,
    ])
}
