//! Rendering of detections onto the source image.
//!
use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::nn::{DetectModel, Detection};
use crate::utils::format_confidence;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_SCALE: Scale = Scale { x: 16.0, y: 16.0 };

/// Load a TrueType font for box labels.
pub fn load_font(path: &Path) -> Result<Font<'static>> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read font file {}", path.display()))?;
    Font::try_from_vec(data).with_context(|| format!("failed to parse font {}", path.display()))
}

/// Draw bounding boxes with class labels and confidence scores on the image.
///
/// Boxes are clamped to the image bounds. Without a font only the hollow
/// rectangles are drawn.
pub fn draw_detections(
    mut frame: RgbImage,
    detections: &[Detection],
    model: &dyn DetectModel,
    font: Option<&Font<'static>>,
) -> RgbImage {
    let max_x = frame.width().saturating_sub(1) as f32;
    let max_y = frame.height().saturating_sub(1) as f32;

    for detection in detections.iter() {
        // Coordinates of top-left and bottom-right points
        // Coordinate frame basis is on the top left corner
        let x_tl = detection.bbox[0].clamp(0.0, max_x);
        let y_tl = detection.bbox[1].clamp(0.0, max_y);
        let x_br = detection.bbox[2].clamp(0.0, max_x);
        let y_br = detection.bbox[3].clamp(0.0, max_y);

        let rect_width = (x_br - x_tl).max(1.0);
        let rect_height = (y_br - y_tl).max(1.0);

        let object_rect =
            Rect::at(x_tl as i32, y_tl as i32).of_size(rect_width as u32, rect_height as u32);
        draw_hollow_rect_mut(&mut frame, object_rect, BOX_COLOR);

        if let Some(font) = font {
            let label = format!(
                "{} {}",
                model.class_name(detection.class_id),
                format_confidence(detection.confidence)
            );
            draw_text_mut(
                &mut frame,
                BOX_COLOR,
                x_tl as i32,
                y_tl as i32,
                LABEL_SCALE,
                font,
                &label,
            );
        }
    }

    frame
}
