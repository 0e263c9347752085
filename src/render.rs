use crate::{catalog::ClassCatalog, detection::DetectionResult, error::HandlerError};
use image::{ImageFormat, ImageReader, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
    rect::Rect,
};
use std::{io, path::Path};

const UNKNOWN_CLASS_COLOR: [u8; 3] = [255, 255, 255];

/// Draws every detection onto a copy of `source` and saves it as a jpeg.
pub fn save_annotated(
    source: &Path,
    detections: &[DetectionResult],
    catalog: &ClassCatalog,
    dest: &Path,
) -> Result<(), HandlerError> {
    let output_err = |e: image::ImageError| HandlerError::Output {
        path: dest.to_path_buf(),
        source: io::Error::other(e),
    };

    let mut canvas = ImageReader::open(source)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| HandlerError::Output {
            path: dest.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(output_err)?
        .to_rgb8();

    annotate(&mut canvas, detections, catalog);

    canvas
        .save_with_format(dest, ImageFormat::Jpeg)
        .map_err(output_err)
}

pub fn annotate(canvas: &mut RgbImage, detections: &[DetectionResult], catalog: &ClassCatalog) {
    let (img_width, img_height) = canvas.dimensions();
    let thickness = ((img_width + img_height) / 600).max(1) as i32;

    for detection in detections {
        let color = Rgb(catalog
            .get(detection.class_id)
            .map(|entry| entry.color)
            .unwrap_or(UNKNOWN_CLASS_COLOR));

        let (x1, y1, x2, y2) = detection.bbox.corners();
        let left = (x1 * img_width as f32).round() as i32;
        let top = (y1 * img_height as f32).round() as i32;
        let width = ((x2 - x1) * img_width as f32).round().max(1.) as u32;
        let height = ((y2 - y1) * img_height as f32).round().max(1.) as u32;

        for t in 0..thickness {
            let rect = Rect::at(left - t, top - t)
                .of_size(width + 2 * t as u32, height + 2 * t as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        for keypoint in detection.keypoints.iter().flatten() {
            let center = (
                (keypoint.x * img_width as f32).round() as i32,
                (keypoint.y * img_height as f32).round() as i32,
            );
            draw_filled_circle_mut(canvas, center, thickness + 2, color);
        }
    }
}
