//! Draw detection boxes onto a downloaded frame.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use lookout_types::images::{DetectionResult, JoinedImage};

const BOX_COLOR: Rgba<u8> = Rgba([255, 64, 64, 255]);
const BOX_THICKNESS: i32 = 2;

/// Find the image whose join key or source matches `key`.
pub fn find_image<'a>(images: &'a [JoinedImage], key: &str) -> Option<&'a JoinedImage> {
    images
        .iter()
        .find(|joined| joined.image.join_key() == Some(key) || joined.image.source == key)
}

pub fn annotate(frame: &mut RgbaImage, detections: &DetectionResult) {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    for detection in &detections.results {
        let (left, top, right, bottom) = detection.overlay().to_pixels(width, height);
        draw_rectangle(
            frame,
            left.round() as i32,
            top.round() as i32,
            right.round() as i32,
            bottom.round() as i32,
            BOX_COLOR,
        );
    }
}

fn draw_rectangle(image: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    if x0 > max_x || y0 > max_y || x1 < 0 || y1 < 0 {
        return;
    }
    let (x0, x1) = (x0.clamp(0, max_x), x1.clamp(0, max_x));
    let (y0, y1) = (y0.clamp(0, max_y), y1.clamp(0, max_y));
    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            put(image, x, y0 + t, color);
            put(image, x, y1 - t, color);
        }
        for y in y0..=y1 {
            put(image, x0 + t, y, color);
            put(image, x1 - t, y, color);
        }
    }
}

fn put(image: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Decode `bytes`, draw the boxes and write a PNG to `output`.
pub fn write_annotated(bytes: &[u8], detections: Option<&DetectionResult>, output: &Path) -> Result<()> {
    let mut frame = image::load_from_memory(bytes)
        .context("failed to decode frame")?
        .to_rgba8();
    if let Some(detections) = detections {
        annotate(&mut frame, detections);
    }
    frame
        .save_with_format(output, ImageFormat::Png)
        .map_err(|err| anyhow!("failed to write {}: {err}", output.display()))
}
