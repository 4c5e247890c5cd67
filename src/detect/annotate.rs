//! Box overlay and artifact writing.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::result::Detection;
use crate::locate::has_image_extension;

const PALETTE: &[[u8; 3]] = &[
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
];

const STREAM_JPEG_QUALITY: u8 = 80;

#[derive(Clone, Debug)]
pub struct Annotator {
    thickness: u32,
}

impl Annotator {
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness: thickness.max(1),
        }
    }

    /// Draw one outline per detection, colored by class.
    pub fn draw(&self, image: &mut RgbImage, detections: &[Detection]) {
        let (width, height) = image.dimensions();
        for detection in detections {
            let color = Rgb(PALETTE[detection.class_id % PALETTE.len()]);
            let bbox = detection.bbox.clamp(width, height);
            for inset in 0..self.thickness {
                let inset = inset as f32;
                let x = (bbox.x1 + inset).round() as i32;
                let y = (bbox.y1 + inset).round() as i32;
                let w = (bbox.width() - 2.0 * inset).round();
                let h = (bbox.height() - 2.0 * inset).round();
                if w < 1.0 || h < 1.0 {
                    break;
                }
                draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w as u32, h as u32), color);
            }
        }
    }

    /// Write an annotated image into `output_dir` under the source file name.
    ///
    /// Sources without an image extension are written as `<stem>.jpg`, so the
    /// artifact name may differ from the upload name.
    pub fn write(&self, image: &RgbImage, source: &Path, output_dir: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .context("annotated source has no file name")?;
        let mut target = output_dir.join(file_name);
        if !has_image_extension(&target) {
            target.set_extension("jpg");
        }
        let format = match ImageFormat::from_path(&target) {
            Ok(ImageFormat::Png) => ImageFormat::Png,
            _ => ImageFormat::Jpeg,
        };
        image
            .save_with_format(&target, format)
            .with_context(|| format!("write annotated image {}", target.display()))?;
        Ok(target)
    }

    /// Encode an annotated frame for the live stream.
    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::with_capacity(64 * 1024));
        JpegEncoder::new_with_quality(&mut out, STREAM_JPEG_QUALITY)
            .encode_image(image)
            .context("encode stream frame")?;
        Ok(out.into_inner())
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(3)
    }
}
