//! Still-image operations on the `image` crate.
//!
//! Everything here is synchronous and CPU-bound; callers run it on
//! `spawn_blocking`.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba};

use crate::error::TransformError;
use crate::operation::{ImageFilter, ImageFormat, Operation};
use crate::transform::TransformOutput;

/// Largest side length an output may have, in pixels.
pub const MAX_OUTPUT_SIDE: u32 = 16_384;

/// Apply an image operation to encoded image bytes.
///
/// The output keeps the input's format unless the operation converts it;
/// inputs in a format we cannot encode come out as PNG.
pub fn apply(op: &Operation, data: &[u8]) -> Result<TransformOutput, TransformError> {
    let source_format = image::guess_format(data)
        .ok()
        .and_then(ImageFormat::from_image_format);
    let img = image::load_from_memory(data)?;

    let (img, format) = match op {
        Operation::ImageConvert { format } => (img, *format),
        Operation::ImageResize { width, height } => {
            let (w, h) = resize_target(img.dimensions(), *width, *height)?;
            (img.resize_exact(w, h, FilterType::Lanczos3), keep(source_format))
        }
        Operation::ImageUpscale { scale } => {
            let (w, h) = img.dimensions();
            let (w, h) = (w.saturating_mul(*scale), h.saturating_mul(*scale));
            check_side(w, h)?;
            (img.resize_exact(w, h, FilterType::Lanczos3), keep(source_format))
        }
        Operation::ImageFilter { filter } => (apply_filter(img, *filter), keep(source_format)),
        Operation::ImageCrop { x, y, width, height } => {
            let (w, h) = img.dimensions();
            let fits = x.checked_add(*width).is_some_and(|r| r <= w)
                && y.checked_add(*height).is_some_and(|b| b <= h);
            if !fits {
                return Err(TransformError::InvalidInput(format!(
                    "Crop area {width}x{height} at ({x}, {y}) exceeds image size {w}x{h}"
                )));
            }
            (img.crop_imm(*x, *y, *width, *height), keep(source_format))
        }
        other => {
            return Err(TransformError::Unsupported(format!(
                "{other} is not an image operation"
            )))
        }
    };

    let data = encode(img, format)?;
    Ok(TransformOutput::new(data, format.extension()))
}

fn keep(source: Option<ImageFormat>) -> ImageFormat {
    source.unwrap_or(ImageFormat::Png)
}

fn check_side(w: u32, h: u32) -> Result<(), TransformError> {
    if w == 0 || h == 0 || w > MAX_OUTPUT_SIDE || h > MAX_OUTPUT_SIDE {
        return Err(TransformError::InvalidInput(format!(
            "Output size {w}x{h} is outside 1..={MAX_OUTPUT_SIDE} pixels per side"
        )));
    }
    Ok(())
}

/// Target size for a resize; a missing side follows the aspect ratio.
fn resize_target(
    (w, h): (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(u32, u32), TransformError> {
    let scaled = |num: u32, of: u32, den: u32| -> u32 {
        ((of as f64 * num as f64 / den.max(1) as f64).round() as u32).max(1)
    };
    let target = match (width, height) {
        (Some(tw), Some(th)) => (tw, th),
        (Some(tw), None) => (tw, scaled(tw, h, w)),
        (None, Some(th)) => (scaled(th, w, h), th),
        (None, None) => (w, h),
    };
    check_side(target.0, target.1)?;
    Ok(target)
}

fn apply_filter(img: DynamicImage, filter: ImageFilter) -> DynamicImage {
    match filter {
        ImageFilter::Grayscale => img.grayscale(),
        ImageFilter::Invert => {
            let mut img = img;
            img.invert();
            img
        }
        ImageFilter::Blur => img.blur(2.0),
        ImageFilter::Sharpen => img.unsharpen(2.0, 4),
        ImageFilter::Brighten => img.brighten(30),
        ImageFilter::Contrast => img.adjust_contrast(25.0),
        ImageFilter::Sepia => sepia(img),
    }
}

fn sepia(img: DynamicImage) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for Rgba([r, g, b, _]) in rgba.pixels_mut() {
        let (fr, fg, fb) = (*r as f32, *g as f32, *b as f32);
        *r = (0.393 * fr + 0.769 * fg + 0.189 * fb).min(255.0) as u8;
        *g = (0.349 * fr + 0.686 * fg + 0.168 * fb).min(255.0) as u8;
        *b = (0.272 * fr + 0.534 * fg + 0.131 * fb).min(255.0) as u8;
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Encode into `format`. JPEG has no alpha channel; the WebP encoder only
/// takes 8-bit RGB(A).
fn encode(img: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, TransformError> {
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        ImageFormat::Webp => DynamicImage::ImageRgba8(img.to_rgba8()),
        ImageFormat::Png => img,
    };
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format.to_image_format())
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
