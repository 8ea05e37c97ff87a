use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

use crate::config::{PreprocessConfig, RelativeRect};

/// Prepares a screenshot for OCR.
///
/// Steps, each optional: crop, grayscale, upscale, contrast, unsharp mask,
/// binarization. Small result-card text OCRs noticeably better after
/// upscaling and sharpening.
pub fn preprocess(img: &DynamicImage, config: &PreprocessConfig) -> GrayImage {
    let mut gray = img.to_luma8();

    if let Some(region) = &config.crop {
        gray = crop_region(&gray, region);
    }

    if config.upscale > 0.0 && (config.upscale - 1.0).abs() > f32::EPSILON {
        let (w, h) = gray.dimensions();
        let new_w = ((w as f32 * config.upscale).round() as u32).max(1);
        let new_h = ((h as f32 * config.upscale).round() as u32).max(1);
        gray = imageops::resize(&gray, new_w, new_h, FilterType::Lanczos3);
    }

    if config.contrast != 0.0 {
        gray = imageops::contrast(&gray, config.contrast);
    }

    if config.sharpen_sigma > 0.0 {
        gray = imageops::unsharpen(&gray, config.sharpen_sigma, config.sharpen_threshold);
    }

    if let Some(threshold) = config.binarize_threshold {
        gray = threshold_dark_pixels(&gray, threshold);
    }

    gray
}

/// Converts image to binary by keeping only dark pixels.
///
/// Pixels darker than the threshold become black (text), everything else
/// becomes white (background). eBay renders dark text on a light page.
pub fn threshold_dark_pixels(img: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let value = if pixel[0] < threshold { 0u8 } else { 255u8 };
        output.put_pixel(x, y, Luma([value]));
    }

    output
}

/// Crops a sub-region from an image using relative coordinates.
///
/// Converts the relative rect (0.0–1.0) to absolute pixel coordinates,
/// clamps to image bounds, and returns the cropped sub-image.
pub fn crop_region(img: &GrayImage, region: &RelativeRect) -> GrayImage {
    let (w, h) = img.dimensions();

    let x0 = ((region.x.max(0.0) * w as f32) as u32).min(w);
    let y0 = ((region.y.max(0.0) * h as f32) as u32).min(h);
    let rw = ((region.width.max(0.0) * w as f32) as u32).min(w - x0);
    let rh = ((region.height.max(0.0) * h as f32) as u32).min(h - y0);

    imageops::crop_imm(img, x0, y0, rw, rh).to_image()
}
