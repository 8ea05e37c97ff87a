pub mod engine;
pub mod preprocess;
pub mod setup;

pub use engine::{OcrLine, Tesseract, TextRecognizer};
pub use setup::locate_tesseract;

use anyhow::Result;
use image::DynamicImage;

use crate::config::{OcrConfig, PreprocessConfig};
use engine::clean_lines;
use preprocess::preprocess;

/// High-level function: screenshot → cleaned text lines in reading order.
pub fn extract_lines(
    img: &DynamicImage,
    preprocess_config: &PreprocessConfig,
    ocr_config: &OcrConfig,
    recognizer: &dyn TextRecognizer,
) -> Result<Vec<String>> {
    let prepared = preprocess(img, preprocess_config);
    let (w, h) = prepared.dimensions();
    tracing::debug!("OCR input prepared: {}x{}", w, h);

    let raw = recognizer.recognize(&prepared)?;
    let lines = clean_lines(&raw, ocr_config.min_line_chars, ocr_config.min_confidence);

    tracing::debug!(
        "OCR extracted {} raw lines, {} kept (first 5): {:?}",
        raw.len(),
        lines.len(),
        lines.iter().take(5).collect::<Vec<_>>()
    );

    Ok(lines)
}
