//! Configuration for a scraping run.
//!
//! Loaded from a JSON file at startup. Every field has a default, so a partial
//! file (or no file at all) is fine. Command-line flags override individual
//! values after loading.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "sold-listings.json";

/// A rectangle in relative coordinates (0.0 to 1.0).
/// Used to crop screenshots independently of their pixel size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativeRect {
    /// X position of top-left corner (0.0 = left edge, 1.0 = right edge)
    pub x: f32,
    /// Y position of top-left corner (0.0 = top edge, 1.0 = bottom edge)
    pub y: f32,
    /// Width as fraction of image width
    pub width: f32,
    /// Height as fraction of image height
    pub height: f32,
}

impl Default for RelativeRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

/// Complete run configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub preprocess: PreprocessConfig,
    pub ocr: OcrConfig,
    pub segmenter: SegmenterConfig,
    pub store: StoreConfig,
}

/// Where the gallery lives and how its markup is shaped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// First gallery page
    pub base_url: String,
    /// Upper bound on pages fetched per run
    pub max_pages: u32,
    /// Per-request timeout (seconds), also bounds the page-load wait
    pub timeout_secs: u64,
    pub user_agent: String,
    /// CSS selector for one gallery entry
    pub item_selector: String,
    /// Attribute on the gallery entry holding the image id
    pub id_attribute: String,
    /// CSS selector for the image inside a gallery entry
    pub image_selector: String,
    /// CSS selector for the per-page anchors of the pagination container
    pub pagination_selector: String,
    /// Attribute on a pagination anchor holding its page number
    pub page_attribute: String,
    /// Query parameter carrying the page number
    pub page_param: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://www.alkalinetrioarchive.com/screenshots.html".to_string(),
            max_pages: 50,
            timeout_secs: 30,
            user_agent: concat!("sold-listings/", env!("CARGO_PKG_VERSION")).to_string(),
            item_selector: "div.gallery-item".to_string(),
            id_attribute: "data-id".to_string(),
            image_selector: "img".to_string(),
            pagination_selector: ".pagination a".to_string(),
            page_attribute: "data-page".to_string(),
            page_param: "page".to_string(),
        }
    }
}

/// Pixel-level cleanup applied before OCR.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Optional crop region, applied first
    pub crop: Option<RelativeRect>,
    /// Scale factor applied after cropping (1.0 = unchanged)
    pub upscale: f32,
    /// Contrast adjustment passed to `imageops::contrast` (0.0 = unchanged)
    pub contrast: f32,
    /// Unsharp mask blur radius (0.0 disables sharpening)
    pub sharpen_sigma: f32,
    /// Unsharp mask threshold
    pub sharpen_threshold: i32,
    /// Pixels darker than this become black text, everything else white
    pub binarize_threshold: Option<u8>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            crop: None,
            upscale: 2.0,
            contrast: 30.0,
            sharpen_sigma: 1.0,
            sharpen_threshold: 2,
            binarize_threshold: None,
        }
    }
}

/// Tesseract invocation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Explicit path to the tesseract executable
    pub tesseract_path: Option<PathBuf>,
    /// Explicit tessdata directory
    pub tessdata_dir: Option<PathBuf>,
    pub language: String,
    /// Tesseract page segmentation mode
    pub psm: u8,
    /// Lines with a lower average word confidence are dropped
    pub min_confidence: f32,
    /// Lines shorter than this (after trimming) are dropped
    pub min_line_chars: usize,
    /// Download `<language>.traineddata` when no tessdata is found
    pub download_tessdata: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            tessdata_dir: None,
            language: "eng".to_string(),
            psm: 4, // Single column of variable-size text
            min_confidence: 0.0,
            min_line_chars: 2,
            download_tessdata: false,
        }
    }
}

/// Heuristics for turning OCR lines into listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// When non-empty, a title fragment must contain one of these (case-insensitive)
    pub required_keywords: Vec<String>,
    /// Shortest line accepted as a title fragment
    pub min_fragment_chars: usize,
    /// Lines searched for a seller after the price
    pub seller_lookahead: usize,
    /// Lines searched for a price after a seller line ends the title
    pub price_lookahead: usize,
    /// How far below a bare name line its rating line may appear
    pub seller_split_lookahead: usize,
    /// Extra regexes for lines that are discarded
    pub extra_reject_patterns: Vec<String>,
    /// Extra regexes for lines that end title accumulation
    pub extra_terminate_patterns: Vec<String>,
    /// Extra regexes stripped from the end of titles (sibling-product leakage)
    pub trailing_junk_patterns: Vec<String>,
    /// Extra `[misread, intended]` text replacements applied to titles
    pub ocr_corrections: Vec<[String; 2]>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            required_keywords: Vec::new(),
            min_fragment_chars: 3,
            seller_lookahead: 4,
            price_lookahead: 3,
            seller_split_lookahead: 1,
            extra_reject_patterns: Vec::new(),
            extra_terminate_patterns: Vec::new(),
            trailing_junk_patterns: Vec::new(),
            ocr_corrections: Vec::new(),
        }
    }
}

/// Output file and dedup policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub output: PathBuf,
    /// Reprocess images whose previous extraction failed
    pub retry_failed: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("listings.json"),
            retry_failed: false,
        }
    }
}

impl Config {
    /// Loads the config file.
    ///
    /// An explicit path must exist and parse. Without one, `sold-listings.json`
    /// in the working directory is used if present, falling back to defaults
    /// when it is missing or broken.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_from(explicit, Path::new(DEFAULT_CONFIG_FILE))
    }

    fn load_from(explicit: Option<&Path>, implicit: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if !implicit.exists() {
            tracing::debug!("{} not found, using default config", implicit.display());
            return Ok(Self::default());
        }

        match Self::from_file(implicit) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("{:#}. Using defaults.", e);
                Ok(Self::default())
            }
        }
    }

    /// Reads and parses one config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::info!("Config loaded from {}", path.display());
        Ok(config)
    }
}
