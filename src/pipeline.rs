//! One scraping run: list the gallery, then download, OCR and segment every
//! image the store has not seen yet.
//!
//! Images are processed one at a time. A failure on one image is logged and
//! recorded, and the run moves on to the next.

use chrono::Local;

use crate::collector::{GalleryItem, GallerySource};
use crate::config::Config;
use crate::error::ExtractError;
use crate::model::{ListingCandidate, ListingRecord};
use crate::ocr::{TextRecognizer, extract_lines};
use crate::segmenter::Segmenter;
use crate::store::{ListingStore, ProcessedImage, SeenState};

/// Result of processing one screenshot.
#[derive(Debug)]
pub enum ImageOutcome {
    Extracted(Vec<ListingCandidate>),
    /// OCR worked but produced no complete listing
    NoListings { lines: usize },
    Failed(ExtractError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub images_found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub new_listings: usize,
}

impl RunSummary {
    /// Whether the listings file gained records.
    pub fn updated(&self) -> bool {
        self.new_listings > 0
    }
}

pub struct Pipeline<'a> {
    source: &'a dyn GallerySource,
    recognizer: &'a dyn TextRecognizer,
    segmenter: &'a Segmenter,
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn GallerySource,
        recognizer: &'a dyn TextRecognizer,
        segmenter: &'a Segmenter,
        config: &'a Config,
    ) -> Self {
        Self {
            source,
            recognizer,
            segmenter,
            config,
        }
    }

    /// Downloads one screenshot and turns it into listing candidates.
    pub fn process_image(&self, item: &GalleryItem) -> ImageOutcome {
        let img = match self.source.fetch_image(&item.image_url) {
            Ok(img) => img,
            Err(e) => return ImageOutcome::Failed(e),
        };

        let lines = match extract_lines(
            &img,
            &self.config.preprocess,
            &self.config.ocr,
            self.recognizer,
        ) {
            Ok(lines) => lines,
            Err(e) => return ImageOutcome::Failed(ExtractError::Ocr(e)),
        };

        let listings = self.segmenter.segment(&lines);
        if listings.is_empty() {
            ImageOutcome::NoListings { lines: lines.len() }
        } else {
            ImageOutcome::Extracted(listings)
        }
    }

    /// Processes every unseen gallery image into `store`.
    ///
    /// Does not save the store; the caller writes it once at the end.
    pub fn run(&self, store: &mut ListingStore) -> RunSummary {
        let mut summary = RunSummary::default();

        let items = match self.source.collect() {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Gallery collection failed: {}", e);
                Vec::new()
            }
        };
        summary.images_found = items.len();

        for (idx, item) in items.iter().enumerate() {
            match store.seen_state(&item.id) {
                SeenState::New => {}
                SeenState::Failed { reason } if self.config.store.retry_failed => {
                    tracing::info!(
                        "Retrying image {} (previous failure: {})",
                        item.id,
                        reason.unwrap_or("unknown")
                    );
                }
                SeenState::Failed { reason } => {
                    tracing::warn!(
                        "Skipping image {}: previous extraction failed ({}). Use --retry-failed to reprocess.",
                        item.id,
                        reason.unwrap_or("unknown")
                    );
                    summary.skipped += 1;
                    continue;
                }
                SeenState::Listed | SeenState::Empty => {
                    tracing::debug!("Skipping already processed image {}", item.id);
                    summary.skipped += 1;
                    continue;
                }
            }

            tracing::info!(
                "Processing image {} ({}/{}): {}",
                item.id,
                idx + 1,
                items.len(),
                item.image_url
            );

            let processed_at = Local::now();
            match self.process_image(item) {
                ImageOutcome::Extracted(candidates) => {
                    let records: Vec<ListingRecord> = candidates
                        .into_iter()
                        .map(|c| ListingRecord::from_candidate(c, &item.id, processed_at))
                        .collect();

                    tracing::info!("Image {}: {} listings", item.id, records.len());
                    if let Some(first) = records.first() {
                        tracing::debug!("Sample listing: {:?}", first);
                    }

                    summary.new_listings += records.len();
                    store.record_outcome(
                        &item.id,
                        ProcessedImage::extracted(records.len(), processed_at),
                    );
                    store.add_listings(records);
                }
                ImageOutcome::NoListings { lines } => {
                    tracing::info!("Image {}: no listings in {} OCR lines", item.id, lines);
                    store.record_outcome(&item.id, ProcessedImage::empty(processed_at));
                }
                ImageOutcome::Failed(e) => {
                    tracing::error!("Image {} failed: {}", item.id, e);
                    summary.failed += 1;
                    store.record_outcome(
                        &item.id,
                        ProcessedImage::failed(e.to_string(), processed_at),
                    );
                }
            }
            summary.processed += 1;
        }

        tracing::info!(
            "Run finished: {} images, {} processed, {} skipped, {} failed, {} new listings",
            summary.images_found,
            summary.processed,
            summary.skipped,
            summary.failed,
            summary.new_listings
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectError;
    use crate::ocr::OcrLine;
    use anyhow::Result;
    use image::{DynamicImage, GrayImage};
    use serde_json::{Value, json};
    use std::cell::{Cell, RefCell};
    use std::fs;
    use tempfile::tempdir;

    const CARD: &[&str] = &[
        "Sold Jan 5, 2024",
        "Alkaline Trio Crimson Vinyl",
        "Brand New",
        "$24.99",
        "vinylfan99 98% positive (450)",
    ];

    struct FakeGallery {
        items: Vec<GalleryItem>,
        broken: RefCell<Vec<String>>,
        fetched: RefCell<Vec<String>>,
        collect_fails: bool,
    }

    impl FakeGallery {
        fn new(ids: &[&str]) -> Self {
            Self {
                items: ids
                    .iter()
                    .map(|id| GalleryItem {
                        id: id.to_string(),
                        image_url: format!("http://archive.test/shots/{}.png", id),
                    })
                    .collect(),
                broken: RefCell::new(Vec::new()),
                fetched: RefCell::new(Vec::new()),
                collect_fails: false,
            }
        }

        fn break_image(&self, id: &str) {
            self.broken
                .borrow_mut()
                .push(format!("http://archive.test/shots/{}.png", id));
        }
    }

    impl GallerySource for FakeGallery {
        fn collect(&self) -> Result<Vec<GalleryItem>, CollectError> {
            if self.collect_fails {
                return Err(CollectError::Selector("div[".to_string()));
            }
            Ok(self.items.clone())
        }

        fn fetch_image(&self, url: &str) -> Result<DynamicImage, ExtractError> {
            self.fetched.borrow_mut().push(url.to_string());
            if self.broken.borrow().iter().any(|u| u == url) {
                let err = image::load_from_memory(b"not an image").unwrap_err();
                return Err(ExtractError::Decode(err));
            }
            Ok(DynamicImage::new_luma8(8, 8))
        }
    }

    struct FakeRecognizer {
        lines: Vec<&'static str>,
        calls: Cell<usize>,
    }

    impl FakeRecognizer {
        fn new(lines: &[&'static str]) -> Self {
            Self {
                lines: lines.to_vec(),
                calls: Cell::new(0),
            }
        }
    }

    impl TextRecognizer for FakeRecognizer {
        fn recognize(&self, _img: &GrayImage) -> Result<Vec<OcrLine>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self
                .lines
                .iter()
                .map(|text| OcrLine {
                    text: text.to_string(),
                    words: Vec::new(),
                    confidence: 95.0,
                })
                .collect())
        }
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(&Config::default().segmenter).unwrap()
    }

    #[test]
    fn test_run_extracts_new_images() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let gallery = FakeGallery::new(&["1", "2"]);
        let recognizer = FakeRecognizer::new(CARD);
        let segmenter = segmenter();
        let config = Config::default();

        let mut store = ListingStore::open(&path).unwrap();
        let summary = Pipeline::new(&gallery, &recognizer, &segmenter, &config).run(&mut store);
        store.save().unwrap();

        assert_eq!(
            summary,
            RunSummary {
                images_found: 2,
                processed: 2,
                skipped: 0,
                failed: 0,
                new_listings: 2,
            }
        );
        assert!(summary.updated());

        let written: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0]["image_id"], "1");
        assert_eq!(written[1]["image_id"], "2");
        assert_eq!(written[0]["listing_title"], "Alkaline Trio Crimson Vinyl");
        assert_eq!(written[0]["sold_price"], "$24.99");
        assert_eq!(written[0]["seller"], "vinylfan99");
    }

    #[test]
    fn test_existing_image_is_not_reprocessed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let legacy = json!({
            "status": "Sold",
            "date": "Sold Dec 1, 2022",
            "listing_title": "Alkaline Trio Poster",
            "sold_price": "$15",
            "seller": null,
            "image_id": "1",
            "processed_at": "2022-12-02T08:00:00"
        });
        fs::write(&path, serde_json::to_string(&json!([legacy.clone()])).unwrap()).unwrap();

        let gallery = FakeGallery::new(&["1", "2"]);
        let recognizer = FakeRecognizer::new(CARD);
        let segmenter = segmenter();
        let config = Config::default();

        let mut store = ListingStore::open(&path).unwrap();
        let summary = Pipeline::new(&gallery, &recognizer, &segmenter, &config).run(&mut store);
        store.save().unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(recognizer.calls.get(), 1);
        assert_eq!(
            *gallery.fetched.borrow(),
            vec!["http://archive.test/shots/2.png".to_string()]
        );

        let written: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0], legacy);
        assert_eq!(written[1]["image_id"], "2");
    }

    #[test]
    fn test_failed_image_is_skipped_unless_retry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let recognizer = FakeRecognizer::new(CARD);
        let segmenter = segmenter();
        let mut config = Config::default();

        let gallery = FakeGallery::new(&["1"]);
        gallery.break_image("1");
        let mut store = ListingStore::open(&path).unwrap();
        let summary = Pipeline::new(&gallery, &recognizer, &segmenter, &config).run(&mut store);
        store.save().unwrap();
        assert_eq!(summary.failed, 1);
        assert!(!summary.updated());

        // The image is fine now, but failures are not retried by default
        let gallery = FakeGallery::new(&["1"]);
        let mut store = ListingStore::open(&path).unwrap();
        let summary = Pipeline::new(&gallery, &recognizer, &segmenter, &config).run(&mut store);
        assert_eq!(summary.skipped, 1);
        assert_eq!(recognizer.calls.get(), 0);

        config.store.retry_failed = true;
        let summary = Pipeline::new(&gallery, &recognizer, &segmenter, &config).run(&mut store);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.new_listings, 1);
        assert_eq!(recognizer.calls.get(), 1);
    }

    #[test]
    fn test_image_without_listings_is_recorded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let gallery = FakeGallery::new(&["7"]);
        let recognizer = FakeRecognizer::new(&["Shop by Category", "Related searches"]);
        let segmenter = segmenter();
        let config = Config::default();
        let pipeline = Pipeline::new(&gallery, &recognizer, &segmenter, &config);

        assert!(matches!(
            pipeline.process_image(&gallery.items[0]),
            ImageOutcome::NoListings { lines: 2 }
        ));

        let mut store = ListingStore::open(&path).unwrap();
        let summary = pipeline.run(&mut store);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.new_listings, 0);
        assert_eq!(store.seen_state("7"), SeenState::Empty);
    }

    #[test]
    fn test_collect_failure_still_saves_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let mut gallery = FakeGallery::new(&["1"]);
        gallery.collect_fails = true;
        let recognizer = FakeRecognizer::new(CARD);
        let segmenter = segmenter();
        let config = Config::default();

        let mut store = ListingStore::open(&path).unwrap();
        let summary = Pipeline::new(&gallery, &recognizer, &segmenter, &config).run(&mut store);
        store.save().unwrap();

        assert_eq!(summary, RunSummary::default());
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json!([]));
    }
}
