//! Persistent listing store.
//!
//! `listings.json` holds a single JSON array of listing records. Entries that
//! were already in the file are kept as raw JSON values and written back
//! unchanged, so fields this tool does not know about survive a run. New
//! records are appended and the whole array is rewritten once, at the end of
//! a run.
//!
//! Which images were processed, and how that went, is tracked in a sidecar
//! file next to the output so failed extractions can be told apart from
//! screenshots that simply had no listings.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::model::ListingRecord;

/// Sidecar file written next to the listings output.
pub const PROCESSED_FILE_NAME: &str = "processed_images.json";

/// How processing one image ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedStatus {
    /// At least one listing was extracted
    Extracted,
    /// OCR worked but no complete listing was found
    Empty,
    /// Download, decode or OCR failed
    Failed,
}

/// Sidecar entry for one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub outcome: ProcessedStatus,
    #[serde(default)]
    pub listings: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub processed_at: DateTime<Local>,
}

impl ProcessedImage {
    pub fn extracted(listings: usize, processed_at: DateTime<Local>) -> Self {
        Self {
            outcome: ProcessedStatus::Extracted,
            listings,
            reason: None,
            processed_at,
        }
    }

    pub fn empty(processed_at: DateTime<Local>) -> Self {
        Self {
            outcome: ProcessedStatus::Empty,
            listings: 0,
            reason: None,
            processed_at,
        }
    }

    pub fn failed(reason: String, processed_at: DateTime<Local>) -> Self {
        Self {
            outcome: ProcessedStatus::Failed,
            listings: 0,
            reason: Some(reason),
            processed_at,
        }
    }
}

/// What the store knows about an image id.
#[derive(Debug, PartialEq, Eq)]
pub enum SeenState<'a> {
    New,
    /// Records with this `image_id` exist in the output
    Listed,
    /// Processed before without producing listings
    Empty,
    /// A previous extraction failed
    Failed { reason: Option<&'a str> },
}

pub struct ListingStore {
    path: PathBuf,
    processed_path: PathBuf,
    existing: Vec<Value>,
    added: Vec<ListingRecord>,
    processed: BTreeMap<String, ProcessedImage>,
    listed_ids: HashSet<String>,
}

impl ListingStore {
    /// Loads the listings file and its sidecar.
    ///
    /// A missing listings file is an empty store. A listings file that is not
    /// a JSON array is an error, so existing data is never overwritten by
    /// accident. A broken sidecar only costs the failure history and is
    /// ignored with a warning.
    pub fn open(path: &Path) -> Result<Self> {
        let existing = read_listings(path)?;
        let processed_path = path.with_file_name(PROCESSED_FILE_NAME);
        let processed = read_processed(&processed_path);

        let listed_ids: HashSet<String> = existing
            .iter()
            .filter_map(|entry| entry.get("image_id"))
            .filter_map(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();

        tracing::info!(
            "Loaded {} existing listings from {} ({} images)",
            existing.len(),
            path.display(),
            listed_ids.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            processed_path,
            existing,
            added: Vec::new(),
            processed,
            listed_ids,
        })
    }

    pub fn seen_state(&self, image_id: &str) -> SeenState<'_> {
        if self.listed_ids.contains(image_id) {
            return SeenState::Listed;
        }
        match self.processed.get(image_id) {
            None => SeenState::New,
            Some(entry) => match entry.outcome {
                ProcessedStatus::Extracted => SeenState::Listed,
                ProcessedStatus::Empty => SeenState::Empty,
                ProcessedStatus::Failed => SeenState::Failed {
                    reason: entry.reason.as_deref(),
                },
            },
        }
    }

    pub fn add_listings(&mut self, records: Vec<ListingRecord>) {
        for record in &records {
            self.listed_ids.insert(record.image_id.clone());
        }
        self.added.extend(records);
    }

    pub fn record_outcome(&mut self, image_id: &str, outcome: ProcessedImage) {
        self.processed.insert(image_id.to_string(), outcome);
    }

    /// Listings added during this run.
    pub fn new_count(&self) -> usize {
        self.added.len()
    }

    pub fn total(&self) -> usize {
        self.existing.len() + self.added.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the full listings array and the sidecar.
    ///
    /// Always writes, so the first run creates `[]` even when nothing was
    /// found.
    pub fn save(&self) -> Result<()> {
        let mut all = self.existing.clone();
        for record in &self.added {
            all.push(serde_json::to_value(record).context("Failed to serialize listing")?);
        }

        write_json_atomic(&self.path, &all)?;
        write_json_atomic(&self.processed_path, &self.processed)?;

        tracing::info!(
            "Saved {} listings ({} new) to {}",
            all.len(),
            self.added.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn read_listings(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        tracing::debug!("{} not found, starting empty", path.display());
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?
    {
        Value::Array(entries) => Ok(entries),
        _ => Err(anyhow!("{} is not a JSON array", path.display())),
    }
}

fn read_processed(path: &Path) -> BTreeMap<String, ProcessedImage> {
    if !path.exists() {
        return BTreeMap::new();
    }

    let parsed = fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|contents| {
            serde_json::from_str::<BTreeMap<String, ProcessedImage>>(&contents)
                .map_err(anyhow::Error::from)
        });

    match parsed {
        Ok(processed) => processed,
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

/// Writes pretty-printed JSON through a temp file in the same directory, then
/// renames it over the target.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writeln!(tmp).with_context(|| format!("Failed to write {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListingCandidate, ListingStatus};
    use serde_json::json;
    use tempfile::tempdir;

    fn record(image_id: &str, title: &str) -> ListingRecord {
        let candidate = ListingCandidate {
            status: ListingStatus::Sold,
            date: "Sold Mar 3, 2023".to_string(),
            listing_title: title.to_string(),
            sold_price: "$19.99".to_string(),
            seller: Some("recordbin".to_string()),
        };
        ListingRecord::from_candidate(candidate, image_id, Local::now())
    }

    #[test]
    fn test_first_run_writes_empty_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");

        let store = ListingStore::open(&path).unwrap();
        assert_eq!(store.total(), 0);
        store.save().unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json!([]));
        assert!(dir.path().join(PROCESSED_FILE_NAME).exists());
    }

    #[test]
    fn test_existing_entries_survive_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let legacy = json!({
            "status": "Sold",
            "date": "Sold Jan 5, 2024",
            "listing_title": "Alkaline Trio Goddammit LP",
            "sold_price": "$40.00",
            "seller": null,
            "image_id": "12",
            "processed_at": "2024-01-06T10:00:00",
            "notes": "checked by hand"
        });
        fs::write(&path, serde_json::to_string_pretty(&json!([legacy.clone()])).unwrap()).unwrap();

        let mut store = ListingStore::open(&path).unwrap();
        assert_eq!(store.seen_state("12"), SeenState::Listed);
        assert_eq!(store.seen_state("13"), SeenState::New);

        store.add_listings(vec![record("13", "Alkaline Trio Maybe I'll Catch Fire")]);
        store.save().unwrap();

        let written: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], legacy);
        assert_eq!(written[1]["image_id"], "13");
        assert_eq!(written[1]["seller"], "recordbin");
    }

    #[test]
    fn test_legacy_key_order_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        fs::write(&path, r#"[{"image_id": "1", "zeta": 1, "alpha": 2}]"#).unwrap();

        let store = ListingStore::open(&path).unwrap();
        store.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let zeta = text.find("zeta").unwrap();
        let alpha = text.find("alpha").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_non_array_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        fs::write(&path, r#"{"image_id": "1"}"#).unwrap();

        assert!(ListingStore::open(&path).is_err());
    }

    #[test]
    fn test_unparseable_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        fs::write(&path, "[{").unwrap();

        assert!(ListingStore::open(&path).is_err());
    }

    #[test]
    fn test_outcomes_persist_in_sidecar() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");

        let mut store = ListingStore::open(&path).unwrap();
        store.record_outcome("1", ProcessedImage::empty(Local::now()));
        store.record_outcome(
            "2",
            ProcessedImage::failed("HTTP 404 Not Found".to_string(), Local::now()),
        );
        store.add_listings(vec![record("3", "Alkaline Trio Shirt")]);
        store.record_outcome("3", ProcessedImage::extracted(1, Local::now()));
        store.save().unwrap();

        let reopened = ListingStore::open(&path).unwrap();
        assert_eq!(reopened.seen_state("1"), SeenState::Empty);
        assert_eq!(
            reopened.seen_state("2"),
            SeenState::Failed {
                reason: Some("HTTP 404 Not Found")
            }
        );
        assert_eq!(reopened.seen_state("3"), SeenState::Listed);
        assert_eq!(reopened.seen_state("4"), SeenState::New);
        assert_eq!(reopened.total(), 1);
        assert_eq!(reopened.new_count(), 0);
    }

    #[test]
    fn test_broken_sidecar_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        fs::write(dir.path().join(PROCESSED_FILE_NAME), "not json").unwrap();

        let store = ListingStore::open(&path).unwrap();
        assert_eq!(store.seen_state("1"), SeenState::New);
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("listings.json");

        ListingStore::open(&path).unwrap().save().unwrap();
        assert!(path.exists());
    }
}
