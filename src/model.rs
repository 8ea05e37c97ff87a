//! Listing records produced by the segmenter and persisted to listings.json.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Completion status shown on an eBay result card ("Sold" or "Ended").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Sold,
    Ended,
}

impl ListingStatus {
    /// Parses the anchor keyword, ignoring case.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("sold") {
            Some(ListingStatus::Sold)
        } else if keyword.eq_ignore_ascii_case("ended") {
            Some(ListingStatus::Ended)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingStatus::Sold => write!(f, "Sold"),
            ListingStatus::Ended => write!(f, "Ended"),
        }
    }
}

/// A listing reconstructed from one screenshot, before it is tied to an image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListingCandidate {
    pub status: ListingStatus,
    /// Raw anchor text, e.g. "Sold Jan 5, 2024"
    pub date: String,
    pub listing_title: String,
    /// Normalized as `$<digits>[.<cents>]`
    pub sold_price: String,
    pub seller: Option<String>,
}

/// A persisted listing record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub status: ListingStatus,
    pub date: String,
    pub listing_title: String,
    pub sold_price: String,
    pub seller: Option<String>,
    pub image_id: String,
    pub processed_at: DateTime<Local>,
}

impl ListingRecord {
    /// Stamps a candidate with its source image and extraction time.
    pub fn from_candidate(
        candidate: ListingCandidate,
        image_id: &str,
        processed_at: DateTime<Local>,
    ) -> Self {
        Self {
            status: candidate.status,
            date: candidate.date,
            listing_title: candidate.listing_title,
            sold_price: candidate.sold_price,
            seller: candidate.seller,
            image_id: image_id.to_string(),
            processed_at,
        }
    }
}
