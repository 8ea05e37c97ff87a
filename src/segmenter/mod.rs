//! Splits OCR lines from one screenshot into listing candidates.
//!
//! OCR reads the stacked result cards top to bottom and interleaves them with
//! sidebar and banner text. The only reliable card boundary is the
//! "Sold/Ended <date>" anchor, so the segmenter walks the lines as a small
//! state machine:
//!
//! - `SeekingDate`: skip everything until an anchor
//! - `AccumulatingTitle`: collect title fragments until a price (or a seller
//!   line, or an end-of-results marker) ends the title
//! - `SeekingPrice`: bounded search for the price after the title was cut short
//! - `SeekingSeller`: bounded search for the seller after the price
//!
//! An anchor in any phase closes the current listing. A listing is emitted
//! only with a date, a non-empty cleaned title, and a price.

pub mod cleanup;
pub mod rules;

use anyhow::Result;

use crate::config::SegmenterConfig;
use crate::model::{ListingCandidate, ListingStatus};
use cleanup::TitleCleaner;
use rules::{LineClass, RuleSet};

/// Segmentation phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    SeekingDate,
    AccumulatingTitle,
    SeekingPrice { remaining: usize },
    SeekingSeller { remaining: usize },
}

/// A listing under construction.
#[derive(Debug)]
struct Draft {
    status: ListingStatus,
    date: String,
    fragments: Vec<String>,
    price: Option<String>,
    seller: Option<String>,
}

impl Draft {
    fn new(status: ListingStatus, date: &str) -> Self {
        Self {
            status,
            date: date.to_string(),
            fragments: Vec::new(),
            price: None,
            seller: None,
        }
    }
}

/// Line-based listing segmenter. Pure: no IO, no shared state.
#[derive(Debug)]
pub struct Segmenter {
    rules: RuleSet,
    cleaner: TitleCleaner,
    /// Lowercased
    keywords: Vec<String>,
    min_fragment_chars: usize,
    seller_lookahead: usize,
    price_lookahead: usize,
    seller_split_lookahead: usize,
}

impl Segmenter {
    pub fn new(config: &SegmenterConfig) -> Result<Self> {
        let rules = RuleSet::new(config)?;
        tracing::debug!(
            "Segmenter rules: {:?}",
            rules.rules().iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            rules,
            cleaner: TitleCleaner::new(config)?,
            keywords: config
                .required_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            min_fragment_chars: config.min_fragment_chars,
            seller_lookahead: config.seller_lookahead,
            price_lookahead: config.price_lookahead,
            seller_split_lookahead: config.seller_split_lookahead,
        })
    }

    /// Segments lines in reading order into zero or more listings.
    pub fn segment<S: AsRef<str>>(&self, lines: &[S]) -> Vec<ListingCandidate> {
        let mut listings = Vec::new();
        let mut draft: Option<Draft> = None;
        let mut phase = Phase::SeekingDate;
        let mut idx = 0;

        while idx < lines.len() {
            let line = lines[idx].as_ref().trim();
            idx += 1;
            if line.is_empty() {
                continue;
            }

            let class = self.rules.classify(line);

            if let LineClass::Anchor { status, date } = class {
                if let Some(previous) = draft.take() {
                    self.flush(previous, &mut listings);
                }
                draft = Some(Draft::new(status, date));
                phase = Phase::AccumulatingTitle;
                continue;
            }

            let Some(current) = draft.as_mut() else {
                continue;
            };

            phase = match phase {
                Phase::SeekingDate => Phase::SeekingDate,
                Phase::AccumulatingTitle => {
                    self.accumulate_title(current, class, line, lines, &mut idx)
                }
                Phase::SeekingPrice { remaining } => match class {
                    LineClass::Price(price) | LineClass::TrailingPrice { price, .. } => {
                        current.price = Some(price);
                        self.after_price(current)
                    }
                    _ => countdown(remaining, |remaining| Phase::SeekingPrice { remaining }),
                },
                Phase::SeekingSeller { remaining } => match class {
                    LineClass::Seller(name) => {
                        current.seller = Some(name.to_string());
                        Phase::SeekingDate
                    }
                    LineClass::Text => match self.split_seller(line, lines, idx, false) {
                        Some((name, consumed)) => {
                            idx += consumed;
                            current.seller = Some(name.to_string());
                            Phase::SeekingDate
                        }
                        None => countdown(remaining, |remaining| Phase::SeekingSeller { remaining }),
                    },
                    _ => countdown(remaining, |remaining| Phase::SeekingSeller { remaining }),
                },
            };
        }

        if let Some(last) = draft {
            self.flush(last, &mut listings);
        }

        listings
    }

    /// Handles one line while collecting the title. Returns the next phase.
    fn accumulate_title<S: AsRef<str>>(
        &self,
        draft: &mut Draft,
        class: LineClass<'_>,
        line: &str,
        lines: &[S],
        idx: &mut usize,
    ) -> Phase {
        match class {
            LineClass::Price(price) => {
                draft.price = Some(price);
                self.after_price(draft)
            }
            LineClass::Delimiter | LineClass::Reject | LineClass::Rating => {
                Phase::AccumulatingTitle
            }
            LineClass::Seller(name) => {
                draft.seller = Some(name.to_string());
                self.seek_price()
            }
            LineClass::TerminateTitle => self.seek_price(),
            LineClass::TrailingPrice { prefix, price } => {
                if self.is_title_like(prefix) {
                    draft.fragments.push(prefix.to_string());
                }
                draft.price = Some(price);
                self.after_price(draft)
            }
            LineClass::Text => {
                if let Some((name, consumed)) = self.split_seller(line, lines, *idx, true) {
                    *idx += consumed;
                    draft.seller = Some(name.to_string());
                    return self.seek_price();
                }
                if self.is_title_like(line) {
                    draft.fragments.push(line.to_string());
                }
                Phase::AccumulatingTitle
            }
            // Anchors are handled before dispatching on the phase
            LineClass::Anchor { .. } => Phase::AccumulatingTitle,
        }
    }

    fn after_price(&self, draft: &Draft) -> Phase {
        if draft.seller.is_some() || self.seller_lookahead == 0 {
            Phase::SeekingDate
        } else {
            Phase::SeekingSeller {
                remaining: self.seller_lookahead,
            }
        }
    }

    fn seek_price(&self) -> Phase {
        if self.price_lookahead == 0 {
            Phase::SeekingDate
        } else {
            Phase::SeekingPrice {
                remaining: self.price_lookahead,
            }
        }
    }

    /// Detects a seller name alone on its line with the rating on one of the
    /// next `seller_split_lookahead` lines. Returns the name and the number of
    /// following lines consumed.
    ///
    /// Only rejected and condition lines may sit between name and rating, so
    /// consuming them never loses a price or title fragment. While the title
    /// is still open, `require_handle` demands a digit or `_.-*` in the name
    /// so a one-word title line is not mistaken for a seller.
    fn split_seller<'a, S: AsRef<str>>(
        &self,
        line: &'a str,
        lines: &[S],
        next: usize,
        require_handle: bool,
    ) -> Option<(&'a str, usize)> {
        if !self.rules.is_seller_name(line) {
            return None;
        }
        if require_handle && !line.chars().any(|c| c.is_ascii_digit() || "_.-*".contains(c)) {
            return None;
        }

        for offset in 0..self.seller_split_lookahead {
            let candidate = lines.get(next + offset)?.as_ref().trim();
            match self.rules.classify(candidate) {
                LineClass::Rating => return Some((line, offset + 1)),
                LineClass::Reject | LineClass::Delimiter => {}
                _ => return None,
            }
        }

        None
    }

    fn is_title_like(&self, fragment: &str) -> bool {
        if fragment.chars().count() < self.min_fragment_chars {
            return false;
        }
        if !fragment.chars().any(|c| c.is_alphabetic()) {
            return false;
        }
        if self.keywords.is_empty() {
            return true;
        }
        let lower = fragment.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    fn flush(&self, draft: Draft, listings: &mut Vec<ListingCandidate>) {
        let title = self.cleaner.clean(&draft.fragments.join(" "));

        let Some(price) = draft.price else {
            tracing::debug!("Dropping '{}' ({}): no price", title, draft.date);
            return;
        };
        if title.is_empty() {
            tracing::debug!("Dropping listing at {} ({}): empty title", draft.date, price);
            return;
        }

        listings.push(ListingCandidate {
            status: draft.status,
            date: draft.date,
            listing_title: title,
            sold_price: price,
            seller: draft.seller,
        });
    }
}

/// Decrements a search window, falling back to `SeekingDate` when it runs out.
fn countdown(remaining: usize, next: impl FnOnce(usize) -> Phase) -> Phase {
    if remaining > 1 {
        next(remaining - 1)
    } else {
        Phase::SeekingDate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> Segmenter {
        Segmenter::new(&SegmenterConfig::default()).unwrap()
    }

    fn keyword_segmenter() -> Segmenter {
        Segmenter::new(&SegmenterConfig {
            required_keywords: vec!["Alkaline".to_string()],
            ..SegmenterConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_end_to_end_single_listing() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "Brand New",
            "$24.99",
            "vinylfan99 98% positive (450)",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(
            listings,
            vec![ListingCandidate {
                status: ListingStatus::Sold,
                date: "Sold Jan 5, 2024".to_string(),
                listing_title: "Alkaline Trio Crimson Vinyl".to_string(),
                sold_price: "$24.99".to_string(),
                seller: Some("vinylfan99".to_string()),
            }]
        );
    }

    #[test]
    fn test_keyword_title_with_standalone_price() {
        let lines = [
            "Shop by Category",
            "Sold Mar 3, 2023",
            "Alkaline Trio Goddamnit LP",
            "$31.00",
        ];

        let listings = keyword_segmenter().segment(&lines);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].date, "Sold Mar 3, 2023");
        assert_eq!(listings[0].listing_title, "Alkaline Trio Goddamnit LP");
        assert_eq!(listings[0].sold_price, "$31.00");
        assert_eq!(listings[0].seller, None);
    }

    #[test]
    fn test_keyword_filter_skips_unrelated_fragments() {
        let lines = [
            "Sold Mar 3, 2023",
            "Alkaline Trio Goddamnit LP",
            "Vinyl Record Collection",
            "$31.00",
        ];

        let listings = keyword_segmenter().segment(&lines);
        assert_eq!(listings[0].listing_title, "Alkaline Trio Goddamnit LP");
    }

    #[test]
    fn test_denylisted_line_does_not_end_title() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson",
            "Free shipping",
            "Vinyl LP Sealed",
            "$24.99",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].listing_title, "Alkaline Trio Crimson Vinyl LP Sealed");
        assert!(!listings[0].listing_title.contains("shipping"));
    }

    #[test]
    fn test_embedded_trailing_price() {
        let lines = ["Sold Jun 1, 2024", "Cool Shirt $24.99"];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].listing_title, "Cool Shirt");
        assert_eq!(listings[0].sold_price, "$24.99");
    }

    #[test]
    fn test_anchor_without_price_is_dropped() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Shirt",
            "Sold Feb 2, 2024",
            "Alkaline Trio Hoodie",
            "$40.00",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].date, "Sold Feb 2, 2024");
        assert_eq!(listings[0].listing_title, "Alkaline Trio Hoodie");
    }

    #[test]
    fn test_price_without_title_is_dropped() {
        let lines = ["Sold Jan 5, 2024", "Free shipping", "$12.00"];
        assert!(segmenter().segment(&lines).is_empty());
    }

    #[test]
    fn test_lines_before_first_anchor_ignored() {
        let lines = ["Alkaline Trio Poster", "$5.00", "Some sidebar text"];
        assert!(segmenter().segment(&lines).is_empty());
    }

    #[test]
    fn test_multiple_cards_and_ended_status() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "Pre-Owned",
            "$24.99",
            "+$4.99 shipping",
            "vinylfan99 98% positive (450)",
            "Ended Feb 10th, 2024",
            "Alkaline Trio",
            "Good Mourning CD",
            "Used",
            "$1,050.00",
            "Located in United States",
            "cdshack 100% (2.1K)",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].listing_title, "Alkaline Trio Crimson Vinyl");
        assert_eq!(listings[1].status, ListingStatus::Ended);
        assert_eq!(listings[1].date, "Ended Feb 10th, 2024");
        assert_eq!(listings[1].listing_title, "Alkaline Trio Good Mourning CD");
        assert_eq!(listings[1].sold_price, "$1050.00");
        assert_eq!(listings[1].seller.as_deref(), Some("cdshack"));
    }

    #[test]
    fn test_seller_split_across_two_lines() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "$24.99",
            "vinylfan99",
            "98% positive (450)",
        ];

        let listings = segmenter().segment(&lines);
        assert_eq!(listings[0].seller.as_deref(), Some("vinylfan99"));
    }

    #[test]
    fn test_seller_search_window_is_bounded() {
        let config = SegmenterConfig {
            seller_lookahead: 2,
            ..SegmenterConfig::default()
        };
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "$24.99",
            "Free shipping",
            "3 watchers",
            "vinylfan99 98% positive (450)",
        ];

        let listings = Segmenter::new(&config).unwrap().segment(&lines);
        assert_eq!(listings[0].seller, None);
    }

    #[test]
    fn test_seller_search_aborts_on_new_anchor() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "$24.99",
            "Sold Jan 6, 2024",
            "Alkaline Trio Patch",
            "$6.50",
            "patchguy 99.5% positive",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].seller, None);
        assert_eq!(listings[1].listing_title, "Alkaline Trio Patch");
        assert_eq!(listings[1].seller.as_deref(), Some("patchguy"));
    }

    #[test]
    fn test_seller_before_price_ends_title() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "vinylfan99 98% positive (450)",
            "Buy It Now",
            "$24.99",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].listing_title, "Alkaline Trio Crimson Vinyl");
        assert_eq!(listings[0].sold_price, "$24.99");
        assert_eq!(listings[0].seller.as_deref(), Some("vinylfan99"));
    }

    #[test]
    fn test_price_search_after_seller_is_bounded() {
        let config = SegmenterConfig {
            price_lookahead: 1,
            ..SegmenterConfig::default()
        };
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "vinylfan99 98% positive (450)",
            "Buy It Now",
            "$24.99",
        ];

        assert!(Segmenter::new(&config).unwrap().segment(&lines).is_empty());
    }

    #[test]
    fn test_multiline_title_with_cleanup() {
        let lines = [
            "Sold Apr 20, 2024",
            "New Listing Alkallne Trio Agony & Irony",
            "CD 2008 Related: alkaline trio",
            "$9.99",
        ];

        let listings = segmenter().segment(&lines);
        assert_eq!(listings[0].listing_title, "Alkaline Trio Agony & Irony CD 2008");
    }

    #[test]
    fn test_condition_line_with_trailing_price() {
        for price_line in ["Pre-Owned · LP $24.99", "Brand New $24.99"] {
            let lines = ["Sold Jan 5, 2024", "Alkaline Trio Crimson Vinyl", price_line];

            let listings = segmenter().segment(&lines);

            assert_eq!(listings.len(), 1, "{}", price_line);
            assert_eq!(listings[0].listing_title, "Alkaline Trio Crimson Vinyl");
            assert_eq!(listings[0].sold_price, "$24.99");
        }
    }

    #[test]
    fn test_split_seller_does_not_swallow_price() {
        let config = SegmenterConfig {
            seller_split_lookahead: 2,
            ..SegmenterConfig::default()
        };
        let segmenter = Segmenter::new(&config).unwrap();

        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "vinylfan99",
            "$24.99",
            "98% positive (450)",
        ];
        let listings = segmenter.segment(&lines);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].sold_price, "$24.99");

        // Chrome between name and rating is still skipped
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "$24.99",
            "vinylfan99",
            "Free shipping",
            "98% positive (450)",
        ];
        let listings = segmenter.segment(&lines);
        assert_eq!(listings[0].seller.as_deref(), Some("vinylfan99"));
    }

    #[test]
    fn test_one_word_title_line_is_not_a_seller() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio",
            "Goddamnit",
            "99% (30K)",
            "$20.00",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].listing_title, "Alkaline Trio Goddamnit");
        assert_eq!(listings[0].sold_price, "$20.00");
        assert_eq!(listings[0].seller, None);
    }

    #[test]
    fn test_split_seller_handle_ends_title() {
        let lines = [
            "Sold Jan 5, 2024",
            "Alkaline Trio Crimson Vinyl",
            "vinylfan99",
            "98% positive (450)",
            "$24.99",
        ];

        let listings = segmenter().segment(&lines);

        assert_eq!(listings[0].listing_title, "Alkaline Trio Crimson Vinyl");
        assert_eq!(listings[0].seller.as_deref(), Some("vinylfan99"));
        assert_eq!(listings[0].sold_price, "$24.99");
    }

    #[test]
    fn test_short_fragments_ignored() {
        let lines = ["Sold Apr 20, 2024", "Alkaline Trio Tee", "XL", "$15"];

        let listings = segmenter().segment(&lines);
        assert_eq!(listings[0].listing_title, "Alkaline Trio Tee");
        assert_eq!(listings[0].sold_price, "$15");
    }
}
