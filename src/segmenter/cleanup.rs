//! Post-processing for accumulated titles.

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::SegmenterConfig;

/// Badge eBay renders in front of fresh listings, often glued to the title.
const LEADING_BADGE_PATTERN: &str = r"(?i)^\s*new\s*listing\s*";

/// UI text that bleeds onto the end of a title from neighbouring elements.
const TRAILING_JUNK_PATTERNS: &[&str] = &[
    r"(?i)\s*\brelated:.*$",
    r"(?i)\s*\binclude\s+description.*$",
    r"(?i)\s*\bopens\s+in\s+a\s+new\s+window(?:\s+or\s+tab)?.*$",
    r"(?i)\s*\bshop\s+on\s+ebay.*$",
    r"(?i)\s*\bsponsored\s*$",
];

/// Sequences Tesseract systematically misreads on these screenshots.
const OCR_CORRECTIONS: &[(&str, &str)] = &[
    ("Alkallne", "Alkaline"),
    ("AIkaline", "Alkaline"),
    ("Alkaiine", "Alkaline"),
    ("Alkaline Trlo", "Alkaline Trio"),
    ("Alkaline Tri0", "Alkaline Trio"),
    ("Vlnyl", "Vinyl"),
    ("V1nyl", "Vinyl"),
    ("Shlrt", "Shirt"),
];

/// Cleans titles: strips badges and bleed-through, fixes known misreads,
/// collapses whitespace.
#[derive(Debug)]
pub struct TitleCleaner {
    leading_badge: Regex,
    trailing_junk: Vec<Regex>,
    corrections: Vec<(String, String)>,
    whitespace: Regex,
}

impl TitleCleaner {
    pub fn new(config: &SegmenterConfig) -> Result<Self> {
        let mut trailing_junk = TRAILING_JUNK_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        for pattern in &config.trailing_junk_patterns {
            // Configured patterns describe the junk itself; anchor them to the end
            let anchored = format!(r"\s*(?:{})\s*$", pattern);
            trailing_junk.push(
                Regex::new(&anchored)
                    .with_context(|| format!("Invalid trailing junk pattern: {}", pattern))?,
            );
        }

        let corrections = OCR_CORRECTIONS
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .chain(
                config
                    .ocr_corrections
                    .iter()
                    .map(|[from, to]| (from.clone(), to.clone())),
            )
            .filter(|(from, _)| !from.is_empty())
            .collect();

        Ok(Self {
            leading_badge: Regex::new(LEADING_BADGE_PATTERN)?,
            trailing_junk,
            corrections,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Collapses whitespace, drops the badge, applies corrections, then strips
    /// trailing junk. Corrections run first so a misread junk phrase is still
    /// stripped.
    pub fn clean(&self, raw: &str) -> String {
        let mut title = self.whitespace.replace_all(raw, " ").into_owned();
        title = self.leading_badge.replace(&title, "").into_owned();

        for (from, to) in &self.corrections {
            if title.contains(from.as_str()) {
                title = title.replace(from.as_str(), to);
            }
        }

        for junk in &self.trailing_junk {
            title = junk.replace(&title, "").into_owned();
        }

        title
            .trim()
            .trim_matches(|c: char| matches!(c, '|' | '·' | '•' | '-' | ',' | ':' | ';' | '_' | '~'))
            .trim()
            .to_string()
    }
}
