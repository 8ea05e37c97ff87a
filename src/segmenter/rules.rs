//! Ordered line classification rules.
//!
//! Every OCR line is matched against the table top to bottom and takes the
//! action of the first rule that matches. Lines matching nothing are plain
//! text and may become part of a title.

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::SegmenterConfig;
use crate::model::ListingStatus;

/// "Sold Jan 5, 2024", "Ended Sept 21st 2023", "SOLD Mar. 3, 2022"
const ANCHOR_PATTERN: &str = r"(?i)\b(?P<status>sold|ended)\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}\b";

/// Whole-line price: "$8.20", "$1,234.56", "$ 40"
const PRICE_PATTERN: &str = r"^\$\s?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{1,2})?$";

/// Price at the tail of a longer line: "Cool Shirt $24.99"
const TRAILING_PRICE_PATTERN: &str =
    r"^(?P<prefix>.*?\S)\s*(?P<price>\$\s?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{1,2})?)$";

/// Item condition printed on its own line under the title.
const CONDITION_PATTERN: &str = r"(?i)^(?:brand\s+new|new|new\s+(?:other|\(other\)|with\s+tags|without\s+tags|with\s+box|without\s+box)|open\s+box|pre-?\s?owned|used|like\s+new|very\s+good|good|acceptable|(?:seller\s+|certified\s*-?\s*)?refurbished|for\s+parts\s+or\s+not\s+working)(?:\s*[·•|]\s*.*)?$";

/// Seller with feedback on one line: "vinylfan99 98% positive (450)", "bob_s 100% (1.2K)"
const SELLER_PATTERN: &str = r"(?i)^(?P<name>[a-z0-9][\w.\-*]{1,63})\s+\d{1,3}(?:\.\d+)?\s?%\s*(?:positive(?:\s+feedback)?|feedback|pos\.?)?\s*(?:\(\s*[\d.,]+\s*[km]?\s*\))?$";

/// Feedback without a name: "98% positive (450)", "99% (30K)"
const RATING_PATTERN: &str = r"(?i)^(?:\(\s*[\d.,]+\s*[km]?\s*\)\s*)?\d{1,3}(?:\.\d+)?\s?%\s*(?:positive(?:\s+feedback)?|feedback|pos\.?)?\s*(?:\(\s*[\d.,]+\s*[km]?\s*\))?$";

/// A seller name printed alone, with its rating on a following line.
const SELLER_NAME_PATTERN: &str = r"^[A-Za-z0-9][\w.\-*]{2,63}$";

/// Text that closes the result cards.
const TERMINATE_PATTERNS: &[(&str, &str)] = &[(
    "end-of-results",
    r"(?i)^(?:results\s+matching\s+fewer\s+words|related\s+searches|shop\s+on\s+ebay|you\s+may\s+also\s+like|more\s+items\s+related\s+to)",
)];

/// Search-page chrome, sidebar filters, and OCR debris.
const REJECT_PATTERNS: &[(&str, &str)] = &[
    (
        "chrome-word",
        r"(?i)^(?:free|located|view|ebay|buy|ships|sold|ended|sponsored|watch|save|share|new\s+listing)$",
    ),
    (
        "shipping",
        r"(?i)\b(?:shipping|delivery|postage)\b|\bfree\s+returns\b|\breturns\s+accepted\b",
    ),
    (
        "location",
        r"(?i)^(?:located\s+in|ships\s+from|from\s+(?:united\s+states|usa|us|canada|china|japan|germany|united\s+kingdom|uk|australia)$)",
    ),
    ("bids", r"(?i)\b\d+\s+bids?\b"),
    ("buy-it-now", r"(?i)\bbuy\s+it\s+now\b"),
    (
        "best-offer",
        r"(?i)\bor\s+best\s+offer\b|\bbest\s+offer\s+accepted\b|\boffers?\s+accepted\b",
    ),
    ("watchers", r"(?i)\b\d+\+?\s+(?:watchers?|watching)\b"),
    ("sold-count", r"(?i)^\d+\+?\s+sold\b|\balmost\s+gone\b|\blast\s+one\b"),
    ("time-left", r"(?i)\b(?:\d+\s?[dhm]\s*){1,3}left\b|\btime\s+left\b"),
    (
        "price-range",
        r"(?i)^\$?\s?[\d,.]+\s*(?:to|-|–)\s*\$\s?[\d,.]+$|\b(?:under|over)\s+\$\s?\d",
    ),
    ("discount", r"(?i)\b(?:was:?|list\s+price:?)\s*\$|\b\d+%\s+off\b"),
    (
        "badge",
        r"(?i)^(?:top\s+rated|authenticity\s+guarantee|see\s+similar|see\s+more\s+like\s+this|opens\s+in\s+a\s+new\s+window|trending\s+at|benefits\s+charity)",
    ),
    (
        "sidebar",
        r"(?i)^(?:sort|filter|all\s+filters|shop\s+by|category|categories|condition|price|format|buying\s+format|item\s+location|delivery\s+options|show\s+only|all\s+listings|auction|accepts\s+offers|local\s+pickup|completed\s+items|sold\s+items)\b.{0,20}$",
    ),
    ("numbers", r"^[\d\s.,:/%+\-]+$"),
    ("debris", r"^[^A-Za-z0-9]*(?:[A-Za-z0-9][^A-Za-z0-9]*){0,2}$"),
    ("stray-symbols", r"^[{}@|»«<>]+\s*\S{0,3}$"),
];

/// What the segmenter does with a matching line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleAction {
    /// Starts a new listing (date + status)
    Anchor,
    /// Captures the price
    Price,
    /// Consumed without touching the title
    Delimiter,
    /// Captures the seller and ends the title
    Seller,
    /// Feedback line without a seller name
    Rating,
    /// Ends the title without capturing anything
    TerminateTitle,
    /// Discarded
    Reject,
    /// Title fragment followed by a price
    TrailingPrice,
}

/// One entry of the rule table.
#[derive(Debug)]
pub struct Rule {
    pub name: String,
    pub action: RuleAction,
    pub pattern: Regex,
}

impl Rule {
    fn new(name: &str, action: RuleAction, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("Invalid pattern for rule '{}': {}", name, pattern))?;
        Ok(Self {
            name: name.to_string(),
            action,
            pattern,
        })
    }
}

/// Classification of one line, carrying whatever the rule captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineClass<'a> {
    Anchor { status: ListingStatus, date: &'a str },
    Price(String),
    Delimiter,
    Seller(&'a str),
    Rating,
    TerminateTitle,
    Reject,
    TrailingPrice { prefix: &'a str, price: String },
    Text,
}

/// The ordered rule table.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
    seller_name: Regex,
    condition: Regex,
    trailing_price: Regex,
}

impl RuleSet {
    /// Builds the built-in table with the configured extra patterns spliced in
    /// after their built-in counterparts.
    pub fn new(config: &SegmenterConfig) -> Result<Self> {
        let mut rules = vec![
            Rule::new("anchor", RuleAction::Anchor, ANCHOR_PATTERN)?,
            Rule::new("price", RuleAction::Price, PRICE_PATTERN)?,
            Rule::new("condition", RuleAction::Delimiter, CONDITION_PATTERN)?,
            Rule::new("seller", RuleAction::Seller, SELLER_PATTERN)?,
            Rule::new("rating", RuleAction::Rating, RATING_PATTERN)?,
        ];

        for (name, pattern) in TERMINATE_PATTERNS {
            rules.push(Rule::new(name, RuleAction::TerminateTitle, pattern)?);
        }
        for (idx, pattern) in config.extra_terminate_patterns.iter().enumerate() {
            let name = format!("custom-terminate-{}", idx + 1);
            rules.push(Rule::new(&name, RuleAction::TerminateTitle, pattern)?);
        }

        for (name, pattern) in REJECT_PATTERNS {
            rules.push(Rule::new(name, RuleAction::Reject, pattern)?);
        }
        for (idx, pattern) in config.extra_reject_patterns.iter().enumerate() {
            let name = format!("custom-reject-{}", idx + 1);
            rules.push(Rule::new(&name, RuleAction::Reject, pattern)?);
        }

        rules.push(Rule::new(
            "trailing-price",
            RuleAction::TrailingPrice,
            TRAILING_PRICE_PATTERN,
        )?);

        Ok(Self {
            rules,
            seller_name: Regex::new(SELLER_NAME_PATTERN)?,
            condition: Regex::new(CONDITION_PATTERN)?,
            trailing_price: Regex::new(TRAILING_PRICE_PATTERN)?,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classifies a trimmed line by the first matching rule.
    pub fn classify<'a>(&self, line: &'a str) -> LineClass<'a> {
        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(line) else {
                continue;
            };

            let class = match rule.action {
                RuleAction::Anchor => {
                    let status = caps
                        .name("status")
                        .and_then(|m| ListingStatus::from_keyword(m.as_str()));
                    let date = caps.get(0).map(|m| m.as_str().trim());
                    match (status, date) {
                        (Some(status), Some(date)) => LineClass::Anchor { status, date },
                        _ => continue,
                    }
                }
                RuleAction::Price => LineClass::Price(normalize_price(line)),
                // "Pre-Owned · LP $24.99": the condition is dropped, the price kept
                RuleAction::Delimiter => match self.trailing_price(line) {
                    Some(price) => LineClass::TrailingPrice { prefix: "", price },
                    None => LineClass::Delimiter,
                },
                RuleAction::Seller => match caps.name("name") {
                    Some(name) => LineClass::Seller(name.as_str()),
                    None => continue,
                },
                RuleAction::Rating => LineClass::Rating,
                RuleAction::TerminateTitle => LineClass::TerminateTitle,
                RuleAction::Reject => LineClass::Reject,
                RuleAction::TrailingPrice => match (caps.name("prefix"), caps.name("price")) {
                    (Some(prefix), Some(price)) => {
                        let prefix = prefix.as_str().trim();
                        LineClass::TrailingPrice {
                            prefix: if self.condition.is_match(prefix) { "" } else { prefix },
                            price: normalize_price(price.as_str()),
                        }
                    }
                    _ => continue,
                },
            };

            tracing::trace!(rule = %rule.name, line, "rule matched");
            return class;
        }

        LineClass::Text
    }

    fn trailing_price(&self, line: &str) -> Option<String> {
        let caps = self.trailing_price.captures(line)?;
        caps.name("price").map(|m| normalize_price(m.as_str()))
    }

    /// True if the line could be a seller name printed without its rating.
    pub fn is_seller_name(&self, line: &str) -> bool {
        self.seller_name.is_match(line)
    }
}

/// Normalizes a matched price to `$<digits>[.<cents>]`.
pub fn normalize_price(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect()
}
