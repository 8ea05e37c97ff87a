//! Gallery page parsing. Pure functions over HTML, no network.

use scraper::{Html, Selector};
use url::Url;

use crate::config::CollectorConfig;
use crate::error::CollectError;

/// One screenshot entry on a gallery page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub id: String,
    pub image_url: String,
}

/// What one gallery page yields.
#[derive(Debug, Default)]
pub struct GalleryPage {
    pub items: Vec<GalleryItem>,
    /// Page numbers linked from the pagination container
    pub linked_pages: Vec<u32>,
}

/// Compiled selectors and attribute names for the gallery markup.
pub struct GallerySelectors {
    item: Selector,
    image: Selector,
    pagination: Selector,
    id_attribute: String,
    page_attribute: String,
}

impl GallerySelectors {
    pub fn from_config(config: &CollectorConfig) -> Result<Self, CollectError> {
        Ok(Self {
            item: parse_selector(&config.item_selector)?,
            image: parse_selector(&config.image_selector)?,
            pagination: parse_selector(&config.pagination_selector)?,
            id_attribute: config.id_attribute.clone(),
            page_attribute: config.page_attribute.clone(),
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector, CollectError> {
    Selector::parse(selector).map_err(|_| CollectError::Selector(selector.to_string()))
}

/// Extracts gallery items and pagination links from one page.
///
/// Items without an id or image are skipped. Relative image URLs are resolved
/// against `page_url`.
pub fn parse_gallery_page(html: &str, page_url: &Url, selectors: &GallerySelectors) -> GalleryPage {
    let document = Html::parse_document(html);
    let mut page = GalleryPage::default();

    for element in document.select(&selectors.item) {
        let Some(id) = element
            .value()
            .attr(&selectors.id_attribute)
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };

        let src = element.select(&selectors.image).next().and_then(|img| {
            img.value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .map(str::trim)
                .filter(|src| !src.is_empty())
        });
        let Some(src) = src else {
            tracing::debug!("Gallery item {} has no image, skipping", id);
            continue;
        };

        match page_url.join(src) {
            Ok(url) => page.items.push(GalleryItem {
                id: id.to_string(),
                image_url: url.to_string(),
            }),
            Err(e) => tracing::warn!("Gallery item {}: bad image URL '{}': {}", id, src, e),
        }
    }

    for link in document.select(&selectors.pagination) {
        let number = link
            .value()
            .attr(&selectors.page_attribute)
            .map(str::to_string)
            .unwrap_or_else(|| link.text().collect::<String>());
        if let Ok(n) = number.trim().parse::<u32>() {
            if !page.linked_pages.contains(&n) {
                page.linked_pages.push(n);
            }
        }
    }

    page
}

/// URL of gallery page `page`, replacing any existing `param` in the query.
pub fn page_url(base: &Url, param: &str, page: u32) -> Url {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        query.append_pair(param, &page.to_string());
    }
    url
}
