//! Gallery scraping: walks the paginated screenshot gallery and downloads
//! individual screenshots.

pub mod gallery;

pub use gallery::GalleryItem;

use anyhow::{Context, Result};
use image::DynamicImage;
use reqwest::blocking::Client;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::config::CollectorConfig;
use crate::error::{CollectError, ExtractError};
use gallery::{GallerySelectors, page_url, parse_gallery_page};

/// Source of gallery items and their screenshots.
pub trait GallerySource {
    /// Lists every gallery item across all pages, in page order.
    fn collect(&self) -> Result<Vec<GalleryItem>, CollectError>;

    /// Downloads and decodes one screenshot.
    fn fetch_image(&self, url: &str) -> Result<DynamicImage, ExtractError>;
}

/// Gallery served over HTTP.
pub struct HttpGallery {
    client: Client,
    config: CollectorConfig,
}

impl HttpGallery {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn fetch_page(&self, url: &Url) -> Result<String, CollectError> {
        let http_error = |source: reqwest::Error| CollectError::Http {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url.clone()).send().map_err(http_error)?;
        if !response.status().is_success() {
            return Err(CollectError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        response.text().map_err(http_error)
    }
}

impl GallerySource for HttpGallery {
    fn collect(&self) -> Result<Vec<GalleryItem>, CollectError> {
        walk_gallery(&self.config, |url| self.fetch_page(url))
    }

    fn fetch_image(&self, url: &str) -> Result<DynamicImage, ExtractError> {
        let download_error = |source: reqwest::Error| ExtractError::Download {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().map_err(download_error)?;
        if !response.status().is_success() {
            return Err(ExtractError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let bytes = response.bytes().map_err(download_error)?;

        Ok(image::load_from_memory(&bytes)?)
    }
}

/// Walks the gallery pages: page 1, then `?page=N` while the pagination links
/// to page N, the previous page had items, and N is within `max_pages`.
///
/// A failure on the first page is an error. A failure on a later page keeps
/// what was collected so far. Items are deduplicated by id, first one wins.
fn walk_gallery<F>(config: &CollectorConfig, fetch: F) -> Result<Vec<GalleryItem>, CollectError>
where
    F: Fn(&Url) -> Result<String, CollectError>,
{
    let base = Url::parse(&config.base_url).map_err(|source| CollectError::Url {
        url: config.base_url.clone(),
        source,
    })?;
    let selectors = GallerySelectors::from_config(config)?;

    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut page = 1;

    loop {
        let url = if page == 1 {
            base.clone()
        } else {
            page_url(&base, &config.page_param, page)
        };
        tracing::info!("Loading gallery page {}: {}", page, url);

        let html = match fetch(&url) {
            Ok(html) => html,
            Err(e) if page == 1 => return Err(e),
            Err(e) => {
                tracing::warn!("Stopping pagination at page {}: {}", page, e);
                break;
            }
        };

        let parsed = parse_gallery_page(&html, &url, &selectors);
        tracing::info!("Found {} gallery items on page {}", parsed.items.len(), page);

        if parsed.items.is_empty() {
            if page == 1 {
                let snippet: String = html.chars().take(1000).collect();
                tracing::debug!("No gallery items in page. Snippet: {}", snippet);
            }
            break;
        }

        for item in parsed.items {
            if seen.insert(item.id.clone()) {
                items.push(item);
            }
        }

        let next = page + 1;
        if next > config.max_pages || !parsed.linked_pages.contains(&next) {
            break;
        }
        page = next;
    }

    tracing::info!("Collected {} image URLs", items.len());
    Ok(items)
}
