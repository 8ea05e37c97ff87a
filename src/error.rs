use thiserror::Error;

/// Failure while walking the gallery pages.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("HTTP request error for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} fetching {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Invalid URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid selector '{0}'")]
    Selector(String),
}

/// Failure while turning one screenshot into text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Image download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} downloading {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("OCR error: {0}")]
    Ocr(#[source] anyhow::Error),
}
