use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the per-user data directory: `<local data>/sold-listings/`.
/// Falls back to the working directory when the platform has none.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(|| {
        dirs::data_local_dir()
            .map(|dir| dir.join("sold-listings"))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the logs directory: `<data_dir>/logs/`
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Returns the downloaded tessdata directory: `<data_dir>/tessdata/`
pub fn tessdata_dir() -> PathBuf {
    data_dir().join("tessdata")
}
