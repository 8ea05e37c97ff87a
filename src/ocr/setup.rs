use anyhow::{Result, anyhow};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::OcrConfig;
use crate::paths;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

/// Common install locations for the tesseract executable.
const COMMON_EXECUTABLES: &[&str] = &[
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
];

/// Common system tessdata directories.
const COMMON_TESSDATA_DIRS: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
];

#[derive(Debug, Clone)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// None lets tesseract fall back to its compiled-in data path
    pub tessdata: Option<PathBuf>,
}

/// Locates Tesseract and its language data.
///
/// Downloads `<language>.traineddata` into the local data directory when no
/// tessdata is found and `download_tessdata` is enabled.
pub fn locate_tesseract(config: &OcrConfig) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(config.tesseract_path.as_deref())?;
    tracing::info!("Tesseract found at: {}", executable.display());

    let mut tessdata = find_tessdata_dir(config.tessdata_dir.as_deref(), &config.language);

    if tessdata.is_none() && config.download_tessdata {
        let local = paths::tessdata_dir();
        download_tessdata(&local, &config.language)?;
        tessdata = Some(local);
    }

    match &tessdata {
        Some(dir) => tracing::info!("Using tessdata at: {}", dir.display()),
        None => tracing::debug!("No tessdata directory found, using Tesseract's default"),
    }

    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Finds the Tesseract executable: configured path, then PATH, then common
/// install locations.
pub fn find_tesseract_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!(
            "Configured tesseract_path does not exist: {}",
            path.display()
        ));
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for path in COMMON_EXECUTABLES {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "Tesseract not found. Install Tesseract-OCR (e.g. `apt install tesseract-ocr`) \
         or set ocr.tesseract_path in the config."
    ))
}

/// Finds a tessdata directory containing `<language>.traineddata`.
pub fn find_tessdata_dir(explicit: Option<&Path>, language: &str) -> Option<PathBuf> {
    let traineddata = format!("{}.traineddata", language);
    let has_data = |dir: &Path| dir.join(&traineddata).exists();

    if let Some(dir) = explicit {
        if has_data(dir) {
            return Some(dir.to_path_buf());
        }
        tracing::warn!(
            "Configured tessdata_dir {} has no {}",
            dir.display(),
            traineddata
        );
    }

    let local = paths::tessdata_dir();
    if has_data(&local) {
        return Some(local);
    }

    // Check TESSDATA_PREFIX environment variable
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let p = PathBuf::from(&prefix);
        if has_data(&p) {
            return Some(p);
        }
        let p = p.join("tessdata");
        if has_data(&p) {
            return Some(p);
        }
    }

    COMMON_TESSDATA_DIRS
        .iter()
        .map(PathBuf::from)
        .find(|p| has_data(p))
}

/// Downloads trained data for one language
fn download_tessdata(tessdata_dir: &Path, language: &str) -> Result<()> {
    fs::create_dir_all(tessdata_dir)?;

    let url = format!("{}/{}.traineddata", TESSDATA_REPO, language);
    let path = tessdata_dir.join(format!("{}.traineddata", language));

    tracing::info!("Downloading {}.traineddata...", language);

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "sold-listings")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}.traineddata: HTTP {}",
            language,
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    let mut file = fs::File::create(&path)?;
    file.write_all(&bytes)?;

    tracing::info!(
        "Downloaded {}.traineddata ({} bytes)",
        language,
        bytes.len()
    );

    Ok(())
}
