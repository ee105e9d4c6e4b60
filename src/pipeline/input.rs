//! Input resolution: load a user-supplied path or URL into memory.
//!
//! The pipeline works on bytes (pdfium, lopdf and pdf-extract all read from
//! memory), so a URL is downloaded straight into a buffer and a local path
//! is read whole. The `%PDF` magic is checked here so callers get a
//! meaningful error before any parser runs.

use crate::error::AnalysisError;
use crate::pipeline::extract::check_magic;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A loaded document and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedInput {
    pub bytes: Vec<u8>,
    /// File stem or last URL segment, used as the default judgment id.
    pub name: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input` from disk or over HTTP(S).
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<LoadedInput, AnalysisError> {
    let loaded = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(Path::new(input)).await?
    };
    check_magic(&loaded.bytes)?;
    Ok(loaded)
}

async fn read_local(path: &Path) -> Result<LoadedInput, AnalysisError> {
    if !path.exists() {
        return Err(AnalysisError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    if path.is_dir() {
        return Err(AnalysisError::InvalidInput {
            input: path.display().to_string(),
        });
    }
    let bytes = tokio::fs::read(path).await.map_err(|_| AnalysisError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(LoadedInput {
        bytes,
        name: name_from_path(path),
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedInput, AnalysisError> {
    info!("Downloading judgment from: {}", url);
    let failed = |reason: String| AnalysisError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let parsed = reqwest::Url::parse(url).map_err(|_| AnalysisError::InvalidInput {
        input: url.to_string(),
    })?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(parsed.clone()).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(LoadedInput {
        bytes: bytes.to_vec(),
        name: name_from_url(&parsed),
    })
}

fn name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "judgment".to_string())
}

fn name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|last| !last.is_empty())
        .map(|last| name_from_path(&PathBuf::from(last)))
        .unwrap_or_else(|| "judgment".to_string())
}
