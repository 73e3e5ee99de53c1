//! Install media fetcher (`obik fetch`).
//!
//! Downloads the versioned OpenBSD installation ISO from the release
//! mirror into the workspace cache. A cached file is reused when it meets
//! the minimum-size threshold; the threshold is a download-completion
//! heuristic only. No checksum or signature verification is performed —
//! that weakness is inherited deliberately from the reference pipeline
//! rather than silently strengthened.

use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::common_opts::WorkspaceOpts;
use crate::workspace::Workspace;

/// Release mirror serving versioned install media.
pub const DEFAULT_MIRROR: &str = "https://cdn.openbsd.org/pub/OpenBSD";

/// Minimum plausible size of a complete install ISO, in bytes.
pub const MIN_ISO_SIZE: u64 = 300_000_000;

/// A download that did not produce a usable install ISO.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The HTTP request could not be made or failed mid-transfer.
    #[error("download of {url} failed: {reason}")]
    Request {
        /// URL that was being fetched.
        url: String,
        /// Underlying client failure.
        reason: String,
    },
    /// The server answered with a non-success status.
    #[error("download of {url} failed with HTTP status {status}")]
    Status {
        /// URL that was being fetched.
        url: String,
        /// HTTP status code received.
        status: u16,
    },
    /// The transfer completed but the file is implausibly small.
    #[error("downloaded file {path} is {size} bytes, below the {min} byte minimum; removed")]
    Undersized {
        /// Path of the rejected file.
        path: Utf8PathBuf,
        /// Observed size in bytes.
        size: u64,
        /// Required minimum size in bytes.
        min: u64,
    },
}

/// Cache filename for a version: "7.8" becomes `install78.iso`.
pub fn iso_filename(version: &str) -> String {
    format!("install{}.iso", version.replace('.', ""))
}

/// Download URL for a version on a mirror.
pub fn iso_url(mirror: &str, version: &str) -> String {
    format!(
        "{}/{version}/amd64/{}",
        mirror.trim_end_matches('/'),
        iso_filename(version)
    )
}

/// Return the cached ISO path if it exists and passes the size check.
pub fn cache_hit(cache_dir: &Utf8Path, version: &str) -> Option<Utf8PathBuf> {
    let path = cache_dir.join(iso_filename(version));
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    if size >= MIN_ISO_SIZE {
        debug!("cache hit for {version}: {path} ({size} bytes)");
        Some(path)
    } else {
        None
    }
}

/// Fetch the install ISO for `version`, returning the verified cache path.
///
/// A valid cached file short-circuits the download entirely unless `force`
/// is set; otherwise any stale file is removed before re-downloading.
pub fn fetch(ws: &Workspace, mirror: &str, version: &str, force: bool) -> Result<Utf8PathBuf> {
    let cache_dir = ws.cache_dir();
    if !force {
        if let Some(path) = cache_hit(&cache_dir, version) {
            info!("Using cached install media: {path}");
            return Ok(path);
        }
    }

    let path = cache_dir.join(iso_filename(version));
    if path.exists() {
        debug!("removing stale cached file {path}");
        std::fs::remove_file(&path).with_context(|| format!("Failed to remove {path}"))?;
    }

    let url = iso_url(mirror, version);
    info!("Downloading {url}");
    download(&url, &path)?;

    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    if size < MIN_ISO_SIZE {
        let _ = std::fs::remove_file(&path);
        return Err(DownloadError::Undersized {
            path,
            size,
            min: MIN_ISO_SIZE,
        }
        .into());
    }
    info!("Download complete: {path} ({size} bytes)");
    Ok(path)
}

fn download(url: &str, path: &Utf8Path) -> Result<()> {
    let err_request = |reason: String| DownloadError::Request {
        url: url.to_string(),
        reason,
    };

    let mut resp = reqwest::blocking::Client::builder()
        .build()
        .map_err(|e| err_request(e.to_string()))?
        .get(url)
        .send()
        .map_err(|e| err_request(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: resp.status().as_u16(),
        }
        .into());
    }

    let pb = match resp.content_length() {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})",
                )
                .expect("static progress template"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let file = File::create(path).with_context(|| format!("Opening {path}"))?;
    let mut writer = pb.wrap_write(file);
    resp.copy_to(&mut writer)
        .map_err(|e| err_request(e.to_string()))?;
    pb.finish_and_clear();
    Ok(())
}

/// Download the versioned install ISO into the workspace cache
#[derive(Debug, Parser)]
pub struct FetchOpts {
    /// OpenBSD release to fetch (e.g. 7.8)
    #[clap(long)]
    pub version: String,

    /// Release mirror base URL
    #[clap(long, default_value = DEFAULT_MIRROR)]
    pub mirror: String,

    /// Re-download even if a valid cached file exists
    #[clap(long)]
    pub force: bool,

    /// Workspace location
    #[clap(flatten)]
    pub workspace: WorkspaceOpts,
}

/// Execute the fetch command
pub fn run(opts: FetchOpts) -> Result<()> {
    let ws = opts.workspace.open()?;
    let path = fetch(&ws, &opts.mirror, &opts.version, opts.force)?;
    println!("{path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_is_deterministic() {
        assert_eq!(iso_filename("7.8"), "install78.iso");
        assert_eq!(iso_filename("7.8"), iso_filename("7.8"));
        assert_eq!(
            iso_url(DEFAULT_MIRROR, "7.8"),
            "https://cdn.openbsd.org/pub/OpenBSD/7.8/amd64/install78.iso"
        );
        // Trailing slash on the mirror does not change the URL
        assert_eq!(
            iso_url("https://example.org/pub/OpenBSD/", "7.8"),
            "https://example.org/pub/OpenBSD/7.8/amd64/install78.iso"
        );
    }

    #[test]
    fn test_cache_hit_requires_size_threshold() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let cache = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();

        // Absent file: miss
        assert!(cache_hit(&cache, "7.8").is_none());

        // Undersized file: miss
        let path = cache.join(iso_filename("7.8"));
        std::fs::write(&path, b"truncated")?;
        assert!(cache_hit(&cache, "7.8").is_none());

        // Sparse file at the threshold: hit, and no network involvement
        let f = File::create(&path)?;
        f.set_len(MIN_ISO_SIZE)?;
        assert_eq!(cache_hit(&cache, "7.8"), Some(path));
        Ok(())
    }
}
