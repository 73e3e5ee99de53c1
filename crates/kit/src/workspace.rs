//! The build workspace: a directory tree shared by all pipeline steps.
//!
//! Layout is fixed: `cache/` holds downloaded install media keyed by
//! version, `artifacts/` the produced disk images, `temp/` per-run scratch
//! space, `logs/` console transcripts. The workspace persists across runs;
//! only the cache survives meaningfully between them.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;

/// Fixed subdirectories of a build workspace.
const SUBDIRS: &[&str] = &["cache", "artifacts", "temp", "logs"];

/// Handle to a build workspace rooted at a single directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    /// Open a workspace at `root`, creating the directory tree idempotently.
    pub fn create(root: Utf8PathBuf) -> Result<Self> {
        let ws = Self { root };
        for sub in SUBDIRS {
            let dir = ws.root.join(sub);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create workspace directory {dir}"))?;
        }
        Ok(ws)
    }

    /// The default workspace root, under the user cache directory.
    pub fn default_root() -> Result<Utf8PathBuf> {
        let base = dirs::cache_dir().ok_or_else(|| eyre!("Could not determine user cache directory"))?;
        Utf8PathBuf::from_path_buf(base.join("obik"))
            .map_err(|p| eyre!("Non-UTF-8 cache directory path: {}", p.display()))
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding downloaded install media, keyed by version.
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join("cache")
    }

    /// Directory holding produced disk image artifacts.
    pub fn artifacts_dir(&self) -> Utf8PathBuf {
        self.root.join("artifacts")
    }

    /// Per-run scratch space.
    pub fn temp_dir(&self) -> Utf8PathBuf {
        self.root.join("temp")
    }

    /// Console transcripts and other run logs.
    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.root.join("logs")
    }

    /// Path of the raw disk artifact for a version.
    pub fn raw_disk_path(&self, version: &str) -> Utf8PathBuf {
        self.artifacts_dir()
            .join(format!("openbsd-{version}-amd64.raw"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_idempotent() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("ws")).unwrap();
        let ws = Workspace::create(root.clone())?;
        for sub in SUBDIRS {
            assert!(root.join(sub).is_dir());
        }
        // Second create over the same tree succeeds and changes nothing
        let ws2 = Workspace::create(root)?;
        assert_eq!(ws.cache_dir(), ws2.cache_dir());
        Ok(())
    }

    #[test]
    fn test_artifact_naming_is_deterministic() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let ws = Workspace::create(root)?;
        assert_eq!(ws.raw_disk_path("7.8"), ws.raw_disk_path("7.8"));
        assert!(ws.raw_disk_path("7.8").as_str().ends_with("openbsd-7.8-amd64.raw"));
        Ok(())
    }
}
