//! Distribution packaging of the raw disk image (`obik package`).
//!
//! The raw disk produced by the installer VM is transformed into the
//! requested distribution formats: QCOW2 and VMDK via `qemu-img convert`,
//! and the tarball layout Google's image import consumes — a gzip tar
//! whose single top-level entry is the raw disk named `disk.raw`. Formats
//! run sequentially and the step aborts on the first failure.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, ValueEnum};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use serde::Deserialize;
use tracing::{debug, info};

use crate::cmdext::CommandRunExt;
use crate::utils::require_tool;

/// Entry name the cloud importer requires inside the tarball.
pub const TAR_DISK_NAME: &str = "disk.raw";

/// Distribution formats derivable from the raw disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// QEMU copy-on-write v2 image.
    Qcow2,
    /// VMware disk image.
    Vmdk,
    /// Gzip tar containing `disk.raw`, as consumed by GCE image import.
    GceTar,
}

impl Format {
    /// Output filename suffix for this format.
    pub fn suffix(&self) -> &'static str {
        match self {
            Format::Qcow2 => "qcow2",
            Format::Vmdk => "vmdk",
            Format::GceTar => "tar.gz",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Subset of `qemu-img info --output=json` we report after conversion.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QemuImgInfo {
    /// Virtual size of the disk image in bytes.
    pub virtual_size: u64,
    /// Image format as qemu reports it.
    pub format: String,
}

/// Run `qemu-img info --output=json` on a disk image.
pub fn qemu_img_info(path: &Utf8Path) -> Result<QemuImgInfo> {
    let qemu_img = require_tool("qemu-img", "package qemu")?;
    Command::new(qemu_img)
        .args(["info", "--output=json", path.as_str()])
        .run_and_parse_json()
        .with_context(|| format!("Inspecting {path}"))
}

/// Convert the raw disk into one derived format next to `output`.
pub fn convert(raw: &Utf8Path, output: &Utf8Path, format: Format) -> Result<()> {
    match format {
        Format::Qcow2 | Format::Vmdk => {
            let qemu_img = require_tool("qemu-img", "package qemu")?;
            let target = match format {
                Format::Qcow2 => "qcow2",
                Format::Vmdk => "vmdk",
                Format::GceTar => unreachable!(),
            };
            Command::new(qemu_img)
                .args(["convert", "-O", target, raw.as_str(), output.as_str()])
                .run()
                .with_context(|| format!("Converting {raw} to {target}"))?;
            let info = qemu_img_info(output)?;
            debug!(
                "converted {raw} -> {} ({} bytes virtual)",
                info.format, info.virtual_size
            );
        }
        Format::GceTar => {
            write_gce_tar(raw, output)?;
            verify_gce_tar(output)?;
        }
    }
    let size = std::fs::metadata(output.as_std_path())
        .map(|m| m.len())
        .unwrap_or(0);
    info!("wrote {output} ({size} bytes)");
    Ok(())
}

/// Produce the import tarball: gzip tar, sparse-aware, exactly one entry
/// named `disk.raw` at the archive top level.
fn write_gce_tar(raw: &Utf8Path, output: &Utf8Path) -> Result<()> {
    let tar = require_tool("tar", "package tar")?;

    // The entry name is fixed; link the raw disk under that name in a
    // scratch directory rather than copying gigabytes.
    let scratch = tempfile::tempdir_in(
        output
            .parent()
            .ok_or_else(|| eyre!("Output path {output} has no parent"))?,
    )
    .context("Creating packaging scratch directory")?;
    let staged = scratch.path().join(TAR_DISK_NAME);
    if std::fs::hard_link(raw.as_std_path(), &staged).is_err() {
        debug!("hard link failed, copying {raw} into scratch");
        std::fs::copy(raw.as_std_path(), &staged)
            .with_context(|| format!("Staging {raw} as {TAR_DISK_NAME}"))?;
    }

    let scratch_dir = scratch
        .path()
        .to_str()
        .ok_or_else(|| eyre!("Non-UTF-8 scratch path"))?;
    Command::new(tar)
        .args([
            "--format=oldgnu",
            "-S",
            "-czf",
            output.as_str(),
            "-C",
            scratch_dir,
            TAR_DISK_NAME,
        ])
        .run()
        .with_context(|| format!("Archiving {raw} into {output}"))?;
    Ok(())
}

/// Assert the archive holds exactly one top-level `disk.raw` entry.
pub fn verify_gce_tar(path: &Utf8Path) -> Result<()> {
    let tar = require_tool("tar", "package tar")?;
    let listing = Command::new(tar)
        .args(["-tzf", path.as_str()])
        .run_capture_stdout()
        .with_context(|| format!("Listing {path}"))?;
    verify_tar_listing(&listing)
}

/// The listing check itself, split out for direct testing.
fn verify_tar_listing(listing: &str) -> Result<()> {
    let entries: Vec<&str> = listing.lines().filter(|l| !l.is_empty()).collect();
    match entries.as_slice() {
        [single] if *single == TAR_DISK_NAME => Ok(()),
        _ => Err(eyre!(
            "Import tarball must contain exactly one top-level '{TAR_DISK_NAME}' entry, found: {entries:?}"
        )),
    }
}

/// Convert a raw disk image into distribution formats
#[derive(Debug, Parser)]
pub struct PackageOpts {
    /// Raw disk image to package
    pub raw: Utf8PathBuf,

    /// Formats to produce (repeatable)
    #[clap(long = "format", value_enum, required = true)]
    pub formats: Vec<Format>,

    /// Output directory (defaults to the raw image's directory)
    #[clap(long)]
    pub output_dir: Option<Utf8PathBuf>,
}

/// Execute the package command
pub fn run(opts: PackageOpts) -> Result<()> {
    if !opts.raw.exists() {
        return Err(eyre!("Raw disk image not found: {}", opts.raw));
    }
    let out_dir = match &opts.output_dir {
        Some(d) => d.clone(),
        None => opts
            .raw
            .parent()
            .ok_or_else(|| eyre!("Raw path {} has no parent", opts.raw))?
            .to_path_buf(),
    };
    let stem = opts.raw.file_stem().unwrap_or("disk");

    for format in &opts.formats {
        let output = out_dir.join(format!("{stem}.{}", format.suffix()));
        convert(&opts.raw, &output, *format)?;
        println!("{output}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_tar_listing() {
        assert!(verify_tar_listing("disk.raw\n").is_ok());
        // Nested entry is the classic packaging mistake
        assert!(verify_tar_listing("images/disk.raw\n").is_err());
        assert!(verify_tar_listing("disk.raw\nextra.txt\n").is_err());
        assert!(verify_tar_listing("").is_err());
    }

    #[test]
    fn test_format_suffixes() {
        assert_eq!(Format::Qcow2.suffix(), "qcow2");
        assert_eq!(Format::Vmdk.suffix(), "vmdk");
        assert_eq!(Format::GceTar.suffix(), "tar.gz");
        assert_eq!(Format::GceTar.to_string(), "tar.gz");
    }

    #[test]
    fn test_gce_tar_round_trip() -> Result<()> {
        // tar and gzip are unconditional test-host tools, unlike qemu
        let tmp = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let raw = dir.join("openbsd-7.8-amd64.raw");
        std::fs::write(&raw, vec![0u8; 4096])?;

        let output = dir.join("openbsd-7.8-amd64.tar.gz");
        write_gce_tar(&raw, &output)?;
        verify_gce_tar(&output)?;
        Ok(())
    }
}
