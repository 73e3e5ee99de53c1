//! gce import command - register a GCE image from an uploaded tarball
//!
//! The uploaded tarball (one top-level `disk.raw`) is turned into a GCE
//! image resource. OpenBSD is not a guest OS the importer adapts, so this
//! is a plain data-disk style registration from the storage URI, with the
//! boot firmware variant chosen by the operator. Picking a variant that
//! does not match the target VM family is a silent-until-boot-failure
//! misconfiguration this layer cannot validate.

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{Context, Report};
use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::cmdext::CommandRunExt;
use crate::gce::GceGlobalOpts;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::utils::require_tool;

/// An image name that already exists without force being set.
#[derive(Debug, thiserror::Error)]
#[error(
    "image '{name}' already exists; pick a new name, delete it manually, or re-run with --force"
)]
pub struct NameConflictError {
    /// The conflicting image name.
    pub name: String,
}

/// Boot firmware variant of the imported image.
///
/// The two are mutually exclusive and must match how the disk was
/// partitioned and how the target VM family boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Firmware {
    /// Legacy BIOS boot from an MBR-partitioned disk.
    Mbr,
    /// UEFI boot from a GPT-partitioned disk.
    Uefi,
}

impl std::fmt::Display for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Firmware::Mbr => "mbr",
            Firmware::Uefi => "uefi",
        };
        write!(f, "{s}")
    }
}

/// Options for registering a GCE image
#[derive(Debug, Parser)]
pub struct GceImportOpts {
    /// Storage URI of the uploaded tarball (gs://bucket/object)
    pub source_uri: String,

    /// Image name (defaults to a timestamped obik-openbsd name)
    #[clap(long)]
    pub image: Option<String>,

    /// Boot firmware variant the image was built for
    #[clap(long, value_enum, default_value_t = Firmware::Mbr)]
    pub firmware: Firmware,

    /// Delete and recreate the image if the name already exists
    #[clap(long)]
    pub force: bool,
}

/// Default image name derived from the current timestamp.
pub fn default_image_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("obik-openbsd-{}", now.format("%Y%m%d-%H%M%S"))
}

/// Whether a gcloud failure looks like IAM policy propagation lag.
///
/// Freshly granted permissions on the storage object take a short while to
/// become visible to the image service; those failures deserve the retry
/// budget, everything else is surfaced verbatim.
pub fn is_iam_propagation_error(err: &Report) -> bool {
    let text = err.to_string().to_lowercase();
    (text.contains("permission") || text.contains("forbidden") || text.contains("403"))
        && !text.contains("login")
}

fn image_exists(global: &GceGlobalOpts, name: &str) -> Result<bool> {
    global
        .gcloud_command()
        .args(["compute", "images", "describe", name])
        .run_check()
}

/// Execute the gce import command
pub fn run(global: &GceGlobalOpts, opts: GceImportOpts) -> Result<()> {
    require_tool("gcloud", "Google Cloud SDK")?;
    let name = opts
        .image
        .clone()
        .unwrap_or_else(|| default_image_name(chrono::Utc::now()));

    if image_exists(global, &name)? {
        if !opts.force {
            return Err(NameConflictError { name }.into());
        }
        warn!("image '{name}' already exists, deleting it first (--force)");
        global
            .gcloud_command()
            .args(["compute", "images", "delete", &name])
            .run()
            .with_context(|| format!("Deleting existing image {name}"))?;
    }

    info!("Creating image '{name}' from {}", opts.source_uri);
    run_with_retry(
        RetryPolicy::default(),
        "image creation",
        is_iam_propagation_error,
        || {
            let mut cmd = global.gcloud_command();
            cmd.args([
                "compute",
                "images",
                "create",
                &name,
                &format!("--source-uri={}", opts.source_uri),
            ]);
            if opts.firmware == Firmware::Uefi {
                cmd.arg("--guest-os-features=UEFI_COMPATIBLE");
            }
            debug!("{cmd:?}");
            cmd.run()
        },
    )
    .with_context(|| format!("Creating image {name}"))?;

    println!("{name}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    #[test]
    fn test_default_image_name_is_timestamped() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-02-03T04:05:06Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(default_image_name(now), "obik-openbsd-20260203-040506");
    }

    #[test]
    fn test_iam_propagation_classification() {
        assert!(is_iam_propagation_error(&eyre!(
            "gcloud exited: The user does not have permission to access object"
        )));
        assert!(is_iam_propagation_error(&eyre!("HTTP 403 Forbidden")));
        assert!(!is_iam_propagation_error(&eyre!(
            "Invalid value for field 'sourceUri'"
        )));
        // Auth problems are not propagation lag
        assert!(!is_iam_propagation_error(&eyre!(
            "permission denied, please run gcloud auth login"
        )));
    }

    #[test]
    fn test_name_conflict_error_mentions_force() {
        let err = NameConflictError {
            name: "openbsd-78".to_string(),
        };
        assert!(err.to_string().contains("--force"));
    }
}
