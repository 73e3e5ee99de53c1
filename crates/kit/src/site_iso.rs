//! Composition of the site configuration volume.
//!
//! The configuration bundle is packed into a small ISO9660 image attached
//! to the installer VM as its first CD-ROM. The volume carries no boot
//! catalog, so the firmware falls through to the install media; the
//! installer's staged shell commands mount it and copy the configuration
//! files out of its root.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::Result;
use tracing::debug;

use crate::cmdext::CommandRunExt;
use crate::utils::require_tool;

/// Volume identifier stamped on the site ISO.
pub const SITE_VOLUME_ID: &str = "OBIK-SITE";

/// Build the argument list for the composing tool.
///
/// Rock Ridge and Joliet extensions keep the filenames intact; the bundle
/// files must appear at the volume root because the installer shell
/// references them by fixed path.
pub fn compose_args(bundle_dir: &Utf8Path, output: &Utf8Path) -> Vec<String> {
    vec![
        "-as".to_string(),
        "mkisofs".to_string(),
        "-r".to_string(),
        "-J".to_string(),
        "-V".to_string(),
        SITE_VOLUME_ID.to_string(),
        "-o".to_string(),
        output.to_string(),
        bundle_dir.to_string(),
    ]
}

/// Compose the site ISO from a bundle directory.
///
/// The composing tool being absent, or reporting any structural error, is
/// fatal: the pipeline must abort before the VM boots against a volume the
/// staged commands cannot mount.
pub fn compose(bundle_dir: &Utf8Path, output: &Utf8Path) -> Result<Utf8PathBuf> {
    let xorriso = require_tool("xorriso", "package xorriso")?;
    debug!("composing site volume {output} from {bundle_dir}");
    Command::new(xorriso)
        .args(compose_args(bundle_dir, output))
        .run()?;
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_args_shape() {
        let args = compose_args(Utf8Path::new("/tmp/bundle"), Utf8Path::new("/tmp/site.iso"));
        // mkisofs emulation with the fixed volume id, output before input
        assert_eq!(args[0..2], ["-as".to_string(), "mkisofs".to_string()]);
        let vol_idx = args.iter().position(|a| a == "-V").unwrap();
        assert_eq!(args[vol_idx + 1], SITE_VOLUME_ID);
        let out_idx = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[out_idx + 1], "/tmp/site.iso");
        assert_eq!(args.last().unwrap(), "/tmp/bundle");
    }
}
