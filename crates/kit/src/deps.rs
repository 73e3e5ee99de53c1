//! Host dependency detection and installation (`obik deps`).
//!
//! The pipeline shells out to qemu, xorriso, and the archive tools; this
//! command probes for them and, where a package manager for the host OS
//! family is known, installs what is missing. Cloud-side tools (gcloud,
//! gsutil) are checked by the `gce` commands themselves since only those
//! commands need them.

use std::process::Command;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{debug, info};

use crate::cmdext::CommandRunExt;
use crate::utils::find_tool;

/// Tools the local pipeline requires, with the package that provides them.
const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("qemu-system-x86_64", "qemu"),
    ("qemu-img", "qemu"),
    ("xorriso", "xorriso"),
    ("tar", "tar"),
    ("gzip", "gzip"),
];

/// Host OS family, used only to pick a package manager invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    /// macOS with Homebrew.
    MacOs,
    /// apt-based distributions (Debian, Ubuntu).
    DebianLike,
    /// dnf-based distributions (Fedora, CentOS, RHEL).
    FedoraLike,
    /// pacman-based distributions.
    ArchLike,
    /// No known package manager; report-only.
    Unknown,
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        /// Detect the host OS family.
        pub fn detect_host_os() -> HostOs {
            HostOs::MacOs
        }
    } else {
        /// Detect the host OS family.
        pub fn detect_host_os() -> HostOs {
            match std::fs::read_to_string("/etc/os-release") {
                Ok(content) => HostOs::from_os_release(&content),
                Err(_) => HostOs::Unknown,
            }
        }
    }
}

impl HostOs {
    /// Classify from the contents of /etc/os-release (ID and ID_LIKE).
    pub fn from_os_release(content: &str) -> Self {
        let mut ids = String::new();
        for line in content.lines() {
            if let Some(v) = line.strip_prefix("ID=").or_else(|| line.strip_prefix("ID_LIKE=")) {
                ids.push(' ');
                ids.push_str(v.trim_matches('"'));
            }
        }
        let ids = ids.to_lowercase();
        if ids.contains("debian") || ids.contains("ubuntu") {
            HostOs::DebianLike
        } else if ids.contains("fedora") || ids.contains("rhel") || ids.contains("centos") {
            HostOs::FedoraLike
        } else if ids.contains("arch") {
            HostOs::ArchLike
        } else {
            HostOs::Unknown
        }
    }

    /// Package manager command line for installing a set of packages.
    fn install_command(&self, packages: &[&str]) -> Option<Command> {
        let mut cmd = match self {
            HostOs::MacOs => {
                let mut c = Command::new("brew");
                c.arg("install");
                c
            }
            HostOs::DebianLike => {
                let mut c = Command::new("apt-get");
                c.args(["install", "-y"]);
                c
            }
            HostOs::FedoraLike => {
                let mut c = Command::new("dnf");
                c.args(["install", "-y"]);
                c
            }
            HostOs::ArchLike => {
                let mut c = Command::new("pacman");
                c.args(["-S", "--noconfirm"]);
                c
            }
            HostOs::Unknown => return None,
        };
        cmd.args(packages);
        Some(cmd)
    }
}

/// Check for (and optionally install) the tools the pipeline invokes
#[derive(Debug, Parser)]
pub struct DepsOpts {
    /// Only report missing tools; do not invoke a package manager
    #[clap(long)]
    pub check: bool,
}

/// Return the packages providing tools currently missing from PATH.
pub fn missing_packages() -> Vec<&'static str> {
    let mut packages = Vec::new();
    for (tool, package) in REQUIRED_TOOLS {
        if find_tool(tool).is_none() {
            debug!("missing tool: {tool} (provided by {package})");
            if !packages.contains(package) {
                packages.push(*package);
            }
        }
    }
    packages
}

/// Execute the deps command
pub fn run(opts: DepsOpts) -> Result<()> {
    let packages = missing_packages();
    if packages.is_empty() {
        info!("All required tools are present");
        return Ok(());
    }

    if opts.check {
        return Err(eyre!(
            "Missing required tools; install packages: {}",
            packages.join(", ")
        ));
    }

    let host = detect_host_os();
    let mut cmd = host.install_command(&packages).ok_or_else(|| {
        eyre!(
            "No known package manager for this host; install manually: {}",
            packages.join(", ")
        )
    })?;
    info!("Installing packages: {}", packages.join(", "));
    cmd.run()?;

    // Re-probe so a package that did not actually provide the tool is caught
    let still_missing = missing_packages();
    if !still_missing.is_empty() {
        return Err(eyre!(
            "Tools still missing after install: {}",
            still_missing.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_release_classification() {
        assert_eq!(
            HostOs::from_os_release("ID=ubuntu\nID_LIKE=debian\n"),
            HostOs::DebianLike
        );
        assert_eq!(HostOs::from_os_release("ID=fedora\n"), HostOs::FedoraLike);
        assert_eq!(
            HostOs::from_os_release("ID=\"centos\"\nID_LIKE=\"rhel fedora\"\n"),
            HostOs::FedoraLike
        );
        assert_eq!(HostOs::from_os_release("ID=arch\n"), HostOs::ArchLike);
        assert_eq!(HostOs::from_os_release("ID=gentoo\n"), HostOs::Unknown);
    }

    #[test]
    fn test_unknown_host_has_no_install_command() {
        assert!(HostOs::Unknown.install_command(&["qemu"]).is_none());
    }
}
