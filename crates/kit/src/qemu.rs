//! QEMU process configuration for the installer VM.
//!
//! The installer runs in a single VM with its serial console attached to
//! this process over stdio pipes, one virtio target disk, and two CD-ROM
//! drives. Drive order is load-bearing: the site configuration volume is
//! always attached before the install media so the guest enumerates it as
//! the first CD-ROM device, which the staged shell commands rely on.

use std::process::{Child, Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::debug;

/// Disk image format of an attached block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    /// Raw disk image.
    Raw,
    /// QEMU copy-on-write v2.
    Qcow2,
}

impl DiskFormat {
    /// The string qemu expects in drive specifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Qcow2 => "qcow2",
        }
    }
}

/// A virtio block device attached to the VM.
#[derive(Debug, Clone)]
pub struct BlockDisk {
    /// Host path of the disk image.
    pub path: Utf8PathBuf,
    /// Image format.
    pub format: DiskFormat,
}

/// Complete VM configuration for one installer run.
#[derive(Debug, Clone)]
pub struct QemuConfig {
    /// RAM in megabytes.
    pub memory_mb: u32,
    /// Number of vCPUs.
    pub vcpus: u32,
    /// CD-ROM images in attachment order (site volume first, then media).
    cdroms: Vec<Utf8PathBuf>,
    /// Writable block devices.
    disks: Vec<BlockDisk>,
}

impl QemuConfig {
    /// Create a configuration with the given sizing and no devices.
    pub fn new(memory_mb: u32, vcpus: u32) -> Self {
        Self {
            memory_mb,
            vcpus,
            cdroms: Vec::new(),
            disks: Vec::new(),
        }
    }

    /// Attach a CD-ROM image. Attachment order equals enumeration order in
    /// the guest, so callers must add the site volume before the media.
    pub fn add_cdrom(&mut self, path: &Utf8Path) -> &mut Self {
        self.cdroms.push(path.to_path_buf());
        self
    }

    /// Attach a writable virtio disk.
    pub fn add_disk(&mut self, path: &Utf8Path, format: DiskFormat) -> &mut Self {
        self.disks.push(BlockDisk {
            path: path.to_path_buf(),
            format,
        });
        self
    }

    /// Validate configuration before VM creation
    pub fn validate(&self) -> Result<()> {
        if self.memory_mb < 128 {
            return Err(eyre!(
                "Memory too low: {}MB (minimum 128MB)",
                self.memory_mb
            ));
        }
        if self.vcpus == 0 {
            return Err(eyre!("vCPU count must be at least 1"));
        }
        if self.disks.is_empty() {
            return Err(eyre!("No target disk attached"));
        }
        Ok(())
    }

    /// Build the qemu argument vector.
    ///
    /// Deterministic given the configuration and the `kvm` flag; the serial
    /// console goes to stdio so the caller can script it, and `-boot
    /// once=d` makes only the first boot come from CD — the post-install
    /// reboot lands on the freshly written disk.
    pub fn to_args(&self, kvm: bool) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-m".into(),
            format!("{}M", self.memory_mb),
            "-smp".into(),
            self.vcpus.to_string(),
        ];
        if kvm {
            args.extend(["-enable-kvm".into(), "-cpu".into(), "host".into()]);
        } else {
            args.extend(["-accel".into(), "tcg".into()]);
        }

        for (idx, disk) in self.disks.iter().enumerate() {
            args.push("-drive".into());
            args.push(format!(
                "file={},format={},if=virtio,id=disk{idx}",
                disk.path,
                disk.format.as_str()
            ));
        }

        // CD-ROM drives, in enumeration order
        for cdrom in &self.cdroms {
            args.push("-drive".into());
            args.push(format!("file={cdrom},media=cdrom,readonly=on"));
        }
        args.extend(["-boot".into(), "once=d".into()]);

        // -nographic sets graphics=off so firmware and bootloader I/O land
        // on the serial console (stdio); the monitor is dropped so stdio
        // carries nothing but the guest console
        args.extend([
            "-nographic".into(),
            "-monitor".into(),
            "none".into(),
            "-audio".into(),
            "none".into(),
        ]);
        args
    }

    /// Spawn the VM with stdin/stdout piped for console scripting.
    ///
    /// qemu's own stderr is inherited so device-level errors stay visible.
    pub fn spawn(&self) -> Result<Child> {
        self.validate()?;
        let qemu = qemu_binary();
        let kvm = Utf8Path::new("/dev/kvm").exists();
        if !kvm {
            debug!("/dev/kvm not available, falling back to TCG emulation");
        }
        let mut cmd = Command::new(&qemu);
        cmd.args(self.to_args(kvm))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!("{cmd:?}");
        cmd.spawn().with_context(|| format!("Failed to spawn {qemu}"))
    }
}

/// Resolve the qemu binary, honoring a QEMU_BIN override.
pub fn qemu_binary() -> String {
    std::env::var("QEMU_BIN").unwrap_or_else(|_| "qemu-system-x86_64".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> QemuConfig {
        let mut config = QemuConfig::new(1024, 2);
        config
            .add_disk(Utf8Path::new("/ws/artifacts/disk.raw"), DiskFormat::Raw)
            .add_cdrom(Utf8Path::new("/ws/temp/site.iso"))
            .add_cdrom(Utf8Path::new("/ws/cache/install78.iso"));
        config
    }

    #[test]
    fn test_validate() {
        assert!(test_config().validate().is_ok());
        assert!(QemuConfig::new(64, 2).validate().is_err());
        assert!(QemuConfig::new(1024, 0).validate().is_err());
        // No disk attached
        assert!(QemuConfig::new(1024, 2).validate().is_err());
    }

    #[test]
    fn test_site_volume_precedes_install_media() {
        let args = test_config().to_args(false);
        let site = args
            .iter()
            .position(|a| a.contains("site.iso"))
            .expect("site volume present");
        let media = args
            .iter()
            .position(|a| a.contains("install78.iso"))
            .expect("install media present");
        assert!(
            site < media,
            "site volume must be the first CD-ROM device: {args:?}"
        );
    }

    #[test]
    fn test_args_shape() {
        let args = test_config().to_args(true);
        assert!(args.contains(&"-enable-kvm".to_string()));
        assert!(args.windows(2).any(|w| w == ["-boot", "once=d"]));
        assert!(args.contains(&"-nographic".to_string()));
        assert!(args.windows(2).any(|w| w == ["-monitor", "none"]));
        assert!(args
            .iter()
            .any(|a| a == "file=/ws/artifacts/disk.raw,format=raw,if=virtio,id=disk0"));

        let tcg = test_config().to_args(false);
        assert!(tcg.windows(2).any(|w| w == ["-accel", "tcg"]));
    }
}
