//! Generation of the unattended-install configuration bundle.
//!
//! One build produces a small set of plain-text artifacts consumed by the
//! OpenBSD installer: the autoinstall answer file, the disklabel
//! autopartitioning template, the boot-console directives, a post-install
//! site script, and an entropy seed. Everything except the seed is a
//! deterministic function of [`InstallConfig`], so repeated builds with the
//! same parameters produce byte-identical configuration.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Context;
use color_eyre::Result;
use indoc::indoc;
use rand::RngCore;
use serde::Serialize;
use tracing::debug;

/// Size of the entropy seed handed to the installed system.
pub const SEED_LEN: usize = 512;

/// Answer file name inside the bundle and on the site volume.
pub const ANSWER_FILE: &str = "install.conf";
/// Disklabel template name inside the bundle and on the site volume.
pub const DISKLABEL_FILE: &str = "disklabel.template";
/// Boot-console directive file name.
pub const BOOT_CONF_FILE: &str = "boot.conf";
/// Post-install site script name.
pub const SITE_SCRIPT_FILE: &str = "install.site";
/// Entropy seed file name.
pub const SEED_FILE: &str = "random.seed";

/// One slice of the disklabel autopartitioning template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskArea {
    /// Mount point, or "swap".
    pub mount: String,
    /// Size expression the disklabel auto-allocator accepts
    /// (e.g. "8G", "1G-*", "80%").
    pub size: String,
}

impl DiskArea {
    /// Construct a slice entry.
    pub fn new(mount: &str, size: &str) -> Self {
        Self {
            mount: mount.to_string(),
            size: size.to_string(),
        }
    }
}

/// Parameters feeding the generated configuration bundle.
///
/// The generator does not validate the disk layout; the installer's
/// partitioner is the authority on whether it is acceptable.
#[derive(Debug, Clone, Serialize)]
pub struct InstallConfig {
    /// OpenBSD release being installed (e.g. "7.8").
    pub version: String,
    /// Hostname answered to the installer.
    pub hostname: String,
    /// Network interface to configure (virtio NICs appear as vio0).
    pub interface: String,
    /// Root password established by the answer file; the driver uses it
    /// for the post-install login.
    pub root_password: String,
    /// Ordered disklabel template entries.
    pub layout: Vec<DiskArea>,
    /// File set selection answered to the installer.
    pub sets: String,
}

impl InstallConfig {
    /// Defaults oriented at a serial-console cloud guest.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            hostname: "openbsd".to_string(),
            interface: "vio0".to_string(),
            root_password: "openbsd".to_string(),
            layout: vec![
                DiskArea::new("/", "4G-*"),
                DiskArea::new("swap", "1G"),
                DiskArea::new("/usr", "4G-*"),
            ],
            sets: "-game* done".to_string(),
        }
    }

    /// Render the autoinstall answer file ("Question = Answer" lines).
    ///
    /// The sets live on the install media, which enumerates as cd1 because
    /// the site volume is attached first.
    pub fn render_answers(&self) -> String {
        let template = indoc! {r#"
            System hostname = {HOSTNAME}
            Which network interface do you wish to configure = {IFACE}
            IPv4 address for {IFACE} = autoconf
            IPv6 address for {IFACE} = none
            Which network interface do you wish to configure = done
            Password for root account = {PASSWORD}
            Start sshd(8) by default = yes
            Allow root ssh login = yes
            Change the default console to com0 = yes
            Which speed should com0 use = 115200
            Setup a user = no
            What timezone are you in = UTC
            Which disk is the root disk = sd0
            Use (W)hole disk MBR, whole disk (G)PT or (E)dit = whole
            URL to autopartitioning template for disklabel = file://disklabel.template
            Location of sets = cd1
            Pathname to the sets = {VERSION}/amd64
            Set name(s) = {SETS}
            Directory does not contain SHA256.sig. Continue without verification = yes
            Location of sets = done
            Exit to (S)hell, (H)alt or (R)eboot = reboot
        "#};
        template
            .replace("{HOSTNAME}", &self.hostname)
            .replace("{IFACE}", &self.interface)
            .replace("{PASSWORD}", &self.root_password)
            .replace("{VERSION}", &self.version)
            .replace("{SETS}", &self.sets)
    }

    /// Render the disklabel template ("mountpoint size" lines, in order).
    pub fn render_disklabel(&self) -> String {
        let mut out = String::new();
        for area in &self.layout {
            out.push_str(&area.mount);
            out.push(' ');
            out.push_str(&area.size);
            out.push('\n');
        }
        out
    }

    /// Render the bootloader console directives.
    ///
    /// Cloud guests have no graphical console; everything must go to com0.
    pub fn render_boot_conf(&self) -> String {
        indoc! {r#"
            stty com0 115200
            set tty com0
        "#}
        .to_string()
    }

    /// Render the post-install site script.
    ///
    /// Persists the serial console into the installed system and leaves a
    /// first-boot marker in the installer's log location.
    pub fn render_site_script(&self) -> String {
        let template = indoc! {r#"
            #!/bin/sh
            # Executed by the installer in the target system after set
            # extraction, when staged as part of a site set.
            echo 'stty com0 115200' > /etc/boot.conf
            echo 'set tty com0' >> /etc/boot.conf
            echo 'dhcp' > /etc/hostname.{IFACE}
            echo '{HOSTNAME}' > /etc/myname
            echo 'installed by obik' > /var/log/obik-firstboot
        "#};
        template
            .replace("{IFACE}", &self.interface)
            .replace("{HOSTNAME}", &self.hostname)
    }

    /// Write the full bundle into `dir`, which must already exist.
    ///
    /// Only filesystem errors can occur here; they are fatal.
    pub fn write_bundle(&self, dir: &Utf8Path) -> Result<ConfigBundle> {
        let write = |name: &str, content: &str| -> Result<Utf8PathBuf> {
            let path = dir.join(name);
            std::fs::write(&path, content).with_context(|| format!("Writing {path}"))?;
            Ok(path)
        };

        let answers = write(ANSWER_FILE, &self.render_answers())?;
        let disklabel = write(DISKLABEL_FILE, &self.render_disklabel())?;
        write(BOOT_CONF_FILE, &self.render_boot_conf())?;
        write(SITE_SCRIPT_FILE, &self.render_site_script())?;

        // The one intentionally non-deterministic artifact
        let seed_path = dir.join(SEED_FILE);
        let mut seed = [0u8; SEED_LEN];
        rand::rng().fill_bytes(&mut seed);
        let mut f = std::fs::File::create(&seed_path)
            .with_context(|| format!("Writing {seed_path}"))?;
        f.write_all(&seed)?;

        debug!("wrote configuration bundle to {dir}");
        Ok(ConfigBundle {
            dir: dir.to_path_buf(),
            answers,
            disklabel,
        })
    }
}

/// A written configuration bundle, scoped to one build invocation.
///
/// The bundle is consumed by the ISO composer and discarded afterwards.
#[derive(Debug)]
pub struct ConfigBundle {
    /// Directory containing all bundle files.
    pub dir: Utf8PathBuf,
    /// Path of the written answer file.
    pub answers: Utf8PathBuf,
    /// Path of the written disklabel template.
    pub disklabel: Utf8PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_rendering_is_deterministic() {
        let a = InstallConfig::new("7.8");
        let b = InstallConfig::new("7.8");
        assert_eq!(a.render_answers(), b.render_answers());
        assert_eq!(a.render_disklabel(), b.render_disklabel());
        assert_eq!(a.render_site_script(), b.render_site_script());
    }

    #[test]
    fn test_answers_carry_parameters() {
        let mut cfg = InstallConfig::new("7.8");
        cfg.hostname = "gateway".to_string();
        cfg.root_password = "hunter2".to_string();
        let answers = cfg.render_answers();
        assert!(answers.contains("System hostname = gateway\n"));
        assert!(answers.contains("Password for root account = hunter2\n"));
        assert!(answers.contains("Pathname to the sets = 7.8/amd64\n"));
        assert!(answers.contains("Change the default console to com0 = yes\n"));
    }

    #[test]
    fn test_disklabel_preserves_order() {
        let mut cfg = InstallConfig::new("7.8");
        cfg.layout = vec![
            DiskArea::new("/", "2G"),
            DiskArea::new("swap", "512M"),
            DiskArea::new("/var", "80%"),
        ];
        assert_eq!(cfg.render_disklabel(), "/ 2G\nswap 512M\n/var 80%\n");
    }

    #[test]
    fn test_bundle_files_on_disk() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let cfg = InstallConfig::new("7.8");
        let bundle = cfg.write_bundle(dir)?;

        assert_eq!(bundle.answers, dir.join(ANSWER_FILE));
        for name in [ANSWER_FILE, DISKLABEL_FILE, BOOT_CONF_FILE, SITE_SCRIPT_FILE] {
            assert!(dir.join(name).is_file(), "missing {name}");
        }
        let seed = std::fs::read(dir.join(SEED_FILE))?;
        assert_eq!(seed.len(), SEED_LEN);

        // Deterministic artifacts are byte-identical across bundles
        let tmp2 = tempfile::tempdir()?;
        let dir2 = Utf8Path::from_path(tmp2.path()).unwrap();
        cfg.write_bundle(dir2)?;
        assert_eq!(
            std::fs::read_to_string(dir.join(ANSWER_FILE))?,
            std::fs::read_to_string(dir2.join(ANSWER_FILE))?
        );
        assert_eq!(
            std::fs::read_to_string(dir.join(DISKLABEL_FILE))?,
            std::fs::read_to_string(dir2.join(DISKLABEL_FILE))?
        );
        Ok(())
    }

    #[test]
    fn test_answers_carry_no_inline_comments() {
        // "Question = Answer" lines only; anything else confuses the parser
        let cfg = InstallConfig::new("7.8");
        for line in cfg.render_answers().lines() {
            assert!(line.contains(" = "), "malformed answer line: {line}");
        }
    }
}
