//! The installer driver: a fixed sequence of scripted console states.
//!
//! Drives the OpenBSD installer from bootloader prompt to powered-off
//! installed system over the VM serial console. The sequence is strictly
//! linear with no cycles and no retries: every transition is one blocking
//! expect with a timeout, and a timeout anywhere before the final
//! shutdown wait aborts the whole run, leaving the target disk in an
//! unusable partial state for the operator to rebuild from scratch.

use std::time::Duration;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::autoinstall::{ANSWER_FILE, DISKLABEL_FILE};
use crate::console::Console;

/// Bootloader prompt.
const BOOT_PROMPT: &str = r"boot> ";
/// Installer top-level menu.
const INSTALLER_MENU: &str = r"\(I\)nstall, \(U\)pgrade, \(A\)utoinstall or \(S\)hell\?";
/// Shell prompt inside the installer ramdisk (and root's shell after login).
const SHELL_PROMPT: &str = "# ";
/// Marker printed by the installer when the installation completed.
const SUCCESS_MARKER: &str = "CONGRATULATIONS!";
/// Marker printed by the installer when the installation aborted.
const FAILURE_MARKER: &str = "(?i)installation failed";
/// Login prompt of the installed system after the post-install reboot.
const LOGIN_PROMPT: &str = "login: ";
/// Password prompt during login.
const PASSWORD_PROMPT: &str = "Password:";
/// Location of the installer's own log inside the ramdisk.
const INSTALLER_LOG: &str = "/tmp/i/install.log";

/// The driver's states, in their one and only legal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InstallStep {
    /// Wait for the bootloader prompt.
    AwaitBootPrompt,
    /// Redirect the bootloader and kernel console to com0.
    ConfigureConsole,
    /// Boot the install kernel and wait for the installer menu.
    Boot,
    /// Drop to the installer's shell (deliberately not autoinstall yet).
    EnterShell,
    /// Mount the site volume and stage the answer and layout files.
    StageConfig,
    /// Select autoinstall; the installer takes over unattended.
    TriggerAutoinstall,
    /// Wait for the success or failure marker.
    AwaitCompletion,
    /// Log in on the installed system and power it off.
    PostInstallLogin,
    /// Wait for the VM process to end its output stream.
    AwaitShutdown,
}

/// Per-state wait budgets.
#[derive(Debug, Clone)]
pub struct DriverTimeouts {
    /// Budget for the first bootloader prompt (covers firmware and media).
    pub boot_prompt: Duration,
    /// Budget for reaching the installer menu after boot.
    pub menu: Duration,
    /// Budget for each staged shell command.
    pub shell: Duration,
    /// Budget for the unattended installation itself.
    pub install: Duration,
    /// Budget for the post-install reboot up to the login prompt.
    pub login: Duration,
    /// Budget for the final power-off; overrun is cosmetic, not fatal.
    pub shutdown: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self {
            boot_prompt: Duration::from_secs(120),
            menu: Duration::from_secs(300),
            shell: Duration::from_secs(60),
            install: Duration::from_secs(3600),
            login: Duration::from_secs(600),
            shutdown: Duration::from_secs(120),
        }
    }
}

/// Drives one installer VM from boot prompt to shutdown.
#[derive(Debug)]
pub struct InstallerDriver {
    timeouts: DriverTimeouts,
    root_password: String,
}

impl InstallerDriver {
    /// Create a driver; the password must match the generated answer file.
    pub fn new(timeouts: DriverTimeouts, root_password: &str) -> Self {
        Self {
            timeouts,
            root_password: root_password.to_string(),
        }
    }

    /// Shell commands staging the configuration from the site volume.
    ///
    /// The site volume is the first CD-ROM device (cd0) because it is
    /// attached before the install media; the device nodes are created
    /// first since the ramdisk only populates the boot device's nodes.
    /// The answer file lands at the path autoinstall probes by default.
    fn stage_commands() -> Result<Vec<String>> {
        let answers = shlex::try_quote(ANSWER_FILE)
            .map_err(|e| eyre!("Failed to quote {ANSWER_FILE}: {e}"))?;
        let disklabel = shlex::try_quote(DISKLABEL_FILE)
            .map_err(|e| eyre!("Failed to quote {DISKLABEL_FILE}: {e}"))?;
        Ok(vec![
            "cd /dev && sh MAKEDEV cd0 cd1 && cd /".to_string(),
            "mount -t cd9660 /dev/cd0c /mnt2".to_string(),
            format!("cp /mnt2/{answers} /auto_install.conf"),
            format!("cp /mnt2/{disklabel} /{disklabel}"),
            "chmod 600 /auto_install.conf".to_string(),
            "umount /mnt2".to_string(),
        ])
    }

    /// Mark a step finished.
    fn note_complete(step: InstallStep, done: &mut Vec<InstallStep>) {
        debug!("completed step {step}");
        done.push(step);
    }

    /// Run the full state sequence, returning the steps completed in order.
    pub fn run(&self, console: &mut Console) -> Result<Vec<InstallStep>> {
        let t = &self.timeouts;
        let mut done = Vec::new();

        // AwaitBootPrompt
        console.expect_one_of("await-boot-prompt", &[BOOT_PROMPT], t.boot_prompt)?;
        Self::note_complete(InstallStep::AwaitBootPrompt, &mut done);

        // ConfigureConsole: re-confirm the prompt between each command
        console.send_line("stty com0 115200")?;
        console.expect_one_of("configure-console", &[BOOT_PROMPT], t.boot_prompt)?;
        console.send_line("set tty com0")?;
        console.expect_one_of("configure-console", &[BOOT_PROMPT], t.boot_prompt)?;
        Self::note_complete(InstallStep::ConfigureConsole, &mut done);

        // Boot
        console.send_line("boot")?;
        console.expect_one_of("boot", &[INSTALLER_MENU], t.menu)?;
        Self::note_complete(InstallStep::Boot, &mut done);

        // EnterShell
        console.send_line("s")?;
        console.expect_one_of("enter-shell", &[SHELL_PROMPT], t.shell)?;
        Self::note_complete(InstallStep::EnterShell, &mut done);

        // StageConfig
        for cmd in Self::stage_commands()? {
            console.send_line(&cmd)?;
            console
                .expect_one_of("stage-config", &[SHELL_PROMPT], t.shell)
                .with_context(|| format!("Staging command failed to return: {cmd}"))?;
        }
        console.send_line("exit")?;
        console.expect_one_of("stage-config", &[INSTALLER_MENU], t.menu)?;
        Self::note_complete(InstallStep::StageConfig, &mut done);

        // TriggerAutoinstall
        console.send_line("a")?;
        Self::note_complete(InstallStep::TriggerAutoinstall, &mut done);

        // AwaitCompletion
        let outcome = console.expect_one_of(
            "await-completion",
            &[SUCCESS_MARKER, FAILURE_MARKER, INSTALLER_MENU],
            t.install,
        )?;
        if outcome != 0 {
            // Surface the installer's own log before aborting; the shell
            // may or may not be available, so this is best-effort.
            let _ = console.send_line(&format!("cat {INSTALLER_LOG}"));
            let _ = console.expect_one_of(
                "await-completion",
                &[SHELL_PROMPT],
                Duration::from_secs(10),
            );
            return Err(eyre!(
                "Installation failed; recent console output:\n{}",
                console.tail()
            ));
        }
        info!("installation completed, waiting for reboot into installed system");
        Self::note_complete(InstallStep::AwaitCompletion, &mut done);

        // PostInstallLogin
        console.expect_one_of("post-install-login", &[LOGIN_PROMPT], t.login)?;
        console.send_line("root")?;
        console.expect_one_of("post-install-login", &[PASSWORD_PROMPT], t.shell)?;
        console.send_line(&self.root_password)?;
        console.expect_one_of("post-install-login", &[SHELL_PROMPT], t.shell)?;
        console.send_line("halt -p")?;
        Self::note_complete(InstallStep::PostInstallLogin, &mut done);

        // AwaitShutdown: overrun here is cosmetic, the install already
        // succeeded
        if console.wait_eof(t.shutdown) {
            Self::note_complete(InstallStep::AwaitShutdown, &mut done);
        } else {
            warn!(
                "VM did not shut down within {:?}; continuing without it",
                t.shutdown
            );
        }

        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::{Arc, Mutex};

    /// Writer handle that keeps sent bytes inspectable after the console
    /// takes ownership of its writer.
    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedWriter {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn quick_timeouts() -> DriverTimeouts {
        let t = Duration::from_secs(5);
        DriverTimeouts {
            boot_prompt: t,
            menu: t,
            shell: t,
            install: t,
            login: t,
            shutdown: t,
        }
    }

    /// A canned transcript of a successful install, with one console
    /// emission per expected prompt.
    fn successful_transcript() -> String {
        let mut s = String::new();
        s.push_str("probing... \nboot> ");
        s.push_str("\nboot> "); // after stty
        s.push_str("\nboot> "); // after set tty
        s.push_str("\nWelcome to the OpenBSD/amd64 7.8 installation program.\n");
        s.push_str("(I)nstall, (U)pgrade, (A)utoinstall or (S)hell? ");
        s.push_str("\n# "); // shell entered
        for _ in 0..6 {
            s.push_str("\n# "); // each staged command returns
        }
        s.push_str("\n(I)nstall, (U)pgrade, (A)utoinstall or (S)hell? ");
        s.push_str("\nPerforming non-interactive install...\n");
        s.push_str("CONGRATULATIONS! Your OpenBSD install has been successfully completed!\n");
        s.push_str("rebooting...\n");
        s.push_str("\nlogin: ");
        s.push_str("\nPassword:");
        s.push_str("\nopenbsd# ");
        s.push_str("\nsyncing disks... done\n");
        s
    }

    #[test]
    fn test_full_sequence_is_strictly_ordered() -> Result<()> {
        let writer = SharedWriter::default();
        let mut console = Console::new(
            Cursor::new(successful_transcript().into_bytes()),
            writer.clone(),
        );
        let driver = InstallerDriver::new(quick_timeouts(), "openbsd");
        let steps = driver.run(&mut console)?;

        use InstallStep::*;
        assert_eq!(
            steps,
            vec![
                AwaitBootPrompt,
                ConfigureConsole,
                Boot,
                EnterShell,
                StageConfig,
                TriggerAutoinstall,
                AwaitCompletion,
                PostInstallLogin,
                AwaitShutdown,
            ]
        );

        // The sent command stream observes the same order: shell selection
        // before staging, staging before the autoinstall trigger
        let sent = writer.contents();
        let shell = sent.find("s\n").expect("shell selection sent");
        let mount = sent.find("mount -t cd9660").expect("mount sent");
        let trigger = sent.find("\na\n").expect("autoinstall trigger sent");
        assert!(shell < mount && mount < trigger);
        Ok(())
    }

    #[test]
    fn test_failure_marker_aborts_with_context() {
        let mut transcript = String::new();
        transcript.push_str("boot> \nboot> \nboot> \n");
        transcript.push_str("(I)nstall, (U)pgrade, (A)utoinstall or (S)hell? \n# ");
        for _ in 0..6 {
            transcript.push_str("\n# ");
        }
        transcript.push_str("\n(I)nstall, (U)pgrade, (A)utoinstall or (S)hell? \n");
        transcript.push_str("Installation failed: could not extract sets\n# ");

        let mut console = Console::new(Cursor::new(transcript.into_bytes()), SharedWriter::default());
        let driver = InstallerDriver::new(quick_timeouts(), "openbsd");
        let err = driver.run(&mut console).unwrap_err();
        assert!(err.to_string().contains("Installation failed"));
    }

    #[test]
    fn test_missing_boot_prompt_times_out() {
        // An empty stream reaches EOF, which is fatal before any state
        let mut console = Console::new(Cursor::new(Vec::new()), SharedWriter::default());
        let driver = InstallerDriver::new(quick_timeouts(), "openbsd");
        assert!(driver.run(&mut console).is_err());
    }

    #[test]
    fn test_stage_commands_reference_first_cdrom() -> Result<()> {
        let cmds = InstallerDriver::stage_commands()?;
        assert!(cmds.iter().any(|c| c.contains("/dev/cd0c")));
        assert!(cmds.iter().any(|c| c.contains("/auto_install.conf")));
        Ok(())
    }
}
