//! The end-to-end image build pipeline (`obik build`).
//!
//! Chains the local steps into one run: fetch the install media, generate
//! the configuration bundle, compose the site volume, then boot the
//! installer VM and drive it to completion. The product is the raw disk
//! artifact; `obik package` and the `gce` commands take it from there.
//!
//! One run owns its workspace exclusively. The raw disk is recreated every
//! run, and a failed driver leaves no artifact behind: a partially
//! installed disk is not distinguishable from a good one by inspection, so
//! it is removed rather than kept.

use std::fs::File;

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{debug, info};

use crate::autoinstall::InstallConfig;
use crate::common_opts::{CpuOpts, DiskSizeOpts, MemoryOpts, WorkspaceOpts};
use crate::console::Console;
use crate::driver::{DriverTimeouts, InstallerDriver};
use crate::fetch;
use crate::qemu::{DiskFormat, QemuConfig};
use crate::site_iso;
use crate::utils::{parse_memory_to_mb, parse_size, require_tool};

/// Build an unattended-install disk image for a release
#[derive(Debug, Parser)]
pub struct BuildOpts {
    /// OpenBSD release to install (e.g. 7.8)
    #[clap(long)]
    pub version: String,

    /// Hostname configured in the installed system
    #[clap(long, default_value = "openbsd")]
    pub hostname: String,

    /// Root password for the installed system
    #[clap(long, default_value = "openbsd")]
    pub root_password: String,

    /// Release mirror base URL
    #[clap(long, default_value = fetch::DEFAULT_MIRROR)]
    pub mirror: String,

    /// Re-download install media even if cached
    #[clap(long)]
    pub force: bool,

    /// Workspace location
    #[clap(flatten)]
    pub workspace: WorkspaceOpts,

    /// VM memory
    #[clap(flatten)]
    pub memory: MemoryOpts,

    /// VM CPU count
    #[clap(flatten)]
    pub cpus: CpuOpts,

    /// Target disk size
    #[clap(flatten)]
    pub disk: DiskSizeOpts,
}

/// Execute the build command
pub fn run(opts: BuildOpts) -> Result<()> {
    require_tool("qemu-system-x86_64", "package qemu")?;
    let ws = opts.workspace.open()?;

    // Install media, from cache when possible
    let media = fetch::fetch(&ws, &opts.mirror, &opts.version, opts.force)?;

    // Configuration bundle, scoped to this run and discarded with the
    // scratch directory once the site volume exists
    let mut config = InstallConfig::new(&opts.version);
    config.hostname = opts.hostname.clone();
    config.root_password = opts.root_password.clone();

    let scratch = tempfile::tempdir_in(ws.temp_dir().as_std_path())
        .context("Creating build scratch directory")?;
    let scratch_path = camino::Utf8Path::from_path(scratch.path())
        .ok_or_else(|| color_eyre::eyre::eyre!("Non-UTF-8 scratch path"))?;
    let bundle = config.write_bundle(scratch_path)?;

    let site_iso_path = ws.temp_dir().join(format!("site-{}.iso", opts.version));
    site_iso::compose(&bundle.dir, &site_iso_path)?;
    drop(bundle);
    drop(scratch);

    // Fresh target disk, pre-allocated sparse
    let disk_path = ws.raw_disk_path(&opts.version);
    if disk_path.exists() {
        debug!("removing previous raw disk {disk_path}");
        std::fs::remove_file(&disk_path)
            .with_context(|| format!("Failed to remove existing disk {disk_path}"))?;
    }
    let disk_size = parse_size(&opts.disk.disk_size)?;
    let file = File::create(&disk_path).with_context(|| format!("Opening {disk_path}"))?;
    file.set_len(disk_size)
        .with_context(|| format!("Sizing {disk_path}"))?;
    drop(file);

    // Installer VM: site volume first, then install media
    let mut vm = QemuConfig::new(parse_memory_to_mb(&opts.memory.memory)?, opts.cpus.cpus);
    vm.add_disk(&disk_path, DiskFormat::Raw)
        .add_cdrom(&site_iso_path)
        .add_cdrom(&media);

    info!("Starting installer VM for OpenBSD {}", opts.version);
    let mut child = vm.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| color_eyre::eyre::eyre!("VM stdout not piped"))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| color_eyre::eyre::eyre!("VM stdin not piped"))?;

    let mut console = Console::new(stdout, stdin);
    let transcript_path = ws.logs_dir().join(format!("install-{}.log", opts.version));
    let transcript = File::create(&transcript_path)
        .with_context(|| format!("Opening {transcript_path}"))?;
    console.set_transcript(transcript);
    info!("Console transcript: {transcript_path}");

    let driver = InstallerDriver::new(DriverTimeouts::default(), &opts.root_password);
    let result = driver.run(&mut console);

    // The VM should be gone after halt -p; make sure of it either way
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_file(&site_iso_path);

    match result {
        Ok(steps) => {
            debug!("driver completed {} steps", steps.len());
            info!("Raw disk image ready: {disk_path}");
            println!("{disk_path}");
            Ok(())
        }
        Err(e) => {
            // A partial install is unusable; remove it so a rerun starts clean
            let _ = std::fs::remove_file(&disk_path);
            Err(e)
        }
    }
}
