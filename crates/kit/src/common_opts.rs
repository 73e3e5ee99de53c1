//! Common CLI options shared across commands

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::Result;

use crate::workspace::Workspace;

/// Default guest memory for the installer VM.
pub const DEFAULT_MEMORY_USER_STR: &str = "1G";
/// Default vCPU count for the installer VM.
pub const DEFAULT_CPUS: u32 = 2;
/// Default size of the created target disk.
pub const DEFAULT_DISK_SIZE: &str = "25G";

/// Workspace location options
#[derive(Parser, Debug, Clone, Default)]
pub struct WorkspaceOpts {
    /// Build workspace directory (cache, artifacts, temp, logs)
    #[clap(long = "workspace")]
    pub workspace: Option<Utf8PathBuf>,
}

impl WorkspaceOpts {
    /// Open (creating if needed) the selected or default workspace.
    pub fn open(&self) -> Result<Workspace> {
        let root = match &self.workspace {
            Some(r) => r.clone(),
            None => Workspace::default_root()?,
        };
        Workspace::create(root)
    }
}

/// Memory size options
#[derive(Parser, Debug, Clone)]
pub struct MemoryOpts {
    /// Memory size (e.g. 1G, 2048M, or plain number for MB)
    #[clap(long, default_value = DEFAULT_MEMORY_USER_STR)]
    pub memory: String,
}

impl Default for MemoryOpts {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY_USER_STR.to_string(),
        }
    }
}

/// CPU count options
#[derive(Parser, Debug, Clone)]
pub struct CpuOpts {
    /// Number of virtual CPUs
    #[clap(long, default_value_t = DEFAULT_CPUS)]
    pub cpus: u32,
}

impl Default for CpuOpts {
    fn default() -> Self {
        Self { cpus: DEFAULT_CPUS }
    }
}

/// Disk size options
#[derive(Parser, Debug, Clone)]
pub struct DiskSizeOpts {
    /// Disk size (e.g. 25G, 10240M, or plain number for bytes)
    #[clap(long, default_value = DEFAULT_DISK_SIZE)]
    pub disk_size: String,
}

impl Default for DiskSizeOpts {
    fn default() -> Self {
        Self {
            disk_size: DEFAULT_DISK_SIZE.to_string(),
        }
    }
}
