//! Google Compute Engine integration for obik
//!
//! This module provides the cloud side of the pipeline with subcommands for:
//! - `upload`: Upload a packaged image tarball to Cloud Storage
//! - `import`: Register a GCE image from an uploaded tarball
//! - `create`: Create an instance from an imported image
//! - `rm`: Delete pipeline-created cloud resources
//! - `setup`: Persist project/credential environment into the shell profile

use std::process::Command;

use clap::{Parser, Subcommand};
use color_eyre::Result;

pub mod create;
pub mod import;
pub mod rm;
pub mod setup;
pub mod upload;

/// Options shared by every GCE operation.
#[derive(Debug, Parser, Clone, Default)]
pub struct GceGlobalOpts {
    /// Cloud project id (falls back to the gcloud default)
    #[clap(long)]
    pub project: Option<String>,

    /// Compute zone for instance operations
    #[clap(long, default_value = "us-central1-a")]
    pub zone: String,
}

impl GceGlobalOpts {
    /// Create a gcloud Command carrying the project selection and quiet
    /// non-interactive output.
    pub fn gcloud_command(&self) -> Command {
        let mut cmd = Command::new("gcloud");
        cmd.arg("--quiet");
        if let Some(ref project) = self.project {
            cmd.arg(format!("--project={project}"));
        }
        cmd
    }

    /// Create a gsutil Command for storage operations.
    pub fn gsutil_command(&self) -> Command {
        Command::new("gsutil")
    }
}

/// GCE subcommands for moving built images into the cloud
#[derive(Debug, Parser)]
pub struct GceOpts {
    /// Shared project/zone selection
    #[clap(flatten)]
    pub global: GceGlobalOpts,

    /// Operation to perform
    #[command(subcommand)]
    pub command: GceCommands,
}

/// The individual GCE operations.
#[derive(Debug, Subcommand)]
pub enum GceCommands {
    /// Upload a packaged image tarball to Cloud Storage
    Upload(upload::GceUploadOpts),

    /// Register a GCE image from an uploaded tarball
    Import(import::GceImportOpts),

    /// Create an instance from an imported image
    Create(create::GceCreateOpts),

    /// Delete pipeline-created cloud resources
    #[clap(name = "rm")]
    Remove(rm::GceRmOpts),

    /// Persist project/credential environment into the shell profile
    Setup(setup::GceSetupOpts),
}

impl GceOpts {
    /// Dispatch to the selected operation.
    pub fn run(self) -> Result<()> {
        match self.command {
            GceCommands::Upload(opts) => upload::run(&self.global, opts),
            GceCommands::Import(opts) => import::run(&self.global, opts),
            GceCommands::Create(opts) => create::run(&self.global, opts),
            GceCommands::Remove(opts) => rm::run(&self.global, opts),
            GceCommands::Setup(opts) => setup::run(opts),
        }
    }
}
