//! CLI entry point for obik.

use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};

use obik::{build, deps, fetch, gce, package};

/// Build unattended OpenBSD installation images and move them through
/// Google Compute Engine's image-import pipeline.
///
/// obik automates the whole path from release ISO to bootable cloud
/// image: fetching install media, generating autoinstall configuration,
/// driving the installer in a local VM over its serial console, packaging
/// the result, and registering it with the cloud provider.
#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available obik commands.
#[derive(Subcommand)]
enum Commands {
    /// Check for (and install) the external tools the pipeline invokes
    Deps(deps::DepsOpts),

    /// Download the versioned install ISO into the workspace cache
    Fetch(fetch::FetchOpts),

    /// Run the unattended install and produce the raw disk image
    Build(build::BuildOpts),

    /// Convert the raw disk image into distribution formats
    Package(package::PackageOpts),

    /// Cloud-side operations: upload, import, create, rm, setup
    Gce(gce::GceOpts),
}

/// Install and configure the tracing/logging system.
///
/// Structured logging goes to stderr with environment-based filtering
/// (RUST_LOG, defaulting to 'info') and error layer integration.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Deps(opts) => deps::run(opts)?,
        Commands::Fetch(opts) => fetch::run(opts)?,
        Commands::Build(opts) => build::run(opts)?,
        Commands::Package(opts) => package::run(opts)?,
        Commands::Gce(opts) => opts.run()?,
    }
    tracing::debug!("exiting");
    Ok(())
}
