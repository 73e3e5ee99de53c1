//! gce create command - boot an instance from an imported image

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::info;

use crate::cmdext::CommandRunExt;
use crate::gce::GceGlobalOpts;
use crate::utils::require_tool;

/// Options for creating an instance
#[derive(Debug, Parser)]
pub struct GceCreateOpts {
    /// Instance name
    pub name: String,

    /// Image to boot from
    #[clap(long)]
    pub image: String,

    /// Machine type
    #[clap(long, default_value = "e2-small")]
    pub machine_type: String,
}

/// Execute the gce create command
pub fn run(global: &GceGlobalOpts, opts: GceCreateOpts) -> Result<()> {
    require_tool("gcloud", "Google Cloud SDK")?;
    info!(
        "Creating instance '{}' from image '{}' in {}",
        opts.name, opts.image, global.zone
    );
    global
        .gcloud_command()
        .args([
            "compute",
            "instances",
            "create",
            &opts.name,
            &format!("--image={}", opts.image),
            &format!("--zone={}", global.zone),
            &format!("--machine-type={}", opts.machine_type),
            // The only console an OpenBSD guest has here is the serial one
            "--metadata=serial-port-enable=true",
        ])
        .run()
        .with_context(|| format!("Creating instance {}", opts.name))?;
    println!("{}", opts.name);
    Ok(())
}
