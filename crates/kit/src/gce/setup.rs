//! gce setup command - persist cloud environment into the shell profile

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::info;

use crate::profile;

/// Options for persisting cloud environment variables
#[derive(Debug, Parser)]
pub struct GceSetupOpts {
    /// Project id exported as CLOUDSDK_CORE_PROJECT
    #[clap(long)]
    pub project: String,

    /// Service-account key path exported as GOOGLE_APPLICATION_CREDENTIALS
    #[clap(long)]
    pub credentials: Utf8PathBuf,

    /// Profile file to edit (defaults to ~/.profile)
    #[clap(long)]
    pub profile: Option<Utf8PathBuf>,
}

/// The export lines the managed block will hold.
pub fn env_lines(project: &str, credentials: &Utf8PathBuf) -> Vec<String> {
    vec![
        format!("export CLOUDSDK_CORE_PROJECT={project}"),
        format!("export GOOGLE_APPLICATION_CREDENTIALS={credentials}"),
    ]
}

/// Execute the gce setup command
pub fn run(opts: GceSetupOpts) -> Result<()> {
    let path = match opts.profile {
        Some(p) => p,
        None => {
            let home = dirs::home_dir().ok_or_else(|| eyre!("Could not determine home directory"))?;
            Utf8PathBuf::from_path_buf(home.join(".profile"))
                .map_err(|p| eyre!("Non-UTF-8 home directory path: {}", p.display()))?
        }
    };
    profile::upsert_block(&path, &env_lines(&opts.project, &opts.credentials))?;
    info!("Updated {path}; reload your shell or 'source' it to apply");
    Ok(())
}
