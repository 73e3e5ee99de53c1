//! gce upload command - move a packaged image tarball into Cloud Storage

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::{debug, info};

use crate::cmdext::CommandRunExt;
use crate::gce::GceGlobalOpts;
use crate::utils::require_tool;

/// Options for uploading an artifact to Cloud Storage
#[derive(Debug, Parser)]
pub struct GceUploadOpts {
    /// Local artifact to upload (normally the .tar.gz from 'obik package')
    pub artifact: Utf8PathBuf,

    /// Target storage bucket (without the gs:// prefix)
    #[clap(long)]
    pub bucket: String,

    /// Object name in the bucket (defaults to the artifact filename)
    #[clap(long)]
    pub object: Option<String>,
}

/// Compose a gs:// URI from bucket and object names.
pub fn gs_uri(bucket: &str, object: &str) -> String {
    format!("gs://{bucket}/{object}")
}

/// Execute the gce upload command
pub fn run(global: &GceGlobalOpts, opts: GceUploadOpts) -> Result<()> {
    require_tool("gsutil", "Google Cloud SDK")?;
    if !opts.artifact.exists() {
        return Err(eyre!("Artifact not found: {}", opts.artifact));
    }
    let object = match &opts.object {
        Some(o) => o.clone(),
        None => opts
            .artifact
            .file_name()
            .ok_or_else(|| eyre!("Artifact path {} has no filename", opts.artifact))?
            .to_string(),
    };

    // Create the bucket if it does not exist; bucket naming compliance is
    // the operator's responsibility
    let bucket_uri = format!("gs://{}", opts.bucket);
    let exists = global
        .gsutil_command()
        .args(["ls", "-b", &bucket_uri])
        .run_check()?;
    if !exists {
        info!("Creating bucket {bucket_uri}");
        let mut cmd = global.gsutil_command();
        cmd.arg("mb");
        if let Some(ref project) = global.project {
            cmd.args(["-p", project]);
        }
        cmd.arg(&bucket_uri);
        cmd.run().with_context(|| format!("Creating {bucket_uri}"))?;
    } else {
        debug!("bucket {bucket_uri} already exists");
    }

    let target = gs_uri(&opts.bucket, &object);
    info!("Uploading {} to {target}", opts.artifact);
    global
        .gsutil_command()
        .args(["cp", opts.artifact.as_str(), &target])
        .run()
        .with_context(|| format!("Uploading to {target}"))?;

    println!("{target}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gs_uri() {
        assert_eq!(
            gs_uri("my-bucket", "openbsd-7.8-amd64.tar.gz"),
            "gs://my-bucket/openbsd-7.8-amd64.tar.gz"
        );
    }
}
