//! gce rm command - delete pipeline-created cloud resources
//!
//! Deletion is by exact name for each resource kind the pipeline creates.
//! An absent resource is a warning, not an error, so teardown of a
//! partially built pipeline converges. `--dry-run` reports every intended
//! deletion without performing any destructive call.

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{info, warn};

use crate::cmdext::CommandRunExt;
use crate::gce::GceGlobalOpts;
use crate::utils::require_tool;

/// The kinds of resource the pipeline can leave behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    /// A compute instance.
    Instance,
    /// A compute image.
    Image,
    /// A storage object (gs:// URI).
    Object,
}

/// One intended deletion, with the probed existence of its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    /// What kind of resource this is.
    pub kind: ResourceKind,
    /// Exact resource name or URI.
    pub name: String,
    /// Whether the resource currently exists.
    pub exists: bool,
}

impl Deletion {
    /// Human-readable description of what will (not) happen.
    pub fn describe(&self) -> String {
        if self.exists {
            format!("delete {} '{}'", self.kind, self.name)
        } else {
            format!("{} '{}' not found, nothing to delete", self.kind, self.name)
        }
    }
}

/// Options for deleting cloud resources
#[derive(Debug, Parser)]
pub struct GceRmOpts {
    /// Instance to delete
    #[clap(long)]
    pub instance: Option<String>,

    /// Image to delete
    #[clap(long)]
    pub image: Option<String>,

    /// Storage object to delete (gs://bucket/object)
    #[clap(long)]
    pub object: Option<String>,

    /// Report intended deletions without performing them
    #[clap(long)]
    pub dry_run: bool,
}

/// Build the deletion plan from the requested names and a probe function.
///
/// Split from execution so the plan (and dry-run reporting) is a pure
/// function of the probe results.
pub fn plan(
    opts: &GceRmOpts,
    mut probe: impl FnMut(ResourceKind, &str) -> Result<bool>,
) -> Result<Vec<Deletion>> {
    let mut deletions = Vec::new();
    let targets = [
        (ResourceKind::Instance, opts.instance.as_ref()),
        (ResourceKind::Image, opts.image.as_ref()),
        (ResourceKind::Object, opts.object.as_ref()),
    ];
    for (kind, name) in targets {
        if let Some(name) = name {
            let exists = probe(kind, name)?;
            deletions.push(Deletion {
                kind,
                name: name.clone(),
                exists,
            });
        }
    }
    Ok(deletions)
}

fn probe_resource(global: &GceGlobalOpts, kind: ResourceKind, name: &str) -> Result<bool> {
    match kind {
        ResourceKind::Instance => global
            .gcloud_command()
            .args([
                "compute",
                "instances",
                "describe",
                name,
                &format!("--zone={}", global.zone),
            ])
            .run_check(),
        ResourceKind::Image => global
            .gcloud_command()
            .args(["compute", "images", "describe", name])
            .run_check(),
        ResourceKind::Object => global.gsutil_command().args(["ls", name]).run_check(),
    }
}

fn delete_resource(global: &GceGlobalOpts, kind: ResourceKind, name: &str) -> Result<()> {
    match kind {
        ResourceKind::Instance => global
            .gcloud_command()
            .args([
                "compute",
                "instances",
                "delete",
                name,
                &format!("--zone={}", global.zone),
            ])
            .run(),
        ResourceKind::Image => global
            .gcloud_command()
            .args(["compute", "images", "delete", name])
            .run(),
        ResourceKind::Object => global.gsutil_command().args(["rm", name]).run(),
    }
    .with_context(|| format!("Deleting {kind} {name}"))
}

/// Execute the gce rm command
pub fn run(global: &GceGlobalOpts, opts: GceRmOpts) -> Result<()> {
    require_tool("gcloud", "Google Cloud SDK")?;
    let deletions = plan(&opts, |kind, name| probe_resource(global, kind, name))?;
    if deletions.is_empty() {
        info!("Nothing selected; pass --instance, --image and/or --object");
        return Ok(());
    }

    for deletion in &deletions {
        if opts.dry_run {
            println!("[dry-run] {}", deletion.describe());
            continue;
        }
        if !deletion.exists {
            warn!("{}", deletion.describe());
            continue;
        }
        info!("{}", deletion.describe());
        delete_resource(global, deletion.kind, &deletion.name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> GceRmOpts {
        GceRmOpts {
            instance: Some("obsd-test".to_string()),
            image: Some("obik-openbsd-78".to_string()),
            object: Some("gs://bucket/openbsd-7.8-amd64.tar.gz".to_string()),
            dry_run: true,
        }
    }

    #[test]
    fn test_plan_covers_every_requested_target() -> Result<()> {
        let mut probed = Vec::new();
        let deletions = plan(&opts(), |kind, name| {
            probed.push((kind, name.to_string()));
            Ok(true)
        })?;
        assert_eq!(deletions.len(), 3);
        assert_eq!(probed.len(), 3);
        assert!(deletions.iter().all(|d| d.exists));
        Ok(())
    }

    #[test]
    fn test_absent_resources_are_reported_not_errors() -> Result<()> {
        let deletions = plan(&opts(), |_, _| Ok(false))?;
        for deletion in &deletions {
            assert!(deletion.describe().contains("not found"));
        }
        Ok(())
    }

    #[test]
    fn test_plan_skips_unselected_kinds() -> Result<()> {
        let opts = GceRmOpts {
            instance: None,
            image: Some("img".to_string()),
            object: None,
            dry_run: false,
        };
        let deletions = plan(&opts, |_, _| Ok(true))?;
        assert_eq!(deletions.len(), 1);
        assert_eq!(deletions[0].kind, ResourceKind::Image);
        Ok(())
    }

    #[test]
    fn test_describe_names_the_kind() {
        let d = Deletion {
            kind: ResourceKind::Image,
            name: "obik-openbsd-78".to_string(),
            exists: true,
        };
        assert_eq!(d.describe(), "delete image 'obik-openbsd-78'");
    }
}
