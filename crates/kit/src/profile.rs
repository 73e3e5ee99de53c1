//! Idempotent managed blocks in shell profile files.
//!
//! The cloud CLI reads its project and credential location from the
//! environment; `obik gce setup` persists those exports into the
//! operator's shell profile. Edits are confined to one marker-delimited
//! block: the previous file is backed up first, any prior managed blocks
//! are removed, and the new block is appended, so re-running converges to
//! a single block instead of accumulating duplicates.

use camino::Utf8Path;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{debug, warn};

/// First line of the managed block.
pub const BLOCK_BEGIN: &str = "# >>> obik managed block >>>";
/// Last line of the managed block.
pub const BLOCK_END: &str = "# <<< obik managed block <<<";

/// Remove every managed block from the content, keeping everything else.
///
/// An unterminated begin marker swallows the rest of the file; that only
/// happens if the operator hand-edited the block, and re-upserting
/// restores it.
pub fn strip_managed_blocks(content: &str) -> String {
    let mut out = String::new();
    let mut in_block = false;
    for line in content.lines() {
        if line.trim() == BLOCK_BEGIN {
            in_block = true;
            continue;
        }
        if line.trim() == BLOCK_END {
            in_block = false;
            continue;
        }
        if !in_block {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Render a managed block holding the given lines.
pub fn render_block(lines: &[String]) -> String {
    let mut block = String::new();
    block.push_str(BLOCK_BEGIN);
    block.push('\n');
    for line in lines {
        block.push_str(line);
        block.push('\n');
    }
    block.push_str(BLOCK_END);
    block.push('\n');
    block
}

/// Upsert the managed block into the profile at `path`.
///
/// The pre-edit file is kept as `<path>.obik.bak`; failure to remove a
/// stale backup is a warning, not an error.
pub fn upsert_block(path: &Utf8Path, lines: &[String]) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("Reading {path}")),
    };

    let backup = path.with_extension("obik.bak");
    if !existing.is_empty() {
        if backup.exists() {
            if let Err(e) = std::fs::remove_file(&backup) {
                warn!("could not remove stale backup {backup}: {e}");
            }
        }
        std::fs::write(&backup, &existing).with_context(|| format!("Writing backup {backup}"))?;
        debug!("backed up {path} to {backup}");
    }

    let mut updated = strip_managed_blocks(&existing);
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&render_block(lines));
    std::fs::write(path, updated).with_context(|| format!("Writing {path}"))?;
    Ok(())
}
