//! Extension helpers for running external tools.
//!
//! Every non-trivial operation in this pipeline is delegated to an external
//! tool (qemu, xorriso, tar, gcloud, gsutil); these helpers standardize how
//! exit status and captured output are handled.

use std::process::{Command, Output, Stdio};

use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Convenience methods over [`std::process::Command`].
pub trait CommandRunExt {
    /// Run the command, surfacing a non-zero exit as an error that carries
    /// the tool's stderr.
    fn run(&mut self) -> Result<()>;

    /// Run the command and parse its stdout as JSON.
    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T>;

    /// Run the command and return its stdout as a string, surfacing a
    /// non-zero exit as an error that carries the tool's stderr.
    fn run_capture_stdout(&mut self) -> Result<String>;

    /// Run the command and report only whether it exited successfully,
    /// discarding all output. Used for existence probes.
    fn run_check(&mut self) -> Result<bool>;
}

fn describe(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn checked_output(cmd: &mut Command) -> Result<Output> {
    let name = describe(cmd);
    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| eyre!("Failed to run {name}: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(eyre!(
            "{name} exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }
    Ok(output)
}

impl CommandRunExt for Command {
    fn run(&mut self) -> Result<()> {
        checked_output(self).map(|_| ())
    }

    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let name = describe(self);
        let out = checked_output(self)?;
        serde_json::from_slice(&out.stdout)
            .map_err(|e| eyre!("Failed to parse {name} JSON output: {e}"))
    }

    fn run_capture_stdout(&mut self) -> Result<String> {
        let out = checked_output(self)?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    fn run_check(&mut self) -> Result<bool> {
        let name = describe(self);
        let output = self
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| eyre!("Failed to run {name}: {e}"))?;
        Ok(output.status.success())
    }
}
