//! tgt Export Daemon Adapter
//!
//! Controls the Linux SCSI target daemon through `tgt-admin`.

use crate::domain::ports::ExportDaemon;
use crate::error::{Error, Result};
use std::process::Command;
use tracing::debug;

/// [`ExportDaemon`] backed by `tgt-admin`
#[derive(Debug, Clone)]
pub struct TgtAdmin {
    binary: String,
}

impl Default for TgtAdmin {
    fn default() -> Self {
        Self::new()
    }
}

impl TgtAdmin {
    /// Use `tgt-admin` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("tgt-admin")
    }

    /// Use a specific `tgt-admin` binary
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, action: &str, args: &[&str]) -> Result<()> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| Error::ExportDaemon {
                action: action.into(),
                reason: format!("failed to run {}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExportDaemon {
                action: action.into(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(())
    }
}

impl ExportDaemon for TgtAdmin {
    fn apply_target_config(&self, identity: &str) -> Result<()> {
        // tgt-admin has no per-file reload; -e applies every config file
        debug!("Applying target config for {}", identity);
        self.run("apply", &["-e"])
    }

    fn delete_target(&self, target_name: &str) -> Result<()> {
        self.run("delete", &["--delete", target_name])
    }
}
