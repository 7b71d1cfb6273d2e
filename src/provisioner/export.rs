//! Block Export Configuration
//!
//! Manages the per-volume target descriptor files read by the export daemon
//! and forwards apply/delete actions to the daemon. File operations and
//! daemon actions never gate each other.

use crate::domain::ports::ExportDaemonRef;
use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File mode of target descriptors; the daemon only needs read access
const TARGET_CONFIG_MODE: u32 = 0o644;

// =============================================================================
// Target Config
// =============================================================================

/// Declaration of one block export target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTargetConfig {
    /// Globally unique target name (`<IQN prefix>:<identity>`)
    pub target_name: String,
    /// Device backing the target
    pub backing_path: PathBuf,
}

impl ExportTargetConfig {
    /// Render the descriptor file contents
    pub fn render(&self) -> String {
        format!(
            "<target {}>\n    # Provided device as an iSCSI target\n    backing-store {}\n</target>\n",
            self.target_name,
            self.backing_path.display()
        )
    }
}

// =============================================================================
// Target Config Manager
// =============================================================================

/// Owns the target config directory and the daemon handle
pub struct TargetConfigManager {
    config_dir: PathBuf,
    daemon: ExportDaemonRef,
}

impl TargetConfigManager {
    pub fn new(config_dir: PathBuf, daemon: ExportDaemonRef) -> Self {
        Self { config_dir, daemon }
    }

    /// Path of the descriptor for `identity`
    pub fn config_path(&self, identity: &str) -> PathBuf {
        self.config_dir.join(format!("{}.conf", identity))
    }

    /// Write the descriptor for `identity`, replacing any previous one
    pub fn write(&self, identity: &str, target: &ExportTargetConfig) -> Result<PathBuf> {
        let path = self.config_path(identity);
        debug!("Writing target config {}", path.display());

        fs::write(&path, target.render()).map_err(|e| config_error(&path, e))?;
        set_mode(&path)?;

        Ok(path)
    }

    /// Remove the descriptor for `identity`. Returns whether a file was removed.
    pub fn remove(&self, identity: &str) -> Result<bool> {
        let path = self.config_path(identity);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed target config {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(config_error(&path, e)),
        }
    }

    /// Ask the daemon to pick up descriptor changes
    pub fn apply(&self, identity: &str) -> Result<()> {
        self.daemon.apply_target_config(identity)
    }

    /// Tear down both the live target and its descriptor.
    ///
    /// Both steps are always attempted; every failure is returned.
    pub fn teardown(&self, identity: &str, target_name: &str) -> Vec<Error> {
        let mut errors = Vec::new();

        if let Err(e) = self.daemon.delete_target(target_name) {
            errors.push(e);
        }

        match self.remove(identity) {
            Ok(true) => info!("Removed target config for {}", identity),
            Ok(false) => debug!("No target config for {}", identity),
            Err(e) => errors.push(e),
        }

        errors
    }
}

fn config_error(path: &Path, e: std::io::Error) -> Error {
    Error::ExportConfig {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(TARGET_CONFIG_MODE))
        .map_err(|e| config_error(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{DaemonCall, RecordingDaemon};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn target() -> ExportTargetConfig {
        ExportTargetConfig {
            target_name: "iqn.2020-01.example:pvc-2".into(),
            backing_path: PathBuf::from("/dev/zvol/tank/volumes/pvc-2"),
        }
    }

    #[test]
    fn test_render() {
        let rendered = target().render();
        assert_eq!(
            rendered,
            "<target iqn.2020-01.example:pvc-2>\n    # Provided device as an iSCSI target\n    backing-store /dev/zvol/tank/volumes/pvc-2\n</target>\n"
        );
        assert_eq!(rendered, target().render());
    }

    #[test]
    fn test_write_and_remove() {
        let tmp = TempDir::new().unwrap();
        let manager =
            TargetConfigManager::new(tmp.path().to_path_buf(), Arc::new(RecordingDaemon::new()));

        let path = manager.write("pvc-2", &target()).unwrap();
        assert_eq!(path, tmp.path().join("pvc-2.conf"));
        assert_eq!(fs::read_to_string(&path).unwrap(), target().render());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }

        assert!(manager.remove("pvc-2").unwrap());
        assert!(!path.exists());
        // Removing again is not an error
        assert!(!manager.remove("pvc-2").unwrap());
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let tmp = TempDir::new().unwrap();
        let manager = TargetConfigManager::new(
            tmp.path().join("missing"),
            Arc::new(RecordingDaemon::new()),
        );

        assert!(matches!(
            manager.write("pvc-2", &target()),
            Err(Error::ExportConfig { .. })
        ));
    }

    #[test]
    fn test_teardown_attempts_both_steps() {
        let tmp = TempDir::new().unwrap();
        let daemon = Arc::new(RecordingDaemon::new());
        daemon.fail_delete(true);
        let manager = TargetConfigManager::new(tmp.path().to_path_buf(), daemon.clone());

        manager.write("pvc-2", &target()).unwrap();
        let errors = manager.teardown("pvc-2", "iqn.2020-01.example:pvc-2");

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::ExportDaemon { .. }));
        assert!(!manager.config_path("pvc-2").exists());
        assert_eq!(
            daemon.calls(),
            vec![DaemonCall::DeleteTarget("iqn.2020-01.example:pvc-2".into())]
        );
    }
}
