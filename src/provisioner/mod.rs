//! Volume Lifecycle Engine
//!
//! Translates provisioning and deletion requests into dataset and export
//! operations, and derives usage metrics from the same dataset tree.
//!
//! - [`naming`]: dataset paths and identity lookup
//! - [`kind`]: per-export-kind provisioning strategy
//! - [`export`]: block target descriptor files and daemon actions
//! - [`provision`] / [`delete`]: the two inbound operations
//! - [`metrics`]: Prometheus collector over the managed datasets

pub mod delete;
pub mod export;
pub mod kind;
pub mod metrics;
pub mod naming;
pub mod provision;

pub use export::{ExportTargetConfig, TargetConfigManager};
pub use kind::VolumeKind;
pub use metrics::VolumeMetricsCollector;
pub use naming::{dataset_path, resolve, validate_identity};

use crate::domain::ports::{DatasetEngineRef, ExportDaemonRef, ManagedDataset};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Process-wide provisioner configuration, fixed after startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvisionerConfig {
    /// Dataset under which every volume is created
    pub parent_dataset: String,
    /// Directory holding one target descriptor per block volume
    pub target_config_dir: PathBuf,
    /// Export ACL for NFS volumes without a `shareOptions` parameter
    pub default_share_options: String,
    /// Directory where the engine exposes block volumes as devices
    pub zvol_device_root: PathBuf,
    /// Advertised export endpoint; falls back to `hostname -f`
    pub server_hostname: Option<String>,
    /// LUN advertised for iSCSI targets
    pub iscsi_lun: i32,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            parent_dataset: String::new(),
            target_config_dir: PathBuf::from("/etc/tgt/conf.d"),
            default_share_options: "rw=@10.0.0.0/8".to_string(),
            zvol_device_root: PathBuf::from("/dev/zvol"),
            server_hostname: None,
            iscsi_lun: 1,
        }
    }
}

impl ProvisionerConfig {
    /// Create a configuration rooted at `parent_dataset`
    pub fn new(parent_dataset: impl Into<String>) -> Self {
        Self {
            parent_dataset: parent_dataset.into(),
            ..Default::default()
        }
    }

    /// Load a YAML configuration file
    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.parent_dataset.is_empty() {
            return Err(Error::Configuration("parent dataset must be set".into()));
        }
        if self.parent_dataset.starts_with('/') || self.parent_dataset.ends_with('/') {
            return Err(Error::Configuration(format!(
                "parent dataset must not start or end with '/': {}",
                self.parent_dataset
            )));
        }
        if self.parent_dataset.contains('@') {
            return Err(Error::Configuration(format!(
                "parent dataset must not be a snapshot: {}",
                self.parent_dataset
            )));
        }
        if self.target_config_dir.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "target config directory must be set".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Provisioner
// =============================================================================

/// Volume lifecycle engine over one parent dataset
pub struct Provisioner {
    pub(crate) config: ProvisionerConfig,
    pub(crate) engine: DatasetEngineRef,
    pub(crate) exports: TargetConfigManager,
}

impl Provisioner {
    /// Create a new provisioner
    pub fn new(
        config: ProvisionerConfig,
        engine: DatasetEngineRef,
        daemon: ExportDaemonRef,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            "Provisioner ready: parent={}, target config dir={}",
            config.parent_dataset,
            config.target_config_dir.display()
        );

        let exports = TargetConfigManager::new(config.target_config_dir.clone(), daemon);

        Ok(Self {
            config,
            engine,
            exports,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Get the storage engine handle
    pub fn engine(&self) -> &DatasetEngineRef {
        &self.engine
    }

    /// Resolve a volume identity to its dataset under the parent
    pub fn resolve(&self, identity: &str) -> Result<Option<ManagedDataset>> {
        resolve(self.engine.as_ref(), &self.config.parent_dataset, identity)
    }

    /// Check the parent dataset can be enumerated
    pub fn check_engine(&self) -> Result<()> {
        self.engine
            .children(&self.config.parent_dataset, Some(1))
            .map(|_| ())
    }

    /// Hostname advertised by this server: configured value or the local FQDN
    pub fn local_hostname(&self) -> Result<String> {
        match &self.config.server_hostname {
            Some(hostname) => Ok(hostname.clone()),
            None => system_hostname(),
        }
    }

    /// Build the metrics collector for this provisioner's parent dataset
    pub fn metrics_collector(&self) -> Result<VolumeMetricsCollector> {
        let hostname = self.local_hostname()?;
        VolumeMetricsCollector::new(
            &self.config.parent_dataset,
            &hostname,
            self.engine.clone(),
        )
    }
}

/// Query the fully-qualified hostname of this machine
pub fn system_hostname() -> Result<String> {
    debug!("Running hostname -f");

    let output = Command::new("hostname")
        .arg("-f")
        .output()
        .map_err(|e| Error::Hostname(format!("failed to run hostname -f: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Hostname(stderr.trim().to_string()));
    }

    let hostname = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if hostname.is_empty() {
        return Err(Error::Hostname("hostname -f returned nothing".into()));
    }
    Ok(hostname)
}
