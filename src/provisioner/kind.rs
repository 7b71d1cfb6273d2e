//! Volume Kind Strategy
//!
//! The closed set of export kinds. Each kind knows how to create its backing
//! dataset together with its export, and how to tear the export down again.

use super::export::ExportTargetConfig;
use super::naming::{dataset_path, resolve};
use super::Provisioner;
use crate::domain::ports::{
    ExportDescriptor, VolumeRecord, VolumeRequest, PARAM_IQN, PARAM_KIND, PARAM_SHARE_OPTIONS,
    PROP_REFQUOTA, PROP_REFRESERVATION, PROP_SHARENFS,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Export kind of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Filesystem dataset shared over NFS
    FileExport,
    /// Block dataset served as an iSCSI target
    BlockExport,
}

impl VolumeKind {
    /// Select the kind named by the request's `kind` parameter (default `nfs`)
    /// and check the parameters that kind requires.
    pub fn from_request(request: &VolumeRequest) -> Result<Self> {
        let kind = match request.parameter(PARAM_KIND).unwrap_or("nfs") {
            "nfs" => VolumeKind::FileExport,
            "iscsi" => VolumeKind::BlockExport,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown volume kind: {}",
                    other
                )))
            }
        };

        if kind == VolumeKind::BlockExport
            && request.parameter(PARAM_IQN).map_or(true, str::is_empty)
        {
            return Err(Error::InvalidArgument(format!(
                "parameter {} is required for iscsi volumes",
                PARAM_IQN
            )));
        }

        Ok(kind)
    }

    /// Kind of an already provisioned volume
    pub fn of_export(export: &ExportDescriptor) -> Self {
        match export {
            ExportDescriptor::Nfs { .. } => VolumeKind::FileExport,
            ExportDescriptor::Iscsi { .. } => VolumeKind::BlockExport,
        }
    }

    /// Create the backing dataset and its export
    pub(crate) fn provision_dataset(
        self,
        provisioner: &Provisioner,
        request: &VolumeRequest,
        server: &str,
    ) -> Result<ExportDescriptor> {
        match self {
            VolumeKind::FileExport => provision_filesystem(provisioner, request, server),
            VolumeKind::BlockExport => provision_block(provisioner, request, server),
        }
    }

    /// Remove the export of a volume. Failures are logged, never returned.
    pub(crate) fn deprovision_export(self, provisioner: &Provisioner, record: &VolumeRecord) {
        let ExportDescriptor::Iscsi { target_name, .. } = &record.export else {
            // Destroying the dataset drops its NFS share
            return;
        };

        for e in provisioner.exports.teardown(&record.name, target_name) {
            warn!("Removing export of {} failed: {}", record.name, e);
        }
    }
}

fn provision_filesystem(
    provisioner: &Provisioner,
    request: &VolumeRequest,
    server: &str,
) -> Result<ExportDescriptor> {
    let config = &provisioner.config;
    let path = dataset_path(&config.parent_dataset, &request.name);

    let share_options = request
        .parameter(PARAM_SHARE_OPTIONS)
        .unwrap_or(config.default_share_options.as_str());
    let size = request.capacity_bytes.to_string();

    let mut properties = BTreeMap::new();
    properties.insert(PROP_SHARENFS.to_string(), share_options.to_string());
    properties.insert(PROP_REFQUOTA.to_string(), size.clone());
    properties.insert(PROP_REFRESERVATION.to_string(), size);

    let dataset = match provisioner.engine.create_filesystem(&path, &properties) {
        Ok(dataset) => dataset,
        Err(e @ Error::AlreadyExists { .. }) => return Err(e),
        Err(e) => {
            cleanup_partial(provisioner, &request.name);
            return Err(as_create_error(&path, e));
        }
    };

    let Some(mountpoint) = dataset.mountpoint else {
        cleanup_partial(provisioner, &request.name);
        return Err(Error::Create {
            dataset: path,
            reason: "filesystem has no mountpoint".into(),
        });
    };

    info!("Created filesystem {} mounted at {}", path, mountpoint);

    Ok(ExportDescriptor::Nfs {
        server: server.to_string(),
        path: mountpoint,
    })
}

fn provision_block(
    provisioner: &Provisioner,
    request: &VolumeRequest,
    server: &str,
) -> Result<ExportDescriptor> {
    let config = &provisioner.config;
    let path = dataset_path(&config.parent_dataset, &request.name);
    let iqn_prefix = request.parameter(PARAM_IQN).unwrap_or_default();

    let target = ExportTargetConfig {
        target_name: format!("{}:{}", iqn_prefix, request.name),
        backing_path: config.zvol_device_root.join(&path),
    };

    provisioner.exports.write(&request.name, &target)?;

    match provisioner
        .engine
        .create_volume(&path, request.capacity_bytes, &BTreeMap::new())
    {
        Ok(_) => {}
        // The descriptor belongs to the existing volume as well
        Err(e @ Error::AlreadyExists { .. }) => return Err(e),
        Err(e) => {
            if let Err(remove_err) = provisioner.exports.remove(&request.name) {
                warn!(
                    "Removing target config of failed volume {} failed: {}",
                    request.name, remove_err
                );
            }
            return Err(as_create_error(&path, e));
        }
    }

    info!(
        "Created block volume {} ({} bytes) as target {}",
        path, request.capacity_bytes, target.target_name
    );

    // The target becomes reachable on the next successful reload
    if let Err(e) = provisioner.exports.apply(&request.name) {
        warn!("Updating export daemon for {} failed: {}", request.name, e);
    }

    Ok(ExportDescriptor::Iscsi {
        portal: server.to_string(),
        target_name: target.target_name,
        lun: config.iscsi_lun,
    })
}

/// Best-effort removal of a dataset left behind by a failed creation
fn cleanup_partial(provisioner: &Provisioner, identity: &str) {
    match resolve(
        provisioner.engine.as_ref(),
        &provisioner.config.parent_dataset,
        identity,
    ) {
        Ok(Some(dataset)) => {
            warn!("Cleaning up partially created dataset {}", dataset.name);
            if let Err(e) = provisioner.engine.destroy_recursive(&dataset.name) {
                warn!("Cleanup of {} failed: {}", dataset.name, e);
            }
        }
        Ok(None) => {}
        Err(e) => warn!("Cleanup lookup for {} failed: {}", identity, e),
    }
}

fn as_create_error(path: &str, e: Error) -> Error {
    match e {
        Error::Create { .. } | Error::EngineUnavailable(_) => e,
        other => Error::Create {
            dataset: path.to_string(),
            reason: other.to_string(),
        },
    }
}
