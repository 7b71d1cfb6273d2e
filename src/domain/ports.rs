//! Domain Ports - Core types and trait definitions for the provisioner
//!
//! These traits define the boundaries between the volume lifecycle engine and
//! the two external subsystems it drives: the storage engine that owns the
//! dataset tree, and the export daemon that serves block targets.
//! Adapters in [`crate::backends`] implement them.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Well-known Names
// =============================================================================

/// Annotation marking which provisioner created a volume
pub const ANN_CREATED_BY: &str = "kubernetes.io/createdby";
/// Value of [`ANN_CREATED_BY`] for volumes created here
pub const CREATED_BY: &str = "zfs-provisioner";

/// Request parameter overriding the advertised export endpoint
pub const PARAM_SERVER_ADDRESS: &str = "serverAddress";
/// Request parameter selecting the volume kind
pub const PARAM_KIND: &str = "kind";
/// Request parameter carrying the NFS export ACL
pub const PARAM_SHARE_OPTIONS: &str = "shareOptions";
/// Request parameter carrying the iSCSI target prefix
pub const PARAM_IQN: &str = "IQN";

/// Dataset property holding the NFS export ACL
pub const PROP_SHARENFS: &str = "sharenfs";
/// Dataset property capping the space a filesystem may reference
pub const PROP_REFQUOTA: &str = "refquota";
/// Dataset property guaranteeing the space a filesystem may reference
pub const PROP_REFRESERVATION: &str = "refreservation";
/// Dataset property reporting the space used by the dataset itself
pub const PROP_USEDBYDATASET: &str = "usedbydataset";

// =============================================================================
// Datasets
// =============================================================================

/// Kind of node in the storage engine's dataset tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Filesystem,
    Volume,
    Snapshot,
}

impl DatasetKind {
    /// Parse the type column reported by the storage engine
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filesystem" => Some(DatasetKind::Filesystem),
            "volume" => Some(DatasetKind::Volume),
            "snapshot" => Some(DatasetKind::Snapshot),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetKind::Filesystem => write!(f, "filesystem"),
            DatasetKind::Volume => write!(f, "volume"),
            DatasetKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// A node in the storage engine's dataset tree.
///
/// Only ever held for the duration of a single operation; the storage engine
/// stays the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDataset {
    /// Full hierarchical name (e.g. `tank/volumes/pvc-1`)
    pub name: String,
    /// Dataset kind
    pub kind: DatasetKind,
    /// Mountpoint, filesystems only
    pub mountpoint: Option<String>,
    /// Properties read alongside the dataset
    pub properties: BTreeMap<String, String>,
}

// =============================================================================
// Volume Request / Record
// =============================================================================

/// Volume access modes, passed through unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ReadWriteOnce" => Some(AccessMode::ReadWriteOnce),
            "ReadOnlyMany" => Some(AccessMode::ReadOnlyMany),
            "ReadWriteMany" => Some(AccessMode::ReadWriteMany),
            "ReadWriteOncePod" => Some(AccessMode::ReadWriteOncePod),
            _ => None,
        }
    }
}

/// What happens to a volume after its claim is released, passed through unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
    Recycle,
}

impl ReclaimPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimPolicy::Delete => "Delete",
            ReclaimPolicy::Retain => "Retain",
            ReclaimPolicy::Recycle => "Recycle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Delete" => Some(ReclaimPolicy::Delete),
            "Retain" => Some(ReclaimPolicy::Retain),
            "Recycle" => Some(ReclaimPolicy::Recycle),
            _ => None,
        }
    }
}

/// Intent to provision a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    /// Volume identity; becomes the last segment of the dataset path
    pub name: String,
    /// Requested capacity in bytes, must be > 0
    pub capacity_bytes: u64,
    /// Requested access modes
    pub access_modes: Vec<AccessMode>,
    /// Reclaim policy
    pub reclaim_policy: ReclaimPolicy,
    /// Storage class parameters (`serverAddress`, `kind`, `shareOptions`, `IQN`)
    pub parameters: BTreeMap<String, String>,
}

impl VolumeRequest {
    /// Look up a request parameter
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// How a provisioned volume is reached over the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExportDescriptor {
    /// NFS share of a filesystem dataset
    Nfs { server: String, path: String },
    /// iSCSI target backed by a block dataset
    Iscsi {
        portal: String,
        #[serde(rename = "targetName")]
        target_name: String,
        lun: i32,
    },
}

impl ExportDescriptor {
    pub fn is_block(&self) -> bool {
        matches!(self, ExportDescriptor::Iscsi { .. })
    }
}

/// Result of provisioning; owned by the orchestrator once returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    /// Volume identity
    pub name: String,
    /// Capacity in bytes, verbatim from the request
    pub capacity_bytes: u64,
    pub access_modes: Vec<AccessMode>,
    pub reclaim_policy: ReclaimPolicy,
    pub export: ExportDescriptor,
    /// Annotations, including the creation-source marker
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl VolumeRecord {
    /// Whether this provisioner created the volume
    pub fn created_here(&self) -> bool {
        self.annotations.get(ANN_CREATED_BY).map(String::as_str) == Some(CREATED_BY)
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Capacity and usage of one filesystem dataset at collection time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub dataset: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

// =============================================================================
// Storage Engine Port
// =============================================================================

/// Port for dataset operations on the storage engine.
///
/// Calls are blocking and carry no internal timeout.
pub trait DatasetEngine: Send + Sync {
    /// List descendants of `parent`, excluding `parent` itself.
    /// `depth` of `Some(1)` yields immediate children; `None` walks the whole subtree.
    fn children(&self, parent: &str, depth: Option<u32>) -> Result<Vec<ManagedDataset>>;

    /// Create a filesystem with all `properties` applied in the same call
    fn create_filesystem(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<ManagedDataset>;

    /// Create a raw block volume of `size_bytes`
    fn create_volume(
        &self,
        path: &str,
        size_bytes: u64,
        properties: &BTreeMap<String, String>,
    ) -> Result<ManagedDataset>;

    /// Read a single property as its raw (parsable) string value
    fn get_property(&self, dataset: &str, key: &str) -> Result<String>;

    /// Destroy a dataset and all of its descendants
    fn destroy_recursive(&self, dataset: &str) -> Result<()>;
}

// =============================================================================
// Export Daemon Port
// =============================================================================

/// Port for the block export daemon
pub trait ExportDaemon: Send + Sync {
    /// Reread the target configuration directory and activate what changed
    fn apply_target_config(&self, identity: &str) -> Result<()>;

    /// Remove a live target
    fn delete_target(&self, target_name: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DatasetEngineRef = Arc<dyn DatasetEngine>;
pub type ExportDaemonRef = Arc<dyn ExportDaemon>;
