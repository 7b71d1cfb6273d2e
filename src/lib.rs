//! ZFS Volume Provisioner
//!
//! Provisions persistent volumes for a container orchestrator out of a ZFS
//! dataset tree. Volumes are exported over NFS (filesystem datasets) or
//! iSCSI (block volumes served by tgt), and the usage of every filesystem
//! volume is published as Prometheus gauges.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       REST API (axum)                                │
//! │        POST /v1/volumes          DELETE /v1/volumes/:name            │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┴──────────────────────────────────────┐
//! │                          Provisioner                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐    │
//! │  │  Provision   │  │    Delete    │  │  Volume Metrics          │    │
//! │  │  (per kind)  │  │              │  │  Collector               │    │
//! │  └──────┬───────┘  └──────┬───────┘  └────────────┬─────────────┘    │
//! │         └─────────────────┼───────────────────────┘                  │
//! ├───────────────────────────┴──────────────────────────────────────────┤
//! │   DatasetEngine (zfs CLI)            ExportDaemon (tgt-admin)        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`]: REST surface and server
//! - [`provisioner`]: volume lifecycle and metrics collection
//! - [`backends`]: storage engine and export daemon adapters
//! - [`k8s`]: PersistentVolume and quantity marshaling
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod api;
pub mod backends;
pub mod domain;
pub mod error;
pub mod k8s;
pub mod provisioner;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use backends::{InMemoryEngine, RecordingDaemon, TgtAdmin, ZfsCli};

pub use domain::ports::{
    AccessMode, DatasetEngine, DatasetEngineRef, DatasetKind, ExportDaemon, ExportDaemonRef,
    ExportDescriptor, ManagedDataset, MetricSample, ReclaimPolicy, VolumeRecord, VolumeRequest,
};

pub use error::{Error, ErrorAction, Result};

pub use provisioner::{Provisioner, ProvisionerConfig, VolumeKind, VolumeMetricsCollector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
