//! Kubernetes marshaling
//!
//! Conversions between the provisioner's records and the orchestrator's
//! PersistentVolume objects:
//! - `persistent_volume`: `VolumeRecord` <-> `PersistentVolume`
//! - `quantity`: resource quantity strings <-> byte counts

pub mod persistent_volume;
pub mod quantity;

pub use quantity::{parse_quantity, quantity_from_bytes};
