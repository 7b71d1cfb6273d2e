//! PersistentVolume conversion
//!
//! Marshals [`VolumeRecord`]s into the `PersistentVolume` objects the
//! orchestrator stores, and back when it asks for a volume to be deleted.

use super::quantity::{parse_quantity, quantity_from_bytes};
use crate::domain::ports::{AccessMode, ExportDescriptor, ReclaimPolicy, VolumeRecord};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{
    ISCSIPersistentVolumeSource, NFSVolumeSource, PersistentVolume, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Resource name of the capacity entry
const STORAGE_RESOURCE: &str = "storage";

impl VolumeRecord {
    /// Build the PersistentVolume describing this record
    pub fn to_persistent_volume(&self) -> PersistentVolume {
        let mut spec = PersistentVolumeSpec {
            access_modes: Some(
                self.access_modes
                    .iter()
                    .map(|mode| mode.as_str().to_string())
                    .collect(),
            ),
            capacity: Some(BTreeMap::from([(
                STORAGE_RESOURCE.to_string(),
                quantity_from_bytes(self.capacity_bytes),
            )])),
            persistent_volume_reclaim_policy: Some(self.reclaim_policy.as_str().to_string()),
            ..Default::default()
        };

        match &self.export {
            ExportDescriptor::Nfs { server, path } => {
                spec.nfs = Some(NFSVolumeSource {
                    server: server.clone(),
                    path: path.clone(),
                    read_only: Some(false),
                });
            }
            ExportDescriptor::Iscsi {
                portal,
                target_name,
                lun,
            } => {
                spec.iscsi = Some(ISCSIPersistentVolumeSource {
                    target_portal: portal.clone(),
                    iqn: target_name.clone(),
                    lun: *lun,
                    read_only: Some(false),
                    ..Default::default()
                });
            }
        }

        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(BTreeMap::new()),
                annotations: Some(self.annotations.clone()),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        }
    }
}

impl TryFrom<&PersistentVolume> for VolumeRecord {
    type Error = Error;

    fn try_from(pv: &PersistentVolume) -> Result<Self> {
        let name = pv
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidArgument("persistent volume has no name".into()))?;
        let spec = pv.spec.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!("persistent volume {} has no spec", name))
        })?;

        let capacity_bytes = match spec
            .capacity
            .as_ref()
            .and_then(|capacity| capacity.get(STORAGE_RESOURCE))
        {
            Some(quantity) => parse_quantity(&quantity.0)?,
            None => 0,
        };

        let access_modes = spec
            .access_modes
            .iter()
            .flatten()
            .map(|mode| {
                AccessMode::parse(mode)
                    .ok_or_else(|| Error::InvalidArgument(format!("unknown access mode: {}", mode)))
            })
            .collect::<Result<Vec<_>>>()?;

        let reclaim_policy = match spec.persistent_volume_reclaim_policy.as_deref() {
            None => ReclaimPolicy::default(),
            Some(policy) => ReclaimPolicy::parse(policy).ok_or_else(|| {
                Error::InvalidArgument(format!("unknown reclaim policy: {}", policy))
            })?,
        };

        let export = if let Some(nfs) = &spec.nfs {
            ExportDescriptor::Nfs {
                server: nfs.server.clone(),
                path: nfs.path.clone(),
            }
        } else if let Some(iscsi) = &spec.iscsi {
            ExportDescriptor::Iscsi {
                portal: iscsi.target_portal.clone(),
                target_name: iscsi.iqn.clone(),
                lun: iscsi.lun,
            }
        } else {
            return Err(Error::InvalidArgument(format!(
                "persistent volume {} is neither NFS nor iSCSI",
                name
            )));
        };

        Ok(VolumeRecord {
            name,
            capacity_bytes,
            access_modes,
            reclaim_policy,
            export,
            annotations: pv.metadata.annotations.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ANN_CREATED_BY, CREATED_BY};
    use assert_matches::assert_matches;

    fn iscsi_record() -> VolumeRecord {
        VolumeRecord {
            name: "pvc-2".into(),
            capacity_bytes: 500_000_000,
            access_modes: vec![AccessMode::ReadWriteOnce],
            reclaim_policy: ReclaimPolicy::Retain,
            export: ExportDescriptor::Iscsi {
                portal: "storage.example.com".into(),
                target_name: "iqn.2020-01.example:pvc-2".into(),
                lun: 1,
            },
            annotations: BTreeMap::from([(ANN_CREATED_BY.to_string(), CREATED_BY.to_string())]),
        }
    }

    #[test]
    fn test_iscsi_persistent_volume() {
        let pv = iscsi_record().to_persistent_volume();
        let spec = pv.spec.as_ref().unwrap();

        assert_eq!(pv.metadata.name.as_deref(), Some("pvc-2"));
        assert_eq!(
            pv.metadata.annotations.as_ref().unwrap()[ANN_CREATED_BY],
            CREATED_BY
        );
        assert_eq!(spec.capacity.as_ref().unwrap()["storage"].0, "500000000");
        assert_eq!(spec.persistent_volume_reclaim_policy.as_deref(), Some("Retain"));

        let iscsi = spec.iscsi.as_ref().unwrap();
        assert_eq!(iscsi.iqn, "iqn.2020-01.example:pvc-2");
        assert_eq!(iscsi.target_portal, "storage.example.com");
        assert_eq!(iscsi.lun, 1);
        assert!(spec.nfs.is_none());

        let back = VolumeRecord::try_from(&pv).unwrap();
        assert_eq!(back, iscsi_record());
    }

    #[test]
    fn test_nfs_from_persistent_volume() {
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pvc-1".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                access_modes: Some(vec!["ReadWriteMany".into()]),
                capacity: Some(BTreeMap::from([(
                    "storage".to_string(),
                    k8s_openapi::apimachinery::pkg::api::resource::Quantity("1G".into()),
                )])),
                nfs: Some(NFSVolumeSource {
                    server: "nas".into(),
                    path: "/tank/volumes/pvc-1".into(),
                    read_only: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = VolumeRecord::try_from(&pv).unwrap();
        assert_eq!(record.capacity_bytes, 1_000_000_000);
        assert_eq!(record.access_modes, vec![AccessMode::ReadWriteMany]);
        assert_eq!(record.reclaim_policy, ReclaimPolicy::Delete);
        assert!(!record.created_here());
        assert_eq!(
            record.export,
            ExportDescriptor::Nfs {
                server: "nas".into(),
                path: "/tank/volumes/pvc-1".into(),
            }
        );
    }

    #[test]
    fn test_unsupported_source_rejected() {
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pvc-3".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec::default()),
            ..Default::default()
        };

        assert_matches!(
            VolumeRecord::try_from(&pv),
            Err(Error::InvalidArgument(_))
        );
    }
}
