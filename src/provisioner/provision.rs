//! Provisioning
//!
//! Turns a [`VolumeRequest`] into a dataset with its export and returns the
//! [`VolumeRecord`] the orchestrator binds to a claim.

use super::kind::VolumeKind;
use super::naming::validate_identity;
use super::Provisioner;
use crate::domain::ports::{
    VolumeRecord, VolumeRequest, ANN_CREATED_BY, CREATED_BY, PARAM_SERVER_ADDRESS,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

impl Provisioner {
    /// Provision a volume.
    ///
    /// Invalid requests are rejected before any dataset or config file is
    /// touched. Provisioning the same identity twice fails with
    /// [`Error::AlreadyExists`] from the storage engine.
    pub fn provision(&self, request: VolumeRequest) -> Result<VolumeRecord> {
        validate_identity(&request.name)?;
        if request.capacity_bytes == 0 {
            return Err(Error::InvalidArgument(format!(
                "requested capacity of {} must be greater than zero",
                request.name
            )));
        }
        let kind = VolumeKind::from_request(&request)?;
        let server = self.server_hostname(&request)?;

        info!(
            "Provisioning volume {} ({:?}, {} bytes)",
            request.name, kind, request.capacity_bytes
        );

        let export = kind.provision_dataset(self, &request, &server)?;

        let mut annotations = BTreeMap::new();
        annotations.insert(ANN_CREATED_BY.to_string(), CREATED_BY.to_string());

        let record = VolumeRecord {
            name: request.name,
            capacity_bytes: request.capacity_bytes,
            access_modes: request.access_modes,
            reclaim_policy: request.reclaim_policy,
            export,
            annotations,
        };

        info!("Created volume {}", record.name);
        debug!("Returning record: {:?}", record);

        Ok(record)
    }

    /// Export endpoint for a request: `serverAddress` parameter or this host
    fn server_hostname(&self, request: &VolumeRequest) -> Result<String> {
        match request.parameter(PARAM_SERVER_ADDRESS) {
            Some(address) if !address.is_empty() => Ok(address.to_string()),
            _ => self.local_hostname(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backends::memory::DaemonCall;
    use crate::domain::ports::{
        AccessMode, DatasetKind, ExportDescriptor, ReclaimPolicy, VolumeRequest,
        PROP_REFQUOTA, PROP_REFRESERVATION, PROP_SHARENFS,
    };
    use crate::error::Error;
    use crate::provisioner::tests::test_provisioner;
    use assert_matches::assert_matches;
    use std::fs;

    fn request(name: &str, capacity: u64, params: &[(&str, &str)]) -> VolumeRequest {
        VolumeRequest {
            name: name.into(),
            capacity_bytes: capacity,
            access_modes: vec![AccessMode::ReadWriteOnce, AccessMode::ReadOnlyMany],
            reclaim_policy: ReclaimPolicy::Delete,
            parameters: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn config_files(dir: &std::path::Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_provision_nfs() {
        let (provisioner, _engine, daemon, _tmp) = test_provisioner();

        let record = provisioner
            .provision(request("pvc-1", 1_000_000_000, &[("kind", "nfs")]))
            .unwrap();

        let dataset = provisioner.resolve("pvc-1").unwrap().unwrap();
        assert_eq!(dataset.name, "tank/volumes/pvc-1");
        assert_eq!(dataset.kind, DatasetKind::Filesystem);
        assert_eq!(dataset.properties[PROP_REFQUOTA], "1000000000");
        assert_eq!(dataset.properties[PROP_REFRESERVATION], "1000000000");
        assert_eq!(dataset.properties[PROP_SHARENFS], "rw=@10.0.0.0/8");

        assert_eq!(
            record.export,
            ExportDescriptor::Nfs {
                server: "storage.example.com".into(),
                path: dataset.mountpoint.clone().unwrap(),
            }
        );
        assert_eq!(record.capacity_bytes, 1_000_000_000);
        assert_eq!(
            record.access_modes,
            vec![AccessMode::ReadWriteOnce, AccessMode::ReadOnlyMany]
        );
        assert_eq!(record.reclaim_policy, ReclaimPolicy::Delete);
        assert!(record.created_here());

        // NFS volumes never touch the export daemon
        assert!(daemon.calls().is_empty());
    }

    #[test]
    fn test_provision_nfs_parameters() {
        let (provisioner, _engine, _daemon, _tmp) = test_provisioner();

        let record = provisioner
            .provision(request(
                "pvc-opts",
                5_000,
                &[("serverAddress", "10.1.2.3"), ("shareOptions", "ro=@192.168.0.0/16")],
            ))
            .unwrap();

        let dataset = provisioner.resolve("pvc-opts").unwrap().unwrap();
        assert_eq!(dataset.properties[PROP_SHARENFS], "ro=@192.168.0.0/16");
        assert_matches!(record.export, ExportDescriptor::Nfs { server, .. } if server == "10.1.2.3");
    }

    #[test]
    fn test_provision_iscsi() {
        let (provisioner, engine, daemon, tmp) = test_provisioner();

        let record = provisioner
            .provision(request(
                "pvc-2",
                500_000_000,
                &[("kind", "iscsi"), ("IQN", "iqn.2020-01.example")],
            ))
            .unwrap();

        let conf = fs::read_to_string(tmp.path().join("pvc-2.conf")).unwrap();
        assert!(conf.contains("<target iqn.2020-01.example:pvc-2>"));
        assert!(conf.contains("backing-store /dev/zvol/tank/volumes/pvc-2"));

        let dataset = provisioner.resolve("pvc-2").unwrap().unwrap();
        assert_eq!(dataset.kind, DatasetKind::Volume);
        assert_eq!(engine.volume_size("tank/volumes/pvc-2"), Some(500_000_000));
        assert!(!dataset.properties.contains_key(PROP_REFQUOTA));

        assert_eq!(
            record.export,
            ExportDescriptor::Iscsi {
                portal: "storage.example.com".into(),
                target_name: "iqn.2020-01.example:pvc-2".into(),
                lun: 1,
            }
        );
        assert_eq!(daemon.calls(), vec![DaemonCall::Apply("pvc-2".into())]);
    }

    #[test]
    fn test_provision_iscsi_reload_failure_is_not_fatal() {
        let (provisioner, _engine, daemon, tmp) = test_provisioner();
        daemon.fail_apply(true);

        let record = provisioner
            .provision(request(
                "pvc-3",
                1024,
                &[("kind", "iscsi"), ("IQN", "iqn.2020-01.example")],
            ))
            .unwrap();

        assert!(record.export.is_block());
        assert!(tmp.path().join("pvc-3.conf").exists());
        assert!(provisioner.resolve("pvc-3").unwrap().is_some());
    }

    #[test]
    fn test_provision_unknown_kind_has_no_side_effects() {
        let (provisioner, engine, daemon, tmp) = test_provisioner();

        let result = provisioner.provision(request("pvc-4", 1024, &[("kind", "ceph")]));

        assert_matches!(result, Err(Error::InvalidArgument(_)));
        assert!(provisioner.resolve("pvc-4").unwrap().is_none());
        assert_eq!(engine.dataset_count(), 0);
        assert_eq!(config_files(tmp.path()), 0);
        assert!(daemon.calls().is_empty());
    }

    #[test]
    fn test_provision_iscsi_without_iqn_has_no_side_effects() {
        let (provisioner, engine, _daemon, tmp) = test_provisioner();

        let result = provisioner.provision(request("pvc-5", 1024, &[("kind", "iscsi")]));

        assert_matches!(result, Err(Error::InvalidArgument(_)));
        assert_eq!(engine.dataset_count(), 0);
        assert_eq!(config_files(tmp.path()), 0);
    }

    #[test]
    fn test_provision_rejects_zero_capacity_and_bad_names() {
        let (provisioner, engine, _daemon, _tmp) = test_provisioner();

        assert_matches!(
            provisioner.provision(request("pvc-6", 0, &[])),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            provisioner.provision(request("../etc", 1024, &[])),
            Err(Error::InvalidArgument(_))
        );
        assert_eq!(engine.dataset_count(), 0);
    }

    #[test]
    fn test_provision_twice_already_exists() {
        let (provisioner, _engine, _daemon, _tmp) = test_provisioner();

        provisioner.provision(request("pvc-7", 1024, &[])).unwrap();
        let second = provisioner.provision(request("pvc-7", 1024, &[]));

        assert_matches!(second, Err(Error::AlreadyExists { .. }));
        // The first volume is untouched
        assert!(provisioner.resolve("pvc-7").unwrap().is_some());
    }

    #[test]
    fn test_provision_iscsi_twice_keeps_config() {
        let (provisioner, _engine, _daemon, tmp) = test_provisioner();
        let params = [("kind", "iscsi"), ("IQN", "iqn.2020-01.example")];

        provisioner.provision(request("pvc-8", 1024, &params)).unwrap();
        let second = provisioner.provision(request("pvc-8", 1024, &params));

        assert_matches!(second, Err(Error::AlreadyExists { .. }));
        assert!(tmp.path().join("pvc-8.conf").exists());
    }

    #[test]
    fn test_provision_partial_filesystem_is_cleaned_up() {
        let (provisioner, engine, _daemon, _tmp) = test_provisioner();
        engine.fail_create_partially(true);

        let result = provisioner.provision(request("pvc-9", 1024, &[]));

        assert_matches!(result, Err(Error::Create { .. }));
        assert!(provisioner.resolve("pvc-9").unwrap().is_none());
    }

    #[test]
    fn test_provision_block_failure_removes_config() {
        let (provisioner, engine, daemon, tmp) = test_provisioner();
        engine.fail_create(true);

        let result = provisioner.provision(request(
            "pvc-10",
            1024,
            &[("kind", "iscsi"), ("IQN", "iqn.2020-01.example")],
        ));

        assert_matches!(result, Err(Error::Create { .. }));
        assert!(!tmp.path().join("pvc-10.conf").exists());
        assert!(daemon.calls().is_empty());
    }
}
