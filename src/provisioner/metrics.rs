//! Volume Metrics
//!
//! Prometheus collector reporting capacity and usage of every filesystem
//! dataset under the parent. Collection happens on scrape; one unreadable
//! dataset never hides the others.

use crate::domain::ports::{
    DatasetEngineRef, DatasetKind, MetricSample, PROP_REFQUOTA, PROP_USEDBYDATASET,
};
use crate::error::{Error, Result};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tracing::{debug, error};

const CAPACITY_METRIC: &str = "zfs_provisioner_persistent_volume_capacity";
const USED_METRIC: &str = "zfs_provisioner_persistent_volume_used";
const VOLUME_LABEL: &str = "persistent_volume";

/// Gauge collector over the managed dataset tree
pub struct VolumeMetricsCollector {
    parent: String,
    engine: DatasetEngineRef,
    capacity_opts: Opts,
    used_opts: Opts,
    /// Templates that own the descriptors handed out by `desc()`
    capacity: GaugeVec,
    used: GaugeVec,
}

impl VolumeMetricsCollector {
    /// Create a collector for datasets under `parent` served from `hostname`
    pub fn new(parent: &str, hostname: &str, engine: DatasetEngineRef) -> Result<Self> {
        let capacity_opts = Opts::new(CAPACITY_METRIC, "Capacity of a zfs persistent volume.")
            .const_label("parent", parent)
            .const_label("hostname", hostname);
        let used_opts = Opts::new(USED_METRIC, "Usage of a zfs persistent volume.")
            .const_label("parent", parent)
            .const_label("hostname", hostname);

        Ok(Self {
            parent: parent.to_string(),
            engine,
            capacity: GaugeVec::new(capacity_opts.clone(), &[VOLUME_LABEL])?,
            used: GaugeVec::new(used_opts.clone(), &[VOLUME_LABEL])?,
            capacity_opts,
            used_opts,
        })
    }

    /// Read capacity and usage of every filesystem under the parent
    pub fn collect_samples(&self) -> Vec<MetricSample> {
        let datasets = match self.engine.children(&self.parent, None) {
            Ok(datasets) => datasets,
            Err(e) => {
                error!("Collecting metrics failed: {}", e);
                return Vec::new();
            }
        };

        datasets
            .into_iter()
            // Snapshots and block volumes have no quota semantics
            .filter(|dataset| dataset.kind == DatasetKind::Filesystem)
            .filter_map(|dataset| match self.sample(&dataset.name) {
                Ok(sample) => Some(sample),
                Err(e) if e.is_not_found() => {
                    debug!("Dataset {} disappeared during collection", dataset.name);
                    None
                }
                Err(e) => {
                    error!("Collecting metrics for {} failed: {}", dataset.name, e);
                    None
                }
            })
            .collect()
    }

    fn sample(&self, dataset: &str) -> Result<MetricSample> {
        Ok(MetricSample {
            dataset: dataset.to_string(),
            capacity_bytes: self.read_bytes(dataset, PROP_REFQUOTA)?,
            used_bytes: self.read_bytes(dataset, PROP_USEDBYDATASET)?,
        })
    }

    fn read_bytes(&self, dataset: &str, property: &str) -> Result<u64> {
        let value = self.engine.get_property(dataset, property)?;
        value.trim().parse().map_err(|_| Error::MetricParse {
            dataset: dataset.to_string(),
            property: property.to_string(),
            value,
        })
    }

    fn gauges(&self) -> Result<(GaugeVec, GaugeVec)> {
        Ok((
            GaugeVec::new(self.capacity_opts.clone(), &[VOLUME_LABEL])?,
            GaugeVec::new(self.used_opts.clone(), &[VOLUME_LABEL])?,
        ))
    }
}

impl Collector for VolumeMetricsCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.capacity.desc();
        descs.extend(self.used.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        // Fresh gauges per pass so concurrent scrapes never share state
        let (capacity, used) = match self.gauges() {
            Ok(gauges) => gauges,
            Err(e) => {
                error!("Creating volume gauges failed: {}", e);
                return Vec::new();
            }
        };

        for sample in self.collect_samples() {
            capacity
                .with_label_values(&[sample.dataset.as_str()])
                .set(sample.capacity_bytes as f64);
            used.with_label_values(&[sample.dataset.as_str()])
                .set(sample.used_bytes as f64);
        }

        let mut families = capacity.collect();
        families.extend(used.collect());
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryEngine;
    use crate::domain::ports::DatasetEngine;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const PARENT: &str = "tank/volumes";

    fn filesystem(engine: &InMemoryEngine, name: &str, quota: u64, used: u64) {
        let mut props = BTreeMap::new();
        props.insert(PROP_REFQUOTA.to_string(), quota.to_string());
        engine.create_filesystem(name, &props).unwrap();
        engine.set_property(name, PROP_USEDBYDATASET, &used.to_string());
    }

    fn collector(engine: Arc<InMemoryEngine>) -> VolumeMetricsCollector {
        VolumeMetricsCollector::new(PARENT, "storage.example.com", engine).unwrap()
    }

    #[test]
    fn test_samples_only_for_filesystems() {
        let engine = Arc::new(InMemoryEngine::new(PARENT));
        filesystem(&engine, "tank/volumes/pvc-1", 1000, 10);
        filesystem(&engine, "tank/volumes/pvc-2", 2000, 20);
        filesystem(&engine, "tank/volumes/pvc-2/nested", 3000, 30);
        engine.snapshot("tank/volumes/pvc-1@daily").unwrap();
        engine
            .create_volume("tank/volumes/pvc-3", 4096, &BTreeMap::new())
            .unwrap();

        let samples = collector(engine).collect_samples();

        let names: Vec<_> = samples.iter().map(|s| s.dataset.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "tank/volumes/pvc-1",
                "tank/volumes/pvc-2",
                "tank/volumes/pvc-2/nested"
            ]
        );
        assert_eq!(
            samples[0],
            MetricSample {
                dataset: "tank/volumes/pvc-1".into(),
                capacity_bytes: 1000,
                used_bytes: 10,
            }
        );
    }

    #[test]
    fn test_bad_dataset_does_not_abort_collection() {
        let engine = Arc::new(InMemoryEngine::new(PARENT));
        filesystem(&engine, "tank/volumes/pvc-1", 1000, 10);
        filesystem(&engine, "tank/volumes/pvc-2", 2000, 20);
        filesystem(&engine, "tank/volumes/pvc-3", 3000, 30);
        engine.set_property("tank/volumes/pvc-2", PROP_USEDBYDATASET, "lots");
        engine.fail_property("tank/volumes/pvc-3");

        let samples = collector(engine).collect_samples();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].dataset, "tank/volumes/pvc-1");
    }

    #[test]
    fn test_vanished_dataset_is_skipped() {
        let engine = Arc::new(InMemoryEngine::new(PARENT));
        filesystem(&engine, "tank/volumes/pvc-1", 1000, 10);
        filesystem(&engine, "tank/volumes/pvc-2", 2000, 20);
        filesystem(&engine, "tank/volumes/pvc-3", 3000, 30);
        engine.vanish_on_next_read("tank/volumes/pvc-2");

        let collector = collector(engine.clone());
        let samples = collector.collect_samples();

        let names: Vec<_> = samples.iter().map(|s| s.dataset.as_str()).collect();
        assert_eq!(names, vec!["tank/volumes/pvc-1", "tank/volumes/pvc-3"]);
        assert!(engine.dataset("tank/volumes/pvc-2").is_some());

        // Reported again once it reads back
        assert_eq!(collector.collect_samples().len(), 3);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let engine = Arc::new(InMemoryEngine::new(PARENT));
        filesystem(&engine, "tank/volumes/pvc-1", 1000, 10);
        engine.set_property("tank/volumes/pvc-1", PROP_REFQUOTA, "none");

        let collector = collector(engine);
        assert!(matches!(
            collector.sample("tank/volumes/pvc-1"),
            Err(Error::MetricParse { .. })
        ));
    }

    #[test]
    fn test_listing_failure_yields_empty_pass() {
        let engine = Arc::new(InMemoryEngine::new(PARENT));
        filesystem(&engine, "tank/volumes/pvc-1", 1000, 10);
        engine.fail_listing(true);

        assert!(collector(engine).collect_samples().is_empty());
    }

    #[test]
    fn test_collector_families() {
        let engine = Arc::new(InMemoryEngine::new(PARENT));
        filesystem(&engine, "tank/volumes/pvc-1", 1000, 10);
        filesystem(&engine, "tank/volumes/pvc-2", 2000, 20);
        engine.snapshot("tank/volumes/pvc-2@daily").unwrap();

        let collector = collector(engine);
        assert_eq!(collector.desc().len(), 2);

        let families = collector.collect();
        assert_eq!(families.len(), 2);

        let capacity = families
            .iter()
            .find(|f| f.get_name() == CAPACITY_METRIC)
            .unwrap();
        assert_eq!(capacity.get_metric().len(), 2);

        let used = families.iter().find(|f| f.get_name() == USED_METRIC).unwrap();
        let pvc2 = used
            .get_metric()
            .iter()
            .find(|m| {
                m.get_label()
                    .iter()
                    .any(|l| l.get_name() == VOLUME_LABEL && l.get_value() == "tank/volumes/pvc-2")
            })
            .unwrap();
        assert_eq!(pvc2.get_gauge().get_value(), 20.0);
    }

    #[test]
    fn test_collector_registers() {
        let engine = Arc::new(InMemoryEngine::new(PARENT));
        filesystem(&engine, "tank/volumes/pvc-1", 1000, 10);

        let registry = prometheus::Registry::new();
        registry.register(Box::new(collector(engine))).unwrap();

        let families = registry.gather();
        assert_eq!(families.len(), 2);
    }
}
