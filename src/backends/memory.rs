//! In-memory adapters
//!
//! A dataset tree and an export daemon that live entirely in memory. Used by
//! tests and benchmarks; every external failure mode the engine has to
//! survive can be switched on.

use crate::domain::ports::{DatasetEngine, DatasetKind, ExportDaemon, ManagedDataset};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// In-Memory Engine
// =============================================================================

#[derive(Debug, Default)]
struct EngineState {
    datasets: BTreeMap<String, ManagedDataset>,
    fail_listing: bool,
    fail_create: bool,
    fail_create_partially: bool,
    fail_destroy: bool,
    failing_properties: BTreeSet<String>,
    vanishing: BTreeSet<String>,
}

/// Storage engine holding its dataset tree in a map
#[derive(Debug)]
pub struct InMemoryEngine {
    /// Pre-existing root; never listed, never destroyed
    root: String,
    state: Mutex<EngineState>,
}

impl InMemoryEngine {
    /// Create an engine whose tree starts at an existing `root` dataset
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Make listing fail as if the engine were unreachable
    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().fail_listing = fail;
    }

    /// Make every create call fail without side effects
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Make create calls leave a dataset behind and then fail
    pub fn fail_create_partially(&self, fail: bool) {
        self.state.lock().fail_create_partially = fail;
    }

    /// Make destroy calls fail
    pub fn fail_destroy(&self, fail: bool) {
        self.state.lock().fail_destroy = fail;
    }

    /// Make property reads on `dataset` fail
    pub fn fail_property(&self, dataset: &str) {
        self.state.lock().failing_properties.insert(dataset.to_string());
    }

    /// Make the next property read on `dataset` report it as gone while it
    /// stays listed
    pub fn vanish_on_next_read(&self, dataset: &str) {
        self.state.lock().vanishing.insert(dataset.to_string());
    }

    /// Overwrite a property of an existing dataset
    pub fn set_property(&self, dataset: &str, key: &str, value: &str) {
        if let Some(ds) = self.state.lock().datasets.get_mut(dataset) {
            ds.properties.insert(key.to_string(), value.to_string());
        }
    }

    /// Take a snapshot named `dataset@snapshot`
    pub fn snapshot(&self, name: &str) -> Result<()> {
        let (base, _) = name.split_once('@').ok_or_else(|| {
            Error::InvalidArgument(format!("not a snapshot name: {}", name))
        })?;

        let mut state = self.state.lock();
        if !self.exists(&state, base) {
            return Err(Error::DatasetNotFound {
                dataset: base.to_string(),
            });
        }
        state.datasets.insert(
            name.to_string(),
            ManagedDataset {
                name: name.to_string(),
                kind: DatasetKind::Snapshot,
                mountpoint: None,
                properties: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Remove a dataset subtree behind the provisioner's back
    pub fn destroy_out_of_band(&self, dataset: &str) {
        let mut state = self.state.lock();
        remove_subtree(&mut state.datasets, dataset);
    }

    /// Get a dataset by name
    pub fn dataset(&self, name: &str) -> Option<ManagedDataset> {
        self.state.lock().datasets.get(name).cloned()
    }

    /// Number of datasets below the root, snapshots included
    pub fn dataset_count(&self) -> usize {
        self.state.lock().datasets.len()
    }

    /// Size of a block volume
    pub fn volume_size(&self, name: &str) -> Option<u64> {
        self.dataset(name)?
            .properties
            .get("volsize")
            .and_then(|v| v.parse().ok())
    }

    fn exists(&self, state: &EngineState, name: &str) -> bool {
        name == self.root || state.datasets.contains_key(name)
    }

    fn create(
        &self,
        path: &str,
        kind: DatasetKind,
        mut properties: BTreeMap<String, String>,
    ) -> Result<ManagedDataset> {
        let mut state = self.state.lock();

        if state.fail_create {
            return Err(Error::EngineCommand {
                command: "create".into(),
                reason: format!("cannot create '{}': out of space", path),
            });
        }
        if self.exists(&state, path) {
            return Err(Error::AlreadyExists {
                dataset: path.to_string(),
            });
        }
        let parent = path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
        if !self.exists(&state, parent) {
            return Err(Error::DatasetNotFound {
                dataset: parent.to_string(),
            });
        }

        let mountpoint = match kind {
            DatasetKind::Filesystem => Some(format!("/{}", path)),
            _ => None,
        };
        properties
            .entry("usedbydataset".to_string())
            .or_insert_with(|| "0".to_string());

        let dataset = ManagedDataset {
            name: path.to_string(),
            kind,
            mountpoint,
            properties,
        };

        if state.fail_create_partially {
            let mut partial = dataset;
            partial.properties.clear();
            state.datasets.insert(path.to_string(), partial);
            return Err(Error::EngineCommand {
                command: "create".into(),
                reason: format!("cannot set property for '{}'", path),
            });
        }

        state.datasets.insert(path.to_string(), dataset.clone());
        Ok(dataset)
    }
}

impl DatasetEngine for InMemoryEngine {
    fn children(&self, parent: &str, depth: Option<u32>) -> Result<Vec<ManagedDataset>> {
        let state = self.state.lock();

        if state.fail_listing {
            return Err(Error::Lookup {
                parent: parent.to_string(),
                reason: "connection to storage engine lost".into(),
            });
        }
        if !self.exists(&state, parent) {
            return Err(Error::DatasetNotFound {
                dataset: parent.to_string(),
            });
        }

        Ok(state
            .datasets
            .values()
            .filter(|ds| match relative_depth(parent, &ds.name) {
                Some(d) => depth.map_or(true, |max| d <= max),
                None => false,
            })
            .cloned()
            .collect())
    }

    fn create_filesystem(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<ManagedDataset> {
        let mut props = BTreeMap::new();
        props.insert("refquota".to_string(), "0".to_string());
        props.insert("refreservation".to_string(), "0".to_string());
        props.extend(properties.clone());
        self.create(path, DatasetKind::Filesystem, props)
    }

    fn create_volume(
        &self,
        path: &str,
        size_bytes: u64,
        properties: &BTreeMap<String, String>,
    ) -> Result<ManagedDataset> {
        let mut props = properties.clone();
        props.insert("volsize".to_string(), size_bytes.to_string());
        self.create(path, DatasetKind::Volume, props)
    }

    fn get_property(&self, dataset: &str, key: &str) -> Result<String> {
        let mut state = self.state.lock();

        if state.vanishing.remove(dataset) {
            return Err(Error::DatasetNotFound {
                dataset: dataset.to_string(),
            });
        }

        if state.failing_properties.contains(dataset) {
            return Err(Error::EngineCommand {
                command: "get".into(),
                reason: format!("I/O error reading {}", dataset),
            });
        }
        let ds = state
            .datasets
            .get(dataset)
            .ok_or_else(|| Error::DatasetNotFound {
                dataset: dataset.to_string(),
            })?;
        ds.properties
            .get(key)
            .cloned()
            .ok_or_else(|| Error::EngineCommand {
                command: "get".into(),
                reason: format!("bad property list: invalid property '{}'", key),
            })
    }

    fn destroy_recursive(&self, dataset: &str) -> Result<()> {
        let mut state = self.state.lock();

        if state.fail_destroy {
            return Err(Error::EngineCommand {
                command: "destroy".into(),
                reason: format!("cannot destroy '{}': dataset is busy", dataset),
            });
        }
        if !state.datasets.contains_key(dataset) {
            return Err(Error::DatasetNotFound {
                dataset: dataset.to_string(),
            });
        }

        remove_subtree(&mut state.datasets, dataset);
        Ok(())
    }
}

/// Depth of `name` below `parent`, counting a snapshot as one level below its dataset
fn relative_depth(parent: &str, name: &str) -> Option<u32> {
    let rest = name.strip_prefix(parent)?;
    if let Some(snapshot) = rest.strip_prefix('@') {
        return (!snapshot.is_empty()).then_some(1);
    }
    let rest = rest.strip_prefix('/')?;
    let segments = rest.split('/').count() as u32;
    Some(if rest.contains('@') { segments + 1 } else { segments })
}

fn remove_subtree(datasets: &mut BTreeMap<String, ManagedDataset>, root: &str) {
    datasets.retain(|name, _| {
        name != root
            && !name.starts_with(&format!("{}/", root))
            && !name.starts_with(&format!("{}@", root))
    });
}

// =============================================================================
// Recording Daemon
// =============================================================================

/// Call received by [`RecordingDaemon`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCall {
    Apply(String),
    DeleteTarget(String),
}

/// Export daemon that records every call and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingDaemon {
    calls: Mutex<Vec<DaemonCall>>,
    fail_apply: AtomicBool,
    fail_delete: AtomicBool,
}

impl RecordingDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::Relaxed);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::Relaxed);
    }

    /// Calls received so far, failed ones included
    pub fn calls(&self) -> Vec<DaemonCall> {
        self.calls.lock().clone()
    }
}

impl ExportDaemon for RecordingDaemon {
    fn apply_target_config(&self, identity: &str) -> Result<()> {
        self.calls.lock().push(DaemonCall::Apply(identity.to_string()));
        if self.fail_apply.load(Ordering::Relaxed) {
            return Err(Error::ExportDaemon {
                action: "apply".into(),
                reason: "tgtd is not running".into(),
            });
        }
        Ok(())
    }

    fn delete_target(&self, target_name: &str) -> Result<()> {
        self.calls
            .lock()
            .push(DaemonCall::DeleteTarget(target_name.to_string()));
        if self.fail_delete.load(Ordering::Relaxed) {
            return Err(Error::ExportDaemon {
                action: "delete".into(),
                reason: "tgtd is not running".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_depth() {
        assert_eq!(relative_depth("tank/v", "tank/v/a"), Some(1));
        assert_eq!(relative_depth("tank/v", "tank/v/a/b"), Some(2));
        assert_eq!(relative_depth("tank/v", "tank/v/a@s"), Some(2));
        assert_eq!(relative_depth("tank/v", "tank/v@s"), Some(1));
        assert_eq!(relative_depth("tank/v", "tank/v"), None);
        assert_eq!(relative_depth("tank/v", "tank/vol/a"), None);
    }

    #[test]
    fn test_children_depth() {
        let engine = InMemoryEngine::new("tank/v");
        engine.create_filesystem("tank/v/a", &BTreeMap::new()).unwrap();
        engine.create_filesystem("tank/v/a/b", &BTreeMap::new()).unwrap();
        engine.snapshot("tank/v/a@s").unwrap();

        assert_eq!(engine.children("tank/v", Some(1)).unwrap().len(), 1);
        assert_eq!(engine.children("tank/v", None).unwrap().len(), 3);
    }

    #[test]
    fn test_create_requires_parent() {
        let engine = InMemoryEngine::new("tank/v");
        assert!(matches!(
            engine.create_filesystem("tank/v/a/b", &BTreeMap::new()),
            Err(Error::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn test_destroy_recursive() {
        let engine = InMemoryEngine::new("tank/v");
        engine.create_filesystem("tank/v/a", &BTreeMap::new()).unwrap();
        engine.create_filesystem("tank/v/a/b", &BTreeMap::new()).unwrap();
        engine.create_filesystem("tank/v/ab", &BTreeMap::new()).unwrap();
        engine.snapshot("tank/v/a@s").unwrap();

        engine.destroy_recursive("tank/v/a").unwrap();

        assert_eq!(engine.dataset_count(), 1);
        assert!(engine.dataset("tank/v/ab").is_some());
    }
}
