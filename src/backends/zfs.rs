//! ZFS Storage Engine Adapter
//!
//! Drives datasets through the `zfs` command-line tool. Every call blocks
//! until the command exits.

use crate::domain::ports::{DatasetEngine, DatasetKind, ManagedDataset};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::process::Command;
use tracing::debug;

/// Columns requested from `zfs list`
const LIST_COLUMNS: &str = "name,type,mountpoint";

/// [`DatasetEngine`] backed by the `zfs` binary
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary: String,
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ZfsCli {
    /// Use `zfs` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("zfs")
    }

    /// Use a specific `zfs` binary
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a zfs subcommand acting on `dataset`, returning stdout
    fn run(&self, args: &[String], dataset: &str) -> Result<String> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            Error::EngineUnavailable(format!("failed to run {}: {}", self.binary, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let subcommand = args.first().map(String::as_str).unwrap_or_default();
            return Err(classify_failure(subcommand, dataset, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Describe a single dataset
    fn describe(&self, path: &str) -> Result<ManagedDataset> {
        let args = strings(&["list", "-H", "-p", "-o", LIST_COLUMNS, path]);
        let output = self.run(&args, path)?;

        parse_list_output(&output)
            .into_iter()
            .next()
            .ok_or_else(|| Error::DatasetNotFound {
                dataset: path.to_string(),
            })
    }

    fn create(&self, mut args: Vec<String>, path: &str) -> Result<ManagedDataset> {
        args.push(path.to_string());
        self.run(&args, path)?;
        self.describe(path)
    }
}

impl DatasetEngine for ZfsCli {
    fn children(&self, parent: &str, depth: Option<u32>) -> Result<Vec<ManagedDataset>> {
        let mut args = strings(&["list", "-H", "-p", "-r", "-t", "all", "-o", LIST_COLUMNS]);
        if let Some(depth) = depth {
            args.push("-d".into());
            args.push(depth.to_string());
        }
        args.push(parent.to_string());

        let output = self.run(&args, parent)?;

        Ok(parse_list_output(&output)
            .into_iter()
            .filter(|ds| ds.name != parent)
            .collect())
    }

    fn create_filesystem(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<ManagedDataset> {
        let mut args = vec!["create".to_string()];
        args.extend(property_args(properties));
        self.create(args, path)
    }

    fn create_volume(
        &self,
        path: &str,
        size_bytes: u64,
        properties: &BTreeMap<String, String>,
    ) -> Result<ManagedDataset> {
        let mut args = strings(&["create", "-V"]);
        args.push(size_bytes.to_string());
        args.extend(property_args(properties));
        self.create(args, path)
    }

    fn get_property(&self, dataset: &str, key: &str) -> Result<String> {
        let args = strings(&["get", "-H", "-p", "-o", "value", key, dataset]);
        let output = self.run(&args, dataset)?;
        Ok(output.trim().to_string())
    }

    fn destroy_recursive(&self, dataset: &str) -> Result<()> {
        let args = strings(&["destroy", "-r", dataset]);
        self.run(&args, dataset).map(|_| ())
    }
}

// =============================================================================
// Output Parsing
// =============================================================================

/// Parse tab-separated `zfs list -H -o name,type,mountpoint` output.
/// Rows of unknown types (bookmarks) are skipped.
pub fn parse_list_output(output: &str) -> Vec<ManagedDataset> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                return None;
            }
            let mut cols = line.split('\t');
            let name = cols.next()?;
            let kind = DatasetKind::parse(cols.next()?)?;
            let mountpoint = match cols.next() {
                Some(mp) if mp.starts_with('/') && kind == DatasetKind::Filesystem => {
                    Some(mp.to_string())
                }
                _ => None,
            };

            Some(ManagedDataset {
                name: name.to_string(),
                kind,
                mountpoint,
                properties: BTreeMap::new(),
            })
        })
        .collect()
}

/// Map a failed zfs invocation to an error variant
fn classify_failure(subcommand: &str, dataset: &str, stderr: &str) -> Error {
    if stderr.contains("dataset already exists") {
        return Error::AlreadyExists {
            dataset: dataset.to_string(),
        };
    }
    if stderr.contains("dataset does not exist") {
        return Error::DatasetNotFound {
            dataset: dataset.to_string(),
        };
    }
    match subcommand {
        "create" => Error::Create {
            dataset: dataset.to_string(),
            reason: stderr.to_string(),
        },
        "destroy" => Error::Destroy {
            dataset: dataset.to_string(),
            reason: stderr.to_string(),
        },
        "list" => Error::Lookup {
            parent: dataset.to_string(),
            reason: stderr.to_string(),
        },
        _ => Error::EngineCommand {
            command: format!("zfs {}", subcommand),
            reason: stderr.to_string(),
        },
    }
}

fn property_args(properties: &BTreeMap<String, String>) -> Vec<String> {
    properties
        .iter()
        .flat_map(|(key, value)| ["-o".to_string(), format!("{}={}", key, value)])
        .collect()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
