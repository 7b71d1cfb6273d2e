//! Dataset naming and lookup
//!
//! Maps a volume identity to its dataset path under the parent, and resolves
//! an identity back to the live dataset.

use crate::domain::ports::{DatasetEngine, DatasetKind, ManagedDataset};
use crate::error::{Error, Result};
use tracing::debug;

/// Dataset path for a volume identity
pub fn dataset_path(parent: &str, identity: &str) -> String {
    format!("{}/{}", parent, identity)
}

/// Reject identities that are not a single dataset path segment
pub fn validate_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(Error::InvalidArgument("volume name must not be empty".into()));
    }
    if identity == "." || identity == ".." {
        return Err(Error::InvalidArgument(format!(
            "invalid volume name: {}",
            identity
        )));
    }
    if let Some(c) = identity
        .chars()
        .find(|c| matches!(c, '/' | '@' | '#' | '\0') || c.is_whitespace())
    {
        return Err(Error::InvalidArgument(format!(
            "volume name {:?} contains forbidden character {:?}",
            identity, c
        )));
    }
    Ok(())
}

/// Find the dataset backing `identity` among the immediate children of `parent`.
///
/// Returns `Ok(None)` when no child matches, so deleting an absent volume
/// stays idempotent. A failure to enumerate is a [`Error::Lookup`].
pub fn resolve(
    engine: &dyn DatasetEngine,
    parent: &str,
    identity: &str,
) -> Result<Option<ManagedDataset>> {
    let children = engine.children(parent, Some(1)).map_err(|e| match e {
        Error::Lookup { .. } => e,
        other => Error::Lookup {
            parent: parent.to_string(),
            reason: other.to_string(),
        },
    })?;

    let expected = dataset_path(parent, identity);
    let found = children
        .into_iter()
        .find(|child| child.kind != DatasetKind::Snapshot && child.name == expected);

    debug!(
        "Resolved {} under {}: {}",
        identity,
        parent,
        found.as_ref().map(|d| d.name.as_str()).unwrap_or("<none>")
    );

    Ok(found)
}
