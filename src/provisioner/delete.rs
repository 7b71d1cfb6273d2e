//! Deprovisioning
//!
//! Reverses [`Provisioner::provision`]: drops the export, then destroys the
//! dataset and everything below it. Safe to call again for a volume that is
//! already gone.

use super::kind::VolumeKind;
use super::naming::validate_identity;
use super::Provisioner;
use crate::domain::ports::VolumeRecord;
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

impl Provisioner {
    /// Delete a provisioned volume.
    ///
    /// Export teardown failures are logged and do not stop the dataset from
    /// being destroyed. A missing dataset counts as success; a failed
    /// destroy is returned as [`Error::Destroy`].
    pub fn delete(&self, record: &VolumeRecord) -> Result<()> {
        validate_identity(&record.name)?;

        if !record.created_here() {
            debug!("Volume {} carries no creation marker", record.name);
        }

        VolumeKind::of_export(&record.export).deprovision_export(self, record);

        let Some(dataset) = self.resolve(&record.name)? else {
            warn!("Volume {} not found, so nothing to delete", record.name);
            return Ok(());
        };

        match self.engine.destroy_recursive(&dataset.name) {
            Ok(()) => {}
            // Removed by someone else in the meantime
            Err(Error::DatasetNotFound { .. }) => {
                warn!("Dataset {} vanished before destroy", dataset.name);
            }
            Err(e @ Error::Destroy { .. }) => return Err(e),
            Err(e) => {
                return Err(Error::Destroy {
                    dataset: dataset.name,
                    reason: e.to_string(),
                })
            }
        }

        info!("Deleted volume {}", record.name);
        Ok(())
    }
}
