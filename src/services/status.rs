use crate::models::{ExperimentalUnit, SidecarPaths, SidecarRules, UnitSelection, UnitStatus};
use crate::services::batch::BatchLoader;
use crate::services::document::DocumentError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;

/// A sidecar file that existed but could not be deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub path: Utf8PathBuf,
    pub message: String,
}

/// Outcome of deleting every sidecar file of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Number of files actually removed (0, 1 or 2 per unit)
    pub deleted: usize,
    pub failures: Vec<DeletionFailure>,
}

/// Tracks completion of experimental units from the sidecar files they leave behind.
///
/// Completion is never stored: every query re-reads the batch descriptor and
/// checks the filesystem, so a unit whose producer is still writing may read
/// as unfinished and turn finished on a later query.
#[derive(Debug, Clone, Default)]
pub struct UnitStatusTracker {
    rules: SidecarRules,
}

impl UnitStatusTracker {
    pub fn new(rules: SidecarRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &SidecarRules {
        &self.rules
    }

    pub fn sidecar_paths(&self, unit_path: &Utf8Path) -> SidecarPaths {
        SidecarPaths::derive(unit_path, &self.rules)
    }

    /// Finished iff both sidecar files exist right now.
    pub fn classify(&self, unit_path: &Utf8Path) -> UnitStatus {
        let sidecars = self.sidecar_paths(unit_path);
        if sidecars.descriptor.exists() && sidecars.binary.exists() {
            UnitStatus::Finished
        } else {
            UnitStatus::Unfinished
        }
    }

    /// Count the batch's units matching `selection`, re-reading the batch from disk.
    pub fn try_count_by_selection(
        &self,
        batch_path: &Utf8Path,
        selection: UnitSelection,
    ) -> Result<usize, DocumentError> {
        let batch = BatchLoader::try_load(batch_path)?;

        if selection == UnitSelection::All {
            return Ok(batch.count_experimental_units());
        }
        Ok(batch
            .units()
            .filter(|unit| selection.matches(self.classify(&unit.path)))
            .count())
    }

    /// Like [`try_count_by_selection`](Self::try_count_by_selection), counting 0
    /// when the batch cannot be read.
    pub fn count_by_selection(&self, batch_path: &Utf8Path, selection: UnitSelection) -> usize {
        self.try_count_by_selection(batch_path, selection)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to count experimental units: {}", e);
                0
            })
    }

    /// Every unit of the batch with its current status, in document order.
    pub fn unit_statuses(
        &self,
        batch_path: &Utf8Path,
    ) -> Result<Vec<(ExperimentalUnit, UnitStatus)>, DocumentError> {
        let batch = BatchLoader::try_load(batch_path)?;
        Ok(batch
            .units()
            .map(|unit| (unit.clone(), self.classify(&unit.path)))
            .collect())
    }

    /// Delete every sidecar file of every unit in the batch.
    ///
    /// A file that cannot be removed is recorded in the report and skipped;
    /// the remaining files are still processed.
    pub fn try_delete_log_files(&self, batch_path: &Utf8Path) -> Result<DeletionReport, DocumentError> {
        let batch = BatchLoader::try_load(batch_path)?;
        let mut report = DeletionReport::default();

        for unit in batch.units() {
            let sidecars = self.sidecar_paths(&unit.path);
            for sidecar in sidecars.iter() {
                if !sidecar.exists() {
                    continue;
                }
                match fs::remove_file(sidecar) {
                    Ok(()) => {
                        report.deleted += 1;
                        tracing::debug!("Deleted log file: {}", sidecar);
                    }
                    // Removed by someone else between the check and the delete
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!("Failed to delete log file {}: {}", sidecar, e);
                        report.failures.push(DeletionFailure {
                            path: sidecar.to_path_buf(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            "Deleted {} log files from {} ({} failures)",
            report.deleted,
            batch_path,
            report.failures.len()
        );
        Ok(report)
    }

    /// Like [`try_delete_log_files`](Self::try_delete_log_files), returning only
    /// the number of files deleted (0 when the batch cannot be read).
    pub fn delete_log_files(&self, batch_path: &Utf8Path) -> usize {
        match self.try_delete_log_files(batch_path) {
            Ok(report) => report.deleted,
            Err(e) => {
                tracing::error!("Failed to delete log files: {}", e);
                0
            }
        }
    }
}
