//! Crash-recoverable control-file state machine.
//!
//! The producer writes a marker file next to its extract files; its body
//! lists the data files of one batch. The loader claims the marker by
//! atomically renaming it to the `.to_process` name, then records progress
//! by rewriting the body with sentinel labels. Because every fact needed to
//! resume lives in the file, a restart picks up exactly where the previous
//! process stopped, never duplicating or skipping data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::error::FatalError;
use crate::store::LocalStore;

/// Suffix of the claimed (in-flight) control file.
pub const IN_FLIGHT_SUFFIX: &str = ".to_process";

pub const FILES_LOADED_INTO_HDFS_LABEL: &str = "FILES LOADED INTO HDFS";

pub const DATA_INSERTED_INTO_FINAL_TABLE_LABEL: &str = "DATA INSERTED INTO FINAL TABLE";

/// Progress of one batch, derived from the control-file body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    ToProcess,
    LoadedIntoHdfs,
    InsertedIntoFinalTable,
}

/// A claimed control file: the in-flight path plus the state derived from
/// its content, operating against an injected filesystem capability.
pub struct ControlFile {
    store: Arc<dyn LocalStore>,
    path: PathBuf,
    state: BatchState,
}

impl ControlFile {
    /// Claim the marker at `marker` (the path the producer writes), or
    /// recover a previously claimed one.
    ///
    /// If the in-flight file already exists, a previous run stopped mid-way:
    /// no new claim is taken and the state is derived from its content.
    /// Otherwise, if the original marker exists, it is atomically renamed to
    /// the in-flight name; the rename is the claim. Returns `Ok(None)` when
    /// neither file exists (no work).
    pub async fn acquire(
        store: Arc<dyn LocalStore>,
        marker: &Path,
    ) -> Result<Option<ControlFile>> {
        let in_flight = in_flight_path(marker);

        if store.exists(&in_flight).await? {
            warn!(path = %in_flight.display(), "recovering previously claimed control file");
            let state = derive_state(store.as_ref(), &in_flight).await?;
            return Ok(Some(ControlFile {
                store,
                path: in_flight,
                state,
            }));
        }

        if !store.exists(marker).await? {
            return Ok(None);
        }

        store
            .rename(marker, &in_flight)
            .await
            .with_context(|| format!("Failed to claim control file {}", marker.display()))?;
        debug!(
            from = %marker.display(),
            to = %in_flight.display(),
            "claimed control file"
        );

        let state = derive_state(store.as_ref(), &in_flight).await?;
        Ok(Some(ControlFile {
            store,
            path: in_flight,
            state,
        }))
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data file names listed in the body: one or more lines of
    /// comma-separated names, order and duplicates preserved.
    ///
    /// Only valid in `ToProcess`; later states have overwritten the list.
    pub async fn list_data_files(&self) -> Result<Vec<String>> {
        if self.state != BatchState::ToProcess {
            bail!(
                "data files of {} can only be listed in the TO_PROCESS state (current: {:?})",
                self.path.display(),
                self.state
            );
        }

        let content = self.store.read_to_string(&self.path).await?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .flat_map(|line| line.split(','))
            .map(str::to_string)
            .collect())
    }

    /// Record that every data file has been copied to staging. Must reach
    /// disk before the caller proceeds to the insert step.
    pub async fn mark_loaded_into_hdfs(&mut self) -> Result<()> {
        if self.state != BatchState::ToProcess {
            bail!(
                "control file {} cannot be marked as loaded from state {:?}",
                self.path.display(),
                self.state
            );
        }

        if let Err(e) = self.store.write(&self.path, FILES_LOADED_INTO_HDFS_LABEL).await {
            return Err(FatalError::unrecoverable(
                format!(
                    "the control file {} could not be marked as loaded into staging: {e:#}",
                    self.path.display()
                ),
                "verify the control file content by hand; if the data files were already \
                 moved to staging, rewrite the file with the label 'FILES LOADED INTO HDFS' \
                 before restarting the loader",
            ));
        }

        self.state = BatchState::LoadedIntoHdfs;
        debug!(path = %self.path.display(), "control file marked as loaded into staging");
        Ok(())
    }

    /// Record that the staged data has been inserted into the final table.
    ///
    /// A failure here is the most dangerous case: the insert has committed
    /// but the file still claims otherwise, so a restart would re-insert.
    pub async fn mark_inserted_into_final_table(&mut self) -> Result<()> {
        if self.state != BatchState::LoadedIntoHdfs {
            bail!(
                "control file {} cannot be marked as inserted from state {:?}",
                self.path.display(),
                self.state
            );
        }

        if let Err(e) = self
            .store
            .write(&self.path, DATA_INSERTED_INTO_FINAL_TABLE_LABEL)
            .await
        {
            return Err(FatalError::unrecoverable(
                format!(
                    "the control file {} could not be marked as inserted into the final \
                     table: {e:#}",
                    self.path.display()
                ),
                "the staged data HAS been inserted; if the loader is restarted without \
                 fixing the control file, the same data will be inserted again. Rewrite \
                 the file with the label 'DATA INSERTED INTO FINAL TABLE' or delete it \
                 after confirming the target table contents",
            ));
        }

        self.state = BatchState::InsertedIntoFinalTable;
        debug!(path = %self.path.display(), "control file marked as inserted into final table");
        Ok(())
    }

    /// Remove the control file. Only called after the final state has been
    /// durably recorded and staging resources released.
    pub async fn delete(self) -> Result<()> {
        self.store.delete(&self.path).await
    }
}

/// In-flight path for a marker: the same path with the claim suffix.
pub fn in_flight_path(marker: &Path) -> PathBuf {
    let mut name = marker.as_os_str().to_os_string();
    name.push(IN_FLIGHT_SUFFIX);
    PathBuf::from(name)
}

async fn derive_state(store: &dyn LocalStore, path: &Path) -> Result<BatchState> {
    let content = store
        .read_to_string(path)
        .await
        .with_context(|| format!("Failed to read control file {}", path.display()))?;

    let first_line = content.lines().next().unwrap_or("");
    Ok(if first_line == FILES_LOADED_INTO_HDFS_LABEL {
        BatchState::LoadedIntoHdfs
    } else if first_line == DATA_INSERTED_INTO_FINAL_TABLE_LABEL {
        BatchState::InsertedIntoFinalTable
    } else {
        BatchState::ToProcess
    })
}
