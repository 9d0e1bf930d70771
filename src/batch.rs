//! Per-cycle batch orchestration.
//!
//! A [`Batch`] drives one claimed control file through its transitions:
//! stage the listed files, load them into the final table, then clean up.
//! Every step re-checks the durable state first, so a batch recovered after
//! a crash resumes exactly where the previous process stopped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, error, info, warn};

use crate::control::{BatchState, ControlFile};
use crate::error::FatalError;
use crate::sql::{Query, TABLE_ALREADY_EXISTS, TABLE_DOES_NOT_EXIST};
use crate::store::{LocalStore, StagingStore};

pub struct Batch {
    control: ControlFile,
    local: Arc<dyn LocalStore>,
    staging: Arc<dyn StagingStore>,
    source_directory: PathBuf,
    staging_directory: PathBuf,
    create_staging_table: Query,
    insert_into: Query,
    drop_staging_table: Query,
}

impl Batch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        control: ControlFile,
        local: Arc<dyn LocalStore>,
        staging: Arc<dyn StagingStore>,
        source_directory: PathBuf,
        staging_directory: PathBuf,
        create_staging_table: Query,
        insert_into: Query,
        drop_staging_table: Query,
    ) -> Self {
        Batch {
            control,
            local,
            staging,
            source_directory,
            staging_directory,
            create_staging_table,
            insert_into,
            drop_staging_table,
        }
    }

    /// Run the batch to the committed state, resuming from whatever state
    /// the control file records.
    pub async fn run(&mut self) -> Result<()> {
        if self.control.state() == BatchState::ToProcess {
            self.stage_files().await?;
        }
        if self.control.state() == BatchState::LoadedIntoHdfs {
            self.load_into_final_table().await?;
        }
        Ok(())
    }

    /// Copy every listed data file to the staging directory, remove the
    /// local sources, and record the transition.
    async fn stage_files(&mut self) -> Result<()> {
        let data_files = self.control.list_data_files().await?;

        if self.staging.exists(&self.staging_directory).await? {
            if !self.staging.is_empty(&self.staging_directory).await? {
                bail!(
                    "staging directory {} already contains data; stale files would \
                     corrupt the coming insert and must be removed first",
                    self.staging_directory.display()
                );
            }
        } else {
            self.staging.mkdirs(&self.staging_directory).await?;
        }

        let mut total_bytes = 0u64;
        for file in &data_files {
            let path = self.source_directory.join(file);
            let bytes = self.local.file_size(&path).await.unwrap_or(0);
            self.staging
                .copy_from_local(&path, &self.staging_directory)
                .await?;
            total_bytes += bytes;
            debug!(
                file = %path.display(),
                bytes,
                staging = %self.staging_directory.display(),
                "copied data file to staging"
            );
        }
        info!(
            files = data_files.len(),
            megabytes = total_bytes / 1024 / 1024,
            "copied data files to staging"
        );

        // All copies succeeded; the staged data is now the batch's source of
        // truth. A local file that survives past this point would be listed
        // again by a future control file and loaded twice.
        for file in &data_files {
            let path = self.source_directory.join(file);
            if let Err(e) = self.local.delete(&path).await {
                error!(file = %path.display(), "local data file could not be deleted: {e:#}");
                return Err(FatalError::unrecoverable(
                    format!(
                        "the local data file {} could not be deleted after being copied \
                         to staging",
                        path.display()
                    ),
                    "delete the file by hand before restarting the loader, otherwise \
                     its data may be inserted into the final table twice",
                ));
            }
            debug!(file = %path.display(), "deleted local data file");
        }

        self.control.mark_loaded_into_hdfs().await
    }

    /// Create the staging table over the staged files, insert into the final
    /// table, and record the transition.
    ///
    /// An empty batch still runs both statements so DDL side effects match
    /// non-empty cycles.
    async fn load_into_final_table(&mut self) -> Result<()> {
        self.create_staging_table
            .execute_allowing(TABLE_ALREADY_EXISTS)
            .await?;
        info!("created staging table");

        self.insert_into.execute().await?;
        info!("copied data from staging table to final table");

        self.control.mark_inserted_into_final_table().await
    }

    /// Remove the control file, the staging table and the staged data.
    ///
    /// Only the control-file deletion can fail the batch: a leftover control
    /// file would replay the whole insert. Staging leftovers are reported
    /// and swept up at the next startup.
    pub async fn clean(self) -> Result<()> {
        if self.control.state() != BatchState::InsertedIntoFinalTable {
            bail!(
                "batch for {} cannot be cleaned before its data is inserted (state: {:?})",
                self.control.path().display(),
                self.control.state()
            );
        }

        let control_path = self.control.path().to_path_buf();
        if let Err(e) = self.control.delete().await {
            error!(path = %control_path.display(), "control file could not be deleted: {e:#}");
            return Err(FatalError::unrecoverable(
                format!(
                    "the control file {} could not be deleted after its data was \
                     inserted into the final table",
                    control_path.display()
                ),
                "delete the control file by hand before restarting the loader, \
                 otherwise the same data will be inserted again (duplicates)",
            ));
        }
        debug!(path = %control_path.display(), "deleted control file");

        if let Err(e) = self.drop_staging_table.execute_allowing(TABLE_DOES_NOT_EXIST).await {
            warn!("staging table could not be dropped, it will be dropped at the next startup: {e:#}");
        }

        match self.staging.exists(&self.staging_directory).await {
            Ok(true) => {
                if let Err(e) = self.staging.delete_recursive(&self.staging_directory).await {
                    warn!(
                        directory = %self.staging_directory.display(),
                        "staging directory could not be removed: {e:#}"
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    directory = %self.staging_directory.display(),
                    "staging directory could not be checked: {e:#}"
                );
            }
        }

        info!("deleted staging data");
        Ok(())
    }
}
