//! The unattended polling loop.
//!
//! A [`Loader`] is built once at startup: it parses the schema-definition
//! file, applies operator overrides, derives the staging table, probes the
//! staging directory and prepares the four SQL statements. After that the
//! loop only acquires control files and runs batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::{Settings, DEFAULT_STAGING_ROOT};
use crate::control::ControlFile;
use crate::error::FatalError;
use crate::schema::read_definition_file;
use crate::sql::{
    Query, QueryBuilder, SqlExecutor, TABLE_ALREADY_EXISTS, TABLE_DOES_NOT_EXIST,
};
use crate::store::{LocalStore, StagingStore};

pub struct Loader {
    settings: Settings,
    local: Arc<dyn LocalStore>,
    staging: Arc<dyn StagingStore>,
    staging_directory: PathBuf,
    control_markers: Vec<PathBuf>,
    create_target_table: Query,
    create_staging_table: Query,
    insert_into: Query,
    drop_staging_table: Query,
}

impl Loader {
    /// Build the loader: validate settings, derive descriptors, probe the
    /// staging directory and prepare all statements.
    pub async fn new(
        settings: Settings,
        local: Arc<dyn LocalStore>,
        staging: Arc<dyn StagingStore>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Result<Loader> {
        settings.validate()?;
        let builder = QueryBuilder::new(executor);

        let (staging_directory, control_name, queries) =
            if let Some(definition) = &settings.definition_file {
                Self::configure_from_definition(&settings, local.as_ref(), &staging, &builder, definition)
                    .await?
            } else {
                Self::configure_raw(&settings, &staging, &builder).await?
            };

        let control_markers = settings
            .source_directories
            .iter()
            .map(|dir| dir.join(&control_name))
            .collect();

        let [create_target_table, create_staging_table, insert_into, drop_staging_table] = queries;
        Ok(Loader {
            settings,
            local,
            staging,
            staging_directory,
            control_markers,
            create_target_table,
            create_staging_table,
            insert_into,
            drop_staging_table,
        })
    }

    async fn configure_from_definition(
        settings: &Settings,
        local: &dyn LocalStore,
        staging: &Arc<dyn StagingStore>,
        builder: &QueryBuilder,
        definition: &Path,
    ) -> Result<(PathBuf, String, [Query; 4])> {
        let source = read_definition_file(local, definition).await?;

        // The staging table mirrors the raw extract, so it derives from the
        // source shape before any column overrides.
        let mut staging_table = source.staging_definition();
        staging_table.rename(
            settings.staging.schema.as_deref(),
            settings.staging.table.as_deref(),
        );

        let mut target = source;
        target.rename(
            settings.target.schema.as_deref(),
            settings.target.table.as_deref(),
        );
        target.apply_overrides(&settings.columns)?;
        target.add_partition_columns(&settings.partition_columns);
        info!(target = %target.qualified_name(), staging = %staging_table.qualified_name(),
              "configured tables from definition file");

        let staging_directory = settings.staging_directory.clone().unwrap_or_else(|| {
            PathBuf::from(DEFAULT_STAGING_ROOT)
                .join(&target.schema_name)
                .join(&target.table_name)
        });
        let staging_directory = probe_staging_directory(staging.as_ref(), &staging_directory).await?;

        let control_name = settings.control_file_name.clone().unwrap_or_else(|| {
            format!(
                "{}.{}control",
                staging_table.schema_name, staging_table.table_name
            )
        });

        let queries = [
            raw_or(settings.queries.create_target_table.as_deref(), builder, || {
                builder.create_table(&target)
            }),
            raw_or(settings.queries.create_staging_table.as_deref(), builder, || {
                builder.create_external_table(&staging_table, &staging_directory)
            }),
            raw_or(settings.queries.insert_into.as_deref(), builder, || {
                builder.insert_into(&target, &staging_table, settings.parquet_file_size)
            }),
            raw_or(settings.queries.drop_staging_table.as_deref(), builder, || {
                builder.drop_table(&staging_table)
            }),
        ];
        Ok((staging_directory, control_name, queries))
    }

    async fn configure_raw(
        settings: &Settings,
        staging: &Arc<dyn StagingStore>,
        builder: &QueryBuilder,
    ) -> Result<(PathBuf, String, [Query; 4])> {
        // validate() has guaranteed all of these are present.
        let directory = settings
            .staging_directory
            .clone()
            .ok_or_else(|| FatalError::config("staging_directory is required"))?;
        let staging_directory = probe_staging_directory(staging.as_ref(), &directory).await?;
        let control_name = settings
            .control_file_name
            .clone()
            .ok_or_else(|| FatalError::config("control_file_name is required"))?;
        let q = &settings.queries;
        let queries = [
            builder.raw(q.create_target_table.clone().unwrap_or_default()),
            builder.raw(q.create_staging_table.clone().unwrap_or_default()),
            builder.raw(q.insert_into.clone().unwrap_or_default()),
            builder.raw(q.drop_staging_table.clone().unwrap_or_default()),
        ];
        Ok((staging_directory, control_name, queries))
    }

    pub fn staging_directory(&self) -> &Path {
        &self.staging_directory
    }

    pub fn control_markers(&self) -> &[PathBuf] {
        &self.control_markers
    }

    /// One-time startup work against the engine: create the target table if
    /// it is missing and drop a staging table left over from a crash.
    pub async fn prepare(&self) -> Result<()> {
        self.create_target_table
            .execute_allowing(TABLE_ALREADY_EXISTS)
            .await
            .context("final table could not be created")?;
        info!("created final table");

        self.drop_staging_table
            .execute_allowing(TABLE_DOES_NOT_EXIST)
            .await?;
        info!("dropped stale staging table");
        Ok(())
    }

    /// Poll every source directory once, running each acquired batch to
    /// completion. Returns the number of batches processed.
    pub async fn run_once(&self) -> Result<usize> {
        let mut processed = 0;
        for marker in &self.control_markers {
            let Some(control) = ControlFile::acquire(self.local.clone(), marker).await? else {
                continue;
            };
            info!(marker = %marker.display(), "there is new data to process");

            let source_directory = marker
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let mut batch = Batch::new(
                control,
                self.local.clone(),
                self.staging.clone(),
                source_directory,
                self.staging_directory.clone(),
                self.create_staging_table.clone(),
                self.insert_into.clone(),
                self.drop_staging_table.clone(),
            );
            batch.run().await?;
            batch.clean().await?;
            processed += 1;
        }

        if processed == 0 {
            debug!("there is no data to process");
        }
        Ok(processed)
    }

    /// Prepare, then poll forever. Only returns on error; classification of
    /// the error (retry vs terminate) is the caller's concern.
    pub async fn run(&self) -> Result<()> {
        self.prepare().await?;
        loop {
            let cycle_start = Instant::now();
            self.run_once().await?;

            let remaining = self
                .settings
                .poll_interval()
                .saturating_sub(cycle_start.elapsed());
            if !remaining.is_zero() {
                debug!(seconds = remaining.as_secs(), "waiting for the next batch");
                tokio::time::sleep(remaining).await;
            }
        }
    }
}

fn raw_or(configured: Option<&str>, builder: &QueryBuilder, generate: impl FnOnce() -> Query) -> Query {
    match configured {
        Some(statement) => {
            info!(statement, "using configured statement");
            builder.raw(statement)
        }
        None => generate(),
    }
}

/// Check the staging directory is usable and resolve it to its qualified
/// form. A directory created purely for the probe is removed again; a
/// pre-existing one is left alone since it may hold recovered batch data.
async fn probe_staging_directory(staging: &dyn StagingStore, directory: &Path) -> Result<PathBuf> {
    if staging.exists(directory).await? {
        return staging.resolve_absolute(directory).await;
    }
    staging
        .mkdirs(directory)
        .await
        .with_context(|| format!("staging directory {} could not be created", directory.display()))?;
    let resolved = staging.resolve_absolute(directory).await?;
    staging
        .delete_recursive(directory)
        .await
        .with_context(|| format!("staging directory {} could not be deleted", directory.display()))?;
    Ok(resolved)
}
