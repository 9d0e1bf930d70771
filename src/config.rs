//! Configuration surface for the loader.
//!
//! Settings are produced externally (a JSON file loaded by the CLI, or built
//! directly by embedders) and validated eagerly so that missing configuration
//! fails before the first poll. The loader can be driven in one of two
//! mutually exclusive modes:
//!
//! - **definition mode**: a schema-definition file describes the source
//!   table; operator overrides (names, types, expressions, partition columns,
//!   raw SQL for individual statements) customize the derived tables.
//! - **raw mode**: all four SQL statements are fully specified, along with
//!   the control-file name and the staging directory.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::FatalError;
use crate::schema::{ColumnOverride, PartitionColumnSpec};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_FAILURE_BACKOFF_SECS: u64 = 60;

/// Default root under which per-table staging directories are created.
pub const DEFAULT_STAGING_ROOT: &str = "staging";

/// Raw SQL overrides for the four generated statements.
///
/// In definition mode each set statement replaces its generated counterpart.
/// In raw mode all four must be present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawQueries {
    pub create_staging_table: Option<String>,
    pub drop_staging_table: Option<String>,
    pub insert_into: Option<String>,
    pub create_target_table: Option<String>,
}

impl RawQueries {
    pub fn is_complete(&self) -> bool {
        self.create_staging_table.is_some()
            && self.drop_staging_table.is_some()
            && self.insert_into.is_some()
            && self.create_target_table.is_some()
    }

    /// Names of the statements that are not configured.
    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.create_staging_table.is_none() {
            missing.push("queries.create_staging_table");
        }
        if self.drop_staging_table.is_none() {
            missing.push("queries.drop_staging_table");
        }
        if self.insert_into.is_none() {
            missing.push("queries.insert_into");
        }
        if self.create_target_table.is_none() {
            missing.push("queries.create_target_table");
        }
        missing
    }
}

/// Optional schema/table renames, applied to the target or staging identity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableIdentity {
    pub schema: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directories the producer drops extract files and markers into.
    pub source_directories: Vec<PathBuf>,

    /// Name of the marker file inside each source directory. Defaults to
    /// `<staging schema>.<staging table>control` in definition mode.
    #[serde(default)]
    pub control_file_name: Option<String>,

    /// Path to the schema-definition file (definition mode).
    #[serde(default)]
    pub definition_file: Option<PathBuf>,

    #[serde(default)]
    pub queries: RawQueries,

    /// Target table identity overrides.
    #[serde(default)]
    pub target: TableIdentity,

    /// Staging table identity overrides.
    #[serde(default)]
    pub staging: TableIdentity,

    /// Per-column overrides applied to the target table.
    #[serde(default)]
    pub columns: Vec<ColumnOverride>,

    /// Partition column definitions, appended to the target table.
    #[serde(default)]
    pub partition_columns: Vec<PartitionColumnSpec>,

    /// Staging directory; defaults to `staging/<schema>/<table>` in
    /// definition mode, mandatory in raw mode.
    #[serde(default)]
    pub staging_directory: Option<PathBuf>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_failure_backoff")]
    pub failure_backoff_secs: u64,

    /// Optional file-size hint emitted as a `set PARQUET_FILE_SIZE=..;`
    /// prefix on the generated insert statement.
    #[serde(default)]
    pub parquet_file_size: Option<u64>,

    /// Command used to execute SQL statements (program followed by fixed
    /// arguments; the statement is appended as the last argument). Only
    /// required by the CLI; embedders inject their own executor.
    #[serde(default)]
    pub sql_command: Vec<String>,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_failure_backoff() -> u64 {
    DEFAULT_FAILURE_BACKOFF_SECS
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }

    /// Eager validation of everything that must be known before the first
    /// poll. Violations are configuration errors and terminate the process.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source_directories.is_empty() {
            return Err(FatalError::config(
                "at least one source directory must be configured",
            ));
        }

        if self.definition_file.is_none() {
            // Raw mode: every statement, the control-file name and the
            // staging directory must be fully specified.
            if !self.queries.is_complete() {
                return Err(FatalError::config(format!(
                    "either a definition file or all four queries must be configured; \
                     missing: {}",
                    self.queries.missing().join(", ")
                )));
            }
            if self.control_file_name.is_none() {
                return Err(FatalError::config(
                    "control_file_name must be configured when no definition file is used",
                ));
            }
            if self.staging_directory.is_none() {
                return Err(FatalError::config(
                    "staging_directory must be configured when no definition file is used",
                ));
            }
        }

        for part in &self.partition_columns {
            if part.name.is_empty() || part.data_type.is_empty() || part.expression.is_empty() {
                return Err(FatalError::config(format!(
                    "partition column '{}' must specify name, data type and expression",
                    part.name
                )));
            }
        }

        Ok(())
    }
}
