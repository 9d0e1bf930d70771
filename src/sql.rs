//! SQL statement generation and execution.
//!
//! The builder turns table descriptors into the four statements the loader
//! needs. Execution goes through the [`SqlExecutor`] capability so that the
//! engine client is pluggable and tests can record statements instead of
//! running them.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FatalError;
use crate::schema::TableDescriptor;

/// Error substring the engine emits when creating a table that exists.
pub const TABLE_ALREADY_EXISTS: &str = "Table already exists:";

/// Error substring the engine emits when dropping a table that does not
/// exist.
pub const TABLE_DOES_NOT_EXIST: &str = "Table does not exist:";

/// Executes one SQL statement against the engine.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, statement: &str) -> Result<()>;
}

/// A prepared statement bound to its executor.
#[derive(Clone)]
pub struct Query {
    executor: Arc<dyn SqlExecutor>,
    statement: String,
}

impl Query {
    pub fn new(executor: Arc<dyn SqlExecutor>, statement: impl Into<String>) -> Self {
        Query {
            executor,
            statement: statement.into(),
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub async fn execute(&self) -> Result<()> {
        debug!(statement = %self.statement, "executing statement");
        self.executor
            .execute(&self.statement)
            .await
            .with_context(|| format!("Failed to execute: {}", self.statement))
    }

    /// Execute, treating errors containing `benign` as success. Used for
    /// create/drop statements that race against already-applied state.
    pub async fn execute_allowing(&self, benign: &str) -> Result<()> {
        match self.execute().await {
            Ok(()) => Ok(()),
            Err(e) if format!("{e:#}").contains(benign) => {
                warn!(statement = %self.statement, "statement skipped: {benign}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("statement", &self.statement)
            .finish()
    }
}

/// Builds the loader's statements from table descriptors.
#[derive(Clone)]
pub struct QueryBuilder {
    executor: Arc<dyn SqlExecutor>,
}

impl QueryBuilder {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        QueryBuilder { executor }
    }

    /// Wrap an operator-supplied statement verbatim.
    pub fn raw(&self, statement: impl Into<String>) -> Query {
        Query::new(self.executor.clone(), statement)
    }

    /// External text-backed table over the staging directory.
    pub fn create_external_table(&self, table: &TableDescriptor, location: &Path) -> Query {
        let columns = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        Query::new(
            self.executor.clone(),
            format!(
                "CREATE EXTERNAL TABLE {} ({}) STORED AS textfile LOCATION '{}'",
                table.qualified_name(),
                columns,
                location.display()
            ),
        )
    }

    /// Parquet-backed final table, partitioned when the descriptor carries
    /// partition columns.
    pub fn create_table(&self, table: &TableDescriptor) -> Query {
        let columns = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        let partitioned_by = if table.partition_columns().is_empty() {
            String::new()
        } else {
            let partitions = table
                .partition_columns()
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            format!("PARTITIONED BY ({partitions}) ")
        };
        Query::new(
            self.executor.clone(),
            format!(
                "CREATE TABLE {} ({}) {}STORED AS parquet",
                table.qualified_name(),
                columns,
                partitioned_by
            ),
        )
    }

    /// Typed projection from the staging table into the final table. The
    /// optional file-size hint is prepended as an engine pragma.
    pub fn insert_into(
        &self,
        target: &TableDescriptor,
        staging: &TableDescriptor,
        file_size_hint: Option<u64>,
    ) -> Query {
        let prefix = match file_size_hint {
            Some(size) => format!("set PARQUET_FILE_SIZE={size}; "),
            None => String::new(),
        };
        let partition = if target.partition_columns().is_empty() {
            String::new()
        } else {
            let names = target
                .partition_columns()
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("PARTITION ({names}) ")
        };
        let select_list = target
            .columns()
            .iter()
            .chain(target.partition_columns())
            .map(|c| c.select_expression().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Query::new(
            self.executor.clone(),
            format!(
                "{}INSERT INTO {} {}SELECT {} FROM {}",
                prefix,
                target.qualified_name(),
                partition,
                select_list,
                staging.qualified_name()
            ),
        )
    }

    pub fn drop_table(&self, table: &TableDescriptor) -> Query {
        Query::new(
            self.executor.clone(),
            format!("DROP TABLE {}", table.qualified_name()),
        )
    }
}

/// Executor that shells out to an engine client, appending the statement as
/// the final argument.
pub struct CommandLineExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandLineExecutor {
    pub fn from_command(command: &[String]) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            return Err(FatalError::config(
                "sql_command must name the engine client program",
            ));
        };
        Ok(CommandLineExecutor {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl SqlExecutor for CommandLineExecutor {
    async fn execute(&self, statement: &str) -> Result<()> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(statement)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !output.status.success() {
            // The engine reports errors on stderr; keep both streams so
            // benign-error matching sees the full message.
            bail!(
                "{} exited with {}: {}{}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr),
                String::from_utf8_lossy(&output.stdout)
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, TableKind};

    struct FailingExecutor(String);

    #[async_trait]
    impl SqlExecutor for FailingExecutor {
        async fn execute(&self, _statement: &str) -> Result<()> {
            bail!("{}", self.0)
        }
    }

    struct OkExecutor;

    #[async_trait]
    impl SqlExecutor for OkExecutor {
        async fn execute(&self, _statement: &str) -> Result<()> {
            Ok(())
        }
    }

    fn builder() -> QueryBuilder {
        QueryBuilder::new(Arc::new(OkExecutor))
    }

    fn staging_table() -> TableDescriptor {
        let mut table = TableDescriptor::new("schema", "table_staging", TableKind::Staging);
        table.add_column(ColumnDescriptor {
            name: "c1".to_string(),
            data_type: "STRING".to_string(),
            expression: None,
            role: crate::schema::ColumnRole::Regular,
        });
        table.add_column(ColumnDescriptor {
            name: "c2".to_string(),
            data_type: "STRING".to_string(),
            expression: None,
            role: crate::schema::ColumnRole::Regular,
        });
        table
    }

    fn target_table() -> TableDescriptor {
        let mut table = TableDescriptor::new("schema", "table", TableKind::Target);
        table.add_column(ColumnDescriptor::new("c1", "INT"));
        table.add_column(ColumnDescriptor::new("c2", "BOOLEAN"));
        table
    }

    #[test]
    fn test_create_external_table() {
        let expected = "CREATE EXTERNAL TABLE schema.table_staging (c1 STRING, c2 STRING) \
                        STORED AS textfile LOCATION '/path'";
        let mut table = staging_table();
        let query = builder().create_external_table(&table, Path::new("/path"));
        assert_eq!(query.statement(), expected);

        // Partition columns never appear in the external-table DDL.
        table.add_column(ColumnDescriptor::partitioning("p1", "INT", "e1"));
        let query = builder().create_external_table(&table, Path::new("/path"));
        assert_eq!(query.statement(), expected);
    }

    #[test]
    fn test_create_table_without_partitions() {
        let mut table = TableDescriptor::new("schema", "table", TableKind::Target);
        table.add_column(ColumnDescriptor::new("c1", "BIGINT"));
        table.add_column(ColumnDescriptor::new("c2", "BOOLEAN"));
        let query = builder().create_table(&table);
        assert_eq!(
            query.statement(),
            "CREATE TABLE schema.table (c1 BIGINT, c2 BOOLEAN) STORED AS parquet"
        );
    }

    #[test]
    fn test_create_table_with_partitions() {
        let mut table = TableDescriptor::new("schema", "table", TableKind::Target);
        table.add_column(ColumnDescriptor::new("c1", "BIGINT"));
        table.add_column(ColumnDescriptor::new("c2", "BOOLEAN"));
        table.add_column(ColumnDescriptor::partitioning("p1", "DECIMAL(5,1)", "e1"));
        table.add_column(ColumnDescriptor::partitioning("p2", "BIGINT", "e2"));
        let query = builder().create_table(&table);
        assert_eq!(
            query.statement(),
            "CREATE TABLE schema.table (c1 BIGINT, c2 BOOLEAN) \
             PARTITIONED BY (p1 DECIMAL(5,1), p2 BIGINT) STORED AS parquet"
        );
    }

    #[test]
    fn test_insert_into_with_partitions_and_hint() {
        let mut target = target_table();
        target.add_column(ColumnDescriptor::partitioning("p1", "INT", "pexpr1"));
        target.add_column(ColumnDescriptor::partitioning("p2", "INT", "pexpr2"));
        let query = builder().insert_into(&target, &staging_table(), Some(1024));
        assert_eq!(
            query.statement(),
            "set PARQUET_FILE_SIZE=1024; INSERT INTO schema.table PARTITION (p1, p2) \
             SELECT cast(c1 as INT), cast(c2 as BOOLEAN), pexpr1, pexpr2 \
             FROM schema.table_staging"
        );
    }

    #[test]
    fn test_insert_into_plain() {
        let query = builder().insert_into(&target_table(), &staging_table(), None);
        assert_eq!(
            query.statement(),
            "INSERT INTO schema.table \
             SELECT cast(c1 as INT), cast(c2 as BOOLEAN) FROM schema.table_staging"
        );
    }

    #[test]
    fn test_drop_table() {
        let query = builder().drop_table(&target_table());
        assert_eq!(query.statement(), "DROP TABLE schema.table");
    }

    #[tokio::test]
    async fn test_benign_error_is_swallowed() {
        let executor = Arc::new(FailingExecutor(
            "AnalysisException: Table already exists: schema.table".to_string(),
        ));
        let query = Query::new(executor, "CREATE TABLE schema.table (c INT)");
        assert!(query.execute().await.is_err());
        assert!(query.execute_allowing(TABLE_ALREADY_EXISTS).await.is_ok());
    }

    #[tokio::test]
    async fn test_other_errors_propagate_through_allowing() {
        let executor = Arc::new(FailingExecutor("connection refused".to_string()));
        let query = Query::new(executor, "DROP TABLE schema.table");
        assert!(query
            .execute_allowing(TABLE_DOES_NOT_EXIST)
            .await
            .is_err());
    }
}
