//! Schema-definition file parsing.
//!
//! The source system exports one definition file per table. Somewhere in it,
//! a line `Definition for table <schema>.<table>` names the table and a
//! later line `Columns: <count>` is immediately followed by the column
//! records; generator preamble and bookkeeping lines around the two headers
//! are ignored.
//!
//! Column lines are whitespace-separated records; the column name is the
//! first field and the JDBC type code sits at a fixed field index. Every
//! malformation is a configuration error since a bad definition can only be
//! fixed by the operator.

use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::error::FatalError;
use crate::store::LocalStore;

const TABLE_LINE_PREFIX: &str = "Definition for table ";
const COLUMN_COUNT_PREFIX: &str = "Columns: ";

/// Field index of the JDBC type code in a column line.
const JDBC_TYPE_FIELD: usize = 19;

/// Parse the definition file at `path` into a descriptor of the source table.
pub async fn read_definition_file(
    store: &dyn LocalStore,
    path: &Path,
) -> Result<crate::schema::TableDescriptor> {
    use crate::schema::{ColumnDescriptor, TableDescriptor, TableKind};

    if !store.exists(path).await? {
        return Err(anyhow::Error::new(FatalError::MissingFile(
            path.to_path_buf(),
        )));
    }
    let content = store.read_to_string(path).await?;
    let mut lines = content.lines();

    let mut table: Option<TableDescriptor> = None;
    while let Some(line) = lines.next() {
        if let Some(qualified) = line.strip_prefix(TABLE_LINE_PREFIX) {
            let Some((schema_name, table_name)) = qualified.trim().split_once('.') else {
                return Err(FatalError::config(format!(
                    "definition file {} names table '{}', expected '<schema>.<table>'",
                    path.display(),
                    qualified.trim()
                )));
            };
            table = Some(TableDescriptor::new(schema_name, table_name, TableKind::Target));
            continue;
        }

        let Some(raw_count) = line.strip_prefix(COLUMN_COUNT_PREFIX) else {
            continue;
        };
        // The table-name line must have been seen before the column count.
        let Some(mut table) = table else {
            return Err(FatalError::config(format!(
                "definition file {} has a '{}' line before the '{}' line",
                path.display(),
                COLUMN_COUNT_PREFIX.trim_end(),
                TABLE_LINE_PREFIX.trim_end()
            )));
        };
        let count: usize = raw_count.trim().parse().map_err(|_| {
            anyhow::Error::new(FatalError::Config(format!(
                "definition file {} has an invalid column count line '{}'",
                path.display(),
                line
            )))
        })?;

        // The column records follow the count line directly.
        for index in 0..count {
            let Some(line) = lines.next() else {
                return Err(FatalError::config(format!(
                    "definition file {} declares {} columns but contains only {}",
                    path.display(),
                    count,
                    index
                )));
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() <= JDBC_TYPE_FIELD {
                return Err(FatalError::config(format!(
                    "definition file {} column line {} has only {} fields",
                    path.display(),
                    index + 1,
                    fields.len()
                )));
            }
            let code: i32 = fields[JDBC_TYPE_FIELD].parse().map_err(|_| {
                anyhow::Error::new(FatalError::Config(format!(
                    "definition file {} column '{}' has a non-numeric type code '{}'",
                    path.display(),
                    fields[0],
                    fields[JDBC_TYPE_FIELD]
                )))
            })?;
            table.add_column(ColumnDescriptor::new(fields[0], sql_type_for(code)));
        }

        debug!(
            table = %table.qualified_name(),
            columns = table.columns().len(),
            "parsed definition file"
        );
        return Ok(table);
    }

    Err(FatalError::config(format!(
        "definition file {} contains no '{}' line",
        path.display(),
        match table {
            Some(_) => COLUMN_COUNT_PREFIX.trim_end(),
            None => TABLE_LINE_PREFIX.trim_end(),
        }
    )))
}

/// Map a JDBC type code to the SQL type the target table uses for it.
/// Unknown codes fall back to STRING, which any value can be staged as.
fn sql_type_for(jdbc_code: i32) -> &'static str {
    match jdbc_code {
        // BIT, BOOLEAN
        -7 | 16 => "BOOLEAN",
        // TINYINT, SMALLINT, INTEGER
        -6 | 5 | 4 => "INT",
        // BIGINT
        -5 => "BIGINT",
        // REAL and the vendor binary float
        7 | 100 => "FLOAT",
        // FLOAT, DOUBLE, NUMERIC, DECIMAL and the vendor binary double
        6 | 8 | 2 | 3 | 101 => "DOUBLE",
        // DATE, TIME, TIMESTAMP and the vendor timestamp-with-timezone
        91 | 92 | 93 | 187 => "TIMESTAMP",
        _ => "STRING",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_fatal;
    use crate::store::DiskLocalStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn column_line(name: &str, jdbc_code: i32) -> String {
        // A column record has many bookkeeping fields; only the name and the
        // type code matter here.
        let mut fields = vec![name.to_string()];
        for i in 1..JDBC_TYPE_FIELD {
            fields.push(format!("f{i}"));
        }
        fields.push(jdbc_code.to_string());
        fields.push("trailing".to_string());
        fields.join(" ")
    }

    async fn write_definition(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("table.def");
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_parses_table_and_columns() {
        let dir = TempDir::new().unwrap();
        let content = format!(
            "Definition for table sales.orders\nColumns: 3\n{}\n{}\n{}\n",
            column_line("id", -5),
            column_line("active", 16),
            column_line("label", 12),
        );
        let path = write_definition(&dir, &content).await;

        let table = read_definition_file(&DiskLocalStore, &path).await.unwrap();
        assert_eq!(table.qualified_name(), "sales.orders");
        assert_eq!(table.columns().len(), 3);
        assert_eq!(table.columns()[0].name, "id");
        assert_eq!(table.columns()[0].data_type, "BIGINT");
        assert_eq!(table.columns()[1].data_type, "BOOLEAN");
        assert_eq!(table.columns()[2].data_type, "STRING");
    }

    #[tokio::test]
    async fn test_type_code_mapping() {
        let cases = [
            (-7, "BOOLEAN"),
            (4, "INT"),
            (-6, "INT"),
            (5, "INT"),
            (-5, "BIGINT"),
            (7, "FLOAT"),
            (100, "FLOAT"),
            (6, "DOUBLE"),
            (8, "DOUBLE"),
            (2, "DOUBLE"),
            (3, "DOUBLE"),
            (101, "DOUBLE"),
            (91, "TIMESTAMP"),
            (92, "TIMESTAMP"),
            (93, "TIMESTAMP"),
            (187, "TIMESTAMP"),
            (12, "STRING"),
            (2004, "STRING"),
        ];
        for (code, expected) in cases {
            assert_eq!(sql_type_for(code), expected, "jdbc code {code}");
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = read_definition_file(&DiskLocalStore, &dir.path().join("absent.def"))
            .await
            .unwrap_err();
        assert!(is_fatal(&err));
    }

    #[tokio::test]
    async fn test_preamble_and_bookkeeping_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let content = format!(
            "* Generated by the export utility\n\
             Database type: ORACLE\n\
             Definition for table sales.orders\n\
             Record Length: 116\n\
             Columns: 2\n{}\n{}\ntrailing summary line\n",
            column_line("id", -5),
            column_line("label", 12),
        );
        let path = write_definition(&dir, &content).await;

        let table = read_definition_file(&DiskLocalStore, &path).await.unwrap();
        assert_eq!(table.qualified_name(), "sales.orders");
        assert_eq!(table.columns().len(), 2);
        assert_eq!(table.columns()[0].data_type, "BIGINT");
    }

    #[tokio::test]
    async fn test_missing_table_line_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_definition(&dir, "not a definition\n").await;
        let err = read_definition_file(&DiskLocalStore, &path).await.unwrap_err();
        assert!(is_fatal(&err));
        assert!(err.to_string().contains("Definition for table"));
    }

    #[tokio::test]
    async fn test_column_count_before_table_line_is_fatal() {
        let dir = TempDir::new().unwrap();
        let content = format!("Columns: 1\n{}\n", column_line("id", 4));
        let path = write_definition(&dir, &content).await;
        let err = read_definition_file(&DiskLocalStore, &path).await.unwrap_err();
        assert!(is_fatal(&err));
        assert!(err.to_string().contains("before"));
    }

    #[tokio::test]
    async fn test_missing_column_count_line_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_definition(&dir, "Definition for table s.t\n").await;
        let err = read_definition_file(&DiskLocalStore, &path).await.unwrap_err();
        assert!(is_fatal(&err));
        assert!(err.to_string().contains("Columns"));
    }

    #[tokio::test]
    async fn test_truncated_column_list_is_fatal() {
        let dir = TempDir::new().unwrap();
        let content = format!(
            "Definition for table s.t\nColumns: 2\n{}\n",
            column_line("only", 4)
        );
        let path = write_definition(&dir, &content).await;
        let err = read_definition_file(&DiskLocalStore, &path).await.unwrap_err();
        assert!(is_fatal(&err));
        assert!(err.to_string().contains("declares 2 columns"));
    }

    #[tokio::test]
    async fn test_short_column_line_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path =
            write_definition(&dir, "Definition for table s.t\nColumns: 1\nid 4\n").await;
        let err = read_definition_file(&DiskLocalStore, &path).await.unwrap_err();
        assert!(is_fatal(&err));
    }
}
