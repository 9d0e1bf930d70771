use anyhow::Result;
use serde::Deserialize;

use crate::error::FatalError;

/// How a column participates in the target table. Dispatch on the role keeps
/// regular and partitioning columns in one type while DDL and SELECT
/// generation treat them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Regular,
    Partitioning,
}

/// Whether a descriptor describes the final table or its external staging
/// counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Target,
    Staging,
}

/// Suffix appended to the target table name to derive the staging table.
pub const STAGING_TABLE_SUFFIX: &str = "_staging";

/// Data type every staging column is declared with; the staging table reads
/// raw text extracts, so typing happens at insert time.
pub const STAGING_COLUMN_TYPE: &str = "STRING";

/// One column of a table: its declared type for DDL and the expression that
/// projects it in the staging-to-target SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub expression: Option<String>,
    pub role: ColumnRole,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        let data_type = data_type.into();
        let expression = Some(cast_expression(&name, &data_type));
        ColumnDescriptor {
            name,
            data_type,
            expression,
            role: ColumnRole::Regular,
        }
    }

    pub fn with_expression(
        name: impl Into<String>,
        data_type: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        ColumnDescriptor {
            name: name.into(),
            data_type: data_type.into(),
            expression: Some(expression.into()),
            role: ColumnRole::Regular,
        }
    }

    pub fn partitioning(
        name: impl Into<String>,
        data_type: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        ColumnDescriptor {
            name: name.into(),
            data_type: data_type.into(),
            expression: Some(expression.into()),
            role: ColumnRole::Partitioning,
        }
    }

    /// Expression projecting this column in the insert SELECT; falls back to
    /// the bare column name when none was derived.
    pub fn select_expression(&self) -> &str {
        self.expression.as_deref().unwrap_or(&self.name)
    }

    /// Apply an operator override.
    ///
    /// An explicit expression override replaces the expression outright. A
    /// type-only override regenerates the cast against the pre-override
    /// column name, since that is the name the staging table carries. A pure
    /// rename leaves the expression untouched.
    pub fn apply_custom(&mut self, custom: &ColumnOverride) {
        if let Some(expression) = &custom.expression {
            self.expression = Some(expression.clone());
        } else if let Some(data_type) = &custom.data_type {
            self.expression = Some(cast_expression(&self.name, data_type));
        }

        if let Some(data_type) = &custom.data_type {
            self.data_type = data_type.clone();
        }
        if let Some(name) = &custom.name {
            self.name = name.clone();
        }
    }
}

pub fn cast_expression(name: &str, data_type: &str) -> String {
    format!("cast({name} as {data_type})")
}

/// Operator override for one target column, keyed by the source column name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnOverride {
    /// Source column this override applies to. If no such column exists, the
    /// override defines a brand-new column and must carry both a data type
    /// and an expression.
    pub column: String,
    pub name: Option<String>,
    pub data_type: Option<String>,
    pub expression: Option<String>,
}

/// Operator-defined partition column. All three fields are mandatory since
/// partition values can only come from an expression over staged data.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionColumnSpec {
    pub name: String,
    pub data_type: String,
    pub expression: String,
}

/// Shape of one table: identity, regular columns and partitioning columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub schema_name: String,
    pub table_name: String,
    pub kind: TableKind,
    columns: Vec<ColumnDescriptor>,
    partition_columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        kind: TableKind,
    ) -> Self {
        TableDescriptor {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            kind,
            columns: Vec::new(),
            partition_columns: Vec::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn partition_columns(&self) -> &[ColumnDescriptor] {
        &self.partition_columns
    }

    /// Append a column, routing on its role.
    pub fn add_column(&mut self, column: ColumnDescriptor) {
        match column.role {
            ColumnRole::Regular => self.columns.push(column),
            ColumnRole::Partitioning => self.partition_columns.push(column),
        }
    }

    /// Rename the table identity; `None` keeps the current part.
    pub fn rename(&mut self, schema: Option<&str>, table: Option<&str>) {
        if let Some(schema) = schema {
            self.schema_name = schema.to_string();
        }
        if let Some(table) = table {
            self.table_name = table.to_string();
        }
    }

    /// Apply operator column overrides.
    ///
    /// Overrides matching an existing column mutate it in place. Overrides
    /// for a column that does not exist add a new one, provided they fully
    /// specify it.
    pub fn apply_overrides(&mut self, overrides: &[ColumnOverride]) -> Result<()> {
        for custom in overrides {
            if let Some(column) = self.columns.iter_mut().find(|c| c.name == custom.column) {
                column.apply_custom(custom);
                continue;
            }

            let (Some(data_type), Some(expression)) = (&custom.data_type, &custom.expression)
            else {
                return Err(FatalError::config(format!(
                    "column override '{}' matches no column of {}; a new column needs \
                     both a data type and an expression",
                    custom.column,
                    self.qualified_name()
                )));
            };
            let name = custom.name.as_deref().unwrap_or(&custom.column);
            self.columns.push(ColumnDescriptor::with_expression(
                name,
                data_type.clone(),
                expression.clone(),
            ));
        }
        Ok(())
    }

    pub fn add_partition_columns(&mut self, specs: &[PartitionColumnSpec]) {
        for spec in specs {
            self.add_column(ColumnDescriptor::partitioning(
                &spec.name,
                &spec.data_type,
                &spec.expression,
            ));
        }
    }

    /// Derive the staging counterpart: same columns retyped as text with no
    /// expressions, no partitioning, and the staging name suffix.
    pub fn staging_definition(&self) -> TableDescriptor {
        let mut staging = TableDescriptor::new(
            self.schema_name.clone(),
            format!("{}{}", self.table_name, STAGING_TABLE_SUFFIX),
            TableKind::Staging,
        );
        for column in &self.columns {
            staging.columns.push(ColumnDescriptor {
                name: column.name.clone(),
                data_type: STAGING_COLUMN_TYPE.to_string(),
                expression: None,
                role: ColumnRole::Regular,
            });
        }
        staging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn override_for(
        column: &str,
        name: Option<&str>,
        data_type: Option<&str>,
        expression: Option<&str>,
    ) -> ColumnOverride {
        ColumnOverride {
            column: column.to_string(),
            name: name.map(str::to_string),
            data_type: data_type.map(str::to_string),
            expression: expression.map(str::to_string),
        }
    }

    #[test]
    fn test_new_column_derives_cast_expression() {
        let column = ColumnDescriptor::new("c1", "INT");
        assert_eq!(column.select_expression(), "cast(c1 as INT)");
    }

    #[test]
    fn test_rename_keeps_expression() {
        let mut column = ColumnDescriptor::new("c1", "INT");
        column.apply_custom(&override_for("c1", Some("renamed"), None, None));
        assert_eq!(column.name, "renamed");
        assert_eq!(column.data_type, "INT");
        assert_eq!(column.select_expression(), "cast(c1 as INT)");
    }

    #[test]
    fn test_retype_regenerates_cast_with_old_name() {
        let mut column = ColumnDescriptor::new("c1", "INT");
        column.apply_custom(&override_for("c1", Some("renamed"), Some("BIGINT"), None));
        assert_eq!(column.name, "renamed");
        assert_eq!(column.data_type, "BIGINT");
        assert_eq!(column.select_expression(), "cast(c1 as BIGINT)");
    }

    #[test]
    fn test_explicit_expression_wins() {
        let mut column = ColumnDescriptor::new("c1", "INT");
        column.apply_custom(&override_for(
            "c1",
            None,
            Some("TIMESTAMP"),
            Some("to_timestamp(c1)"),
        ));
        assert_eq!(column.data_type, "TIMESTAMP");
        assert_eq!(column.select_expression(), "to_timestamp(c1)");
    }

    #[test]
    fn test_add_column_routes_on_role() {
        let mut table = TableDescriptor::new("s", "t", TableKind::Target);
        table.add_column(ColumnDescriptor::new("c1", "INT"));
        table.add_column(ColumnDescriptor::partitioning("p1", "BIGINT", "year(c1)"));

        assert_eq!(table.columns().len(), 1);
        assert_eq!(table.partition_columns().len(), 1);
        assert_eq!(table.partition_columns()[0].name, "p1");
    }

    #[test]
    fn test_apply_overrides_mutates_matching_column() {
        let mut table = TableDescriptor::new("s", "t", TableKind::Target);
        table.add_column(ColumnDescriptor::new("c1", "INT"));
        table
            .apply_overrides(&[override_for("c1", None, Some("BIGINT"), None)])
            .unwrap();
        assert_eq!(table.columns()[0].data_type, "BIGINT");
    }

    #[test]
    fn test_new_column_override_needs_type_and_expression() {
        let mut table = TableDescriptor::new("s", "t", TableKind::Target);
        table.add_column(ColumnDescriptor::new("c1", "INT"));

        let err = table
            .apply_overrides(&[override_for("c2", None, Some("INT"), None)])
            .unwrap_err();
        assert!(crate::error::is_fatal(&err));

        table
            .apply_overrides(&[override_for("c2", None, Some("INT"), Some("1"))])
            .unwrap();
        assert_eq!(table.columns().len(), 2);
        assert_eq!(table.columns()[1].name, "c2");
        assert_eq!(table.columns()[1].select_expression(), "1");
    }

    #[test]
    fn test_staging_definition() {
        let mut table = TableDescriptor::new("s", "t", TableKind::Target);
        table.add_column(ColumnDescriptor::new("c1", "INT"));
        table.add_column(ColumnDescriptor::new("c2", "BOOLEAN"));
        table.add_column(ColumnDescriptor::partitioning("p1", "BIGINT", "year(c1)"));

        let staging = table.staging_definition();
        assert_eq!(staging.qualified_name(), "s.t_staging");
        assert_eq!(staging.kind, TableKind::Staging);
        assert!(staging.partition_columns().is_empty());
        assert_eq!(staging.columns().len(), 2);
        for column in staging.columns() {
            assert_eq!(column.data_type, "STRING");
            assert_eq!(column.expression, None);
        }
        assert_eq!(staging.columns()[0].select_expression(), "c1");
    }
}
