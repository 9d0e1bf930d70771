//! Table and column model.
//!
//! Descriptors capture the shape of the target and staging tables and feed
//! the SQL builder. They start from a schema-definition file exported by the
//! source system and are then reshaped by operator overrides.

mod definition;
mod descriptor;

pub use definition::read_definition_file;
pub use descriptor::{
    ColumnDescriptor, ColumnOverride, ColumnRole, PartitionColumnSpec, TableDescriptor, TableKind,
};
