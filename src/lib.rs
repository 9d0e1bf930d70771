// Public API - the loader module is the primary entry point
pub mod loader;

// Internal modules - organized by subsystem
pub mod batch;
pub mod config;
pub mod control;
pub mod error;
pub mod schema;
pub mod sql;
pub mod store;
