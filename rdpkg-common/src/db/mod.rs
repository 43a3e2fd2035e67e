//! Package database: creation, layer schemas, additive steps

pub mod init;
pub mod layers;
pub mod migrations;
pub mod schema_sync;

pub use init::{create_package, open_package};
pub use layers::{create_layer, layer_table};
pub use migrations::{run_step, MigrationStep, StepOutcome};
pub use schema_sync::{ColumnDefinition, SchemaIntrospector, SchemaSync, TableDefinition};
