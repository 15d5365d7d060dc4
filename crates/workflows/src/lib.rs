//! Workflow definitions
//!
//! The three warehouse workflows (quality monitoring, external table
//! registration, dbt orchestration) and the catalog the CLI serves them from.

#![warn(missing_docs)]

pub mod quality;
pub mod external_tables;
pub mod dbt;
pub mod catalog;

pub use quality::{check_states, quality_workflow, QUALITY_WORKFLOW};
pub use external_tables::{external_table_ddl, external_tables_workflow, EXTERNAL_TABLES_WORKFLOW};
pub use dbt::{dbt_workflow, DBT_WORKFLOW};
pub use catalog::{CatalogError, WorkflowCatalog, WorkflowSettings};
