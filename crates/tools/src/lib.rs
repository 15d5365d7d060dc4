//! Tool Integration
//!
//! Drive the external CLIs that do the real work: the warehouse CLI (`bq`)
//! for queries and appends, and the transformation CLI (`dbt`).

#![warn(missing_docs)]

pub mod r#trait;
pub mod command;
pub mod warehouse;
pub mod dbt;

pub use r#trait::{Tool, ToolExecutor, ToolInput, ToolOutput, ToolRegistry};
pub use command::CommandTool;
pub use warehouse::{BqWarehouse, Warehouse, WarehouseError};
pub use dbt::{DbtCommand, DbtProject};
