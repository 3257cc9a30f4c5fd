//! ETL Transforms
//!
//! Lazy row-processing transforms: hash and SQL joins, consolidation
//! hierarchies and multi-source diffs, driven from YAML job files.

pub mod config;
pub mod error;
pub mod etl;
pub mod storage;
pub mod transform;

// Re-exports for convenience
pub use config::JobConfig;
pub use error::{EtlError, Result};
pub use etl::{Column, Loader, Pipeline, Processor, Row, RowSource, Value};
pub use storage::{NdjsonSource, NdjsonWriter, SqliteEngine};
