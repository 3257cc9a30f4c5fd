//! File and database storage
//!
//! This module handles the I/O ends of a job:
//! - NDJSON file reading/writing
//! - SQLite as the relational engine behind SQL joins

mod ndjson;
mod sqlite;

pub use ndjson::{NdjsonSource, NdjsonWriter};
pub use sqlite::SqliteEngine;
