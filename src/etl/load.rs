//! Loader trait for loading rows to destinations

use super::Row;
use eyre::Result;

/// Loader trait for loading rows to a destination
///
/// Implementors define how to load batches of rows to destinations:
/// - NDJSON files
/// - Relational tables
/// - OLAP cubes
///
/// `load` may be called many times for one pipeline run; each call receives
/// the next batch in stream order.
///
/// # Example
/// ```no_run
/// use etl_transforms::etl::{Loader, Row};
/// use eyre::Result;
///
/// struct CountingLoader;
///
/// impl Loader for CountingLoader {
///     async fn load(&self, rows: Vec<Row>) -> Result<usize> {
///         Ok(rows.len())
///     }
/// }
/// ```
pub trait Loader: Send + Sync {
    /// Load a batch of rows
    ///
    /// Returns the number of rows successfully loaded
    ///
    /// # Errors
    /// Returns an error if loading fails (I/O, validation, etc.)
    fn load(&self, rows: Vec<Row>) -> impl std::future::Future<Output = Result<usize>> + Send;
}
