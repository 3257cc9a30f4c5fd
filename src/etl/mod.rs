//! Core row-processing abstractions
//!
//! This module provides the row data model, the lazy [`Processor`] stream
//! every transform is built on, row filters, and the [`Loader`]/[`Pipeline`]
//! pair that drains a processor into a destination.

mod extract;
mod filter;
mod load;
mod pipeline;
mod processor;
mod row;

pub use extract::{MemorySource, RowSource, UnionSource};
#[cfg(test)]
pub(crate) use extract::TrackedSource;
pub use filter::{FilterConfig, FilterMode, FilterOperator, RowFilter};
pub use load::Loader;
pub use pipeline::Pipeline;
pub use processor::{ComponentId, Facet, Processor};
pub use row::{AggregateFunction, Column, ColumnType, Row, Value};

/// Build a [`Row`] of plain columns
///
/// # Example
/// ```
/// use etl_transforms::row;
///
/// let row = row! {"id" => 1, "name" => "Bob"};
/// assert_eq!(row.names(), vec!["id", "name"]);
/// ```
#[macro_export]
macro_rules! row {
    ($($name:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut row = $crate::etl::Row::new();
        $( row.add_column($crate::etl::Column::with_value($name, $value)); )*
        row
    }};
}
