//! Transform implementations
//!
//! Every transform is a [`RowSource`](crate::etl::RowSource) that pulls from
//! the processors it owns, so transforms nest freely:
//! - [`join`]: hash join and SQL-delegated join of two processors
//! - [`tree`]: consolidation hierarchy built from level columns
//! - [`compare`]: pairwise diff of several sources

pub mod compare;
pub mod join;
pub mod tree;

pub use compare::{CompareConfig, CompareMode, DiffEngine, DiffRecord, Reference};
pub use join::{Join, JoinDefinition, JoinKind};
pub use tree::{MemoryTreeManager, TreeBuilder, TreeConfig, TreeManager, TreeProcessor};
