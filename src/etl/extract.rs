//! Row sources: the producing side of a [`Processor`]
//!
//! A [`RowSource`] knows how to produce rows; the [`Processor`] wrapping it
//! owns the lifecycle (initialization, row limits, filters, closing). Every
//! transform in this crate is a `RowSource` that pulls from the processors
//! it owns.

use super::{Processor, Row};
use crate::error::Result;
use std::collections::VecDeque;

/// Producer of rows behind a [`Processor`]
///
/// # Example
/// ```
/// use etl_transforms::etl::{Processor, Row, RowSource};
/// use etl_transforms::Result;
///
/// struct Counter {
///     schema: Row,
///     next: i64,
///     until: i64,
/// }
///
/// impl RowSource for Counter {
///     fn schema(&self) -> &Row {
///         &self.schema
///     }
///
///     fn fetch(&mut self) -> Result<Option<Row>> {
///         if self.next > self.until {
///             return Ok(None);
///         }
///         let mut row = self.schema.clone();
///         row.set_value("n", self.next);
///         self.next += 1;
///         Ok(Some(row))
///     }
/// }
///
/// let schema = Row::from_pairs([("n", 0)]);
/// let mut p = Processor::new("counter", Counter { schema, next: 1, until: 3 });
/// assert_eq!(p.collect_rows().unwrap().len(), 3);
/// ```
pub trait RowSource {
    /// Eager setup, run once before the first row is fetched
    ///
    /// # Errors
    /// Returns an error if the source cannot be prepared (missing input,
    /// failing nested processor, engine failure, ...)
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Row describing the produced schema. Stable for the source's lifetime.
    fn schema(&self) -> &Row;

    /// Produce the next row, or `None` once exhausted
    fn fetch(&mut self) -> Result<Option<Row>>;

    /// Release buffers and close every processor this source pulls from
    fn release(&mut self) {}

    /// Name of the table the most recently fetched row came from, when it
    /// differs from the owning processor's name
    fn origin(&self) -> Option<&str> {
        None
    }
}

/// Rows held in memory
pub struct MemorySource {
    schema: Row,
    rows: VecDeque<Row>,
}

impl MemorySource {
    pub fn new(schema: Row, rows: Vec<Row>) -> Self {
        Self {
            schema: schema.blank(),
            rows: rows.into(),
        }
    }

    /// Use the first row's columns as schema
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let schema = rows.first().map(Row::blank).unwrap_or_default();
        Self::new(schema, rows)
    }
}

impl RowSource for MemorySource {
    fn schema(&self) -> &Row {
        &self.schema
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn release(&mut self) {
        self.rows.clear();
    }
}

/// Concatenation of several processors under one name
///
/// The schema is taken from the first input. Rows of later inputs are
/// mapped onto it by column name; columns they lack stay null.
pub struct UnionSource {
    inputs: Vec<Processor>,
    active: usize,
    schema: Row,
}

impl UnionSource {
    pub fn new(inputs: Vec<Processor>) -> Self {
        let schema = inputs
            .first()
            .map(|p| p.schema().blank())
            .unwrap_or_default();
        Self {
            inputs,
            active: 0,
            schema,
        }
    }

    fn conform(&self, row: Row) -> Row {
        let mut out = self.schema.clone();
        for column in row.iter() {
            out.set_value(column.name(), column.value().clone());
        }
        out
    }
}

impl RowSource for UnionSource {
    fn schema(&self) -> &Row {
        &self.schema
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        while let Some(input) = self.inputs.get_mut(self.active) {
            match input.next()? {
                Some(row) => return Ok(Some(self.conform(row))),
                None => self.active += 1,
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
    }

    fn origin(&self) -> Option<&str> {
        self.inputs.get(self.active).map(Processor::origin)
    }
}

/// Memory rows that count initializations and flag their release
#[cfg(test)]
pub(crate) struct TrackedSource {
    rows: MemorySource,
    pub(crate) inits: std::rc::Rc<std::cell::Cell<usize>>,
    pub(crate) released: std::rc::Rc<std::cell::Cell<bool>>,
}

#[cfg(test)]
impl TrackedSource {
    pub(crate) fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: MemorySource::from_rows(rows),
            inits: Default::default(),
            released: Default::default(),
        }
    }
}

#[cfg(test)]
impl RowSource for TrackedSource {
    fn init(&mut self) -> Result<()> {
        self.inits.set(self.inits.get() + 1);
        Ok(())
    }

    fn schema(&self) -> &Row {
        self.rows.schema()
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        self.rows.fetch()
    }

    fn release(&mut self) {
        self.released.set(true);
        self.rows.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::Value;
    use crate::row;

    #[test]
    fn test_memory_source_schema_from_first_row() {
        let source = MemorySource::from_rows(vec![row! {"id" => 1, "name" => "a"}]);
        assert_eq!(source.schema().names(), vec!["id", "name"]);
        assert!(source.schema().value("id").unwrap().is_null());
    }

    #[test]
    fn test_union_reports_origin() {
        let a = Processor::memory("a", vec![row! {"id" => 1}]);
        let b = Processor::memory("b", vec![row! {"id" => 2, "extra" => "x"}]);
        let mut union = UnionSource::new(vec![a, b]);

        let first = union.fetch().unwrap().unwrap();
        assert_eq!(first.value("id"), Some(&Value::from(1)));
        assert_eq!(union.origin(), Some("a"));

        let second = union.fetch().unwrap().unwrap();
        assert_eq!(second.value("id"), Some(&Value::from(2)));
        assert!(!second.contains("extra"));
        assert_eq!(union.origin(), Some("b"));

        assert!(union.fetch().unwrap().is_none());
    }
}
