//! Lazy, pull-based row stream
//!
//! A [`Processor`] wraps a [`RowSource`] and adds the lifecycle every stage
//! of a pipeline shares: `uninitialized -> initialized -> exhausted/closed`,
//! an optional row limit, a chain of row filters and the row count.
//!
//! Each call to [`Processor::next`] returns a fresh, independent [`Row`].
//! Callers that need to keep a row across calls simply keep it; nothing is
//! mutated behind their back.

use super::extract::{MemorySource, RowSource};
use super::{Row, RowFilter};
use crate::error::{EtlError, Result};
use std::fmt;

/// Structural role of a processor within a pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Facet {
    /// Plain extraction or transform output
    #[default]
    Input,
    /// Result stream of a relational engine connection
    Connection,
    /// Output of a tree build
    Tree,
}

/// Opaque identity of the component a processor works for.
/// Informational only; used in log lines and error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Initialized,
    Exhausted,
    Closed,
}

/// Lazy row iterator with a stable schema
///
/// Not reentrant: one consumer drives it, one call at a time.
///
/// # Example
/// ```
/// use etl_transforms::etl::Processor;
/// use etl_transforms::row;
///
/// let mut p = Processor::memory("numbers", vec![row! {"n" => 1}, row! {"n" => 2}]);
/// p.set_last_row(1);
/// assert_eq!(p.current().unwrap().names(), vec!["n"]);
/// assert!(p.next().unwrap().is_some());
/// assert!(p.next().unwrap().is_none());
/// ```
pub struct Processor {
    name: String,
    owner: Option<ComponentId>,
    facet: Facet,
    source: Box<dyn RowSource>,
    current: Row,
    state: State,
    last_row: usize,
    rows_accepted: usize,
    filters: Vec<RowFilter>,
}

impl Processor {
    pub fn new(name: impl Into<String>, source: impl RowSource + 'static) -> Self {
        Self::boxed(name, Box::new(source))
    }

    pub fn boxed(name: impl Into<String>, source: Box<dyn RowSource>) -> Self {
        let current = source.schema().blank();
        Self {
            name: name.into(),
            owner: None,
            facet: Facet::default(),
            source,
            current,
            state: State::Uninitialized,
            last_row: 0,
            rows_accepted: 0,
            filters: Vec::new(),
        }
    }

    /// Processor over in-memory rows; the first row defines the schema
    pub fn memory(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self::new(name, MemorySource::from_rows(rows))
    }

    pub fn with_owner(mut self, owner: ComponentId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_facet(mut self, facet: Facet) -> Self {
        self.facet = facet;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<&ComponentId> {
        self.owner.as_ref()
    }

    pub fn facet(&self) -> Facet {
        self.facet
    }

    /// Table the most recently produced row came from
    pub fn origin(&self) -> &str {
        self.source.origin().unwrap_or(&self.name)
    }

    /// Schema as advertised by the source, without initializing it
    pub fn schema(&self) -> &Row {
        self.source.schema()
    }

    pub fn rows_accepted(&self) -> usize {
        self.rows_accepted
    }

    pub fn is_initialized(&self) -> bool {
        self.state != State::Uninitialized
    }

    /// True after an explicit [`close`](Self::close)
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// True once no more rows will be produced
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Exhausted | State::Closed)
    }

    /// Bound the number of rows this processor yields. 0 means unbounded.
    pub fn set_last_row(&mut self, last_row: usize) {
        self.last_row = last_row;
    }

    /// Chain a filter; rows must pass every added filter
    pub fn add_filter(&mut self, filter: RowFilter) {
        if !filter.is_empty() {
            self.filters.push(filter);
        }
    }

    /// Run the source's eager setup. Idempotent.
    ///
    /// # Errors
    /// Propagates the source's setup error; the processor stays
    /// uninitialized in that case.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state == State::Uninitialized {
            log::debug!("Initializing processor {}", self.display_name());
            self.source.init()?;
            self.current = self.source.schema().blank();
            self.state = State::Initialized;
        }
        Ok(())
    }

    /// Schema row; holds the values of the last produced row once rows flow
    pub fn current(&mut self) -> Result<&Row> {
        self.initialize()?;
        Ok(&self.current)
    }

    /// Advance and return the next row, or `None` at end of stream
    ///
    /// # Errors
    /// Fails with [`EtlError::StreamClosed`] after [`close`](Self::close),
    /// and propagates any error raised by the source.
    pub fn next(&mut self) -> Result<Option<Row>> {
        match self.state {
            State::Closed => return Err(EtlError::StreamClosed(self.name.clone())),
            State::Exhausted => return Ok(None),
            State::Uninitialized => self.initialize()?,
            State::Initialized => {}
        }
        loop {
            if self.last_row > 0 && self.rows_accepted >= self.last_row {
                self.finish();
                return Ok(None);
            }
            match self.source.fetch() {
                Ok(Some(row)) => {
                    if !self.filters.iter().all(|f| f.accepts(&row)) {
                        continue;
                    }
                    self.rows_accepted += 1;
                    self.current.clone_from(&row);
                    return Ok(Some(row));
                }
                Ok(None) => {
                    self.finish();
                    return Ok(None);
                }
                Err(e) => {
                    log::debug!("Can't get next row in source {}: {}", self.display_name(), e);
                    return Err(e);
                }
            }
        }
    }

    /// Drain all remaining rows
    pub fn collect_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Release buffers and close every nested processor
    pub fn close(&mut self) {
        if matches!(self.state, State::Uninitialized | State::Initialized) {
            self.source.release();
        }
        self.state = State::Closed;
    }

    fn finish(&mut self) {
        let text = format!(
            "Lines read from {}: {}",
            self.display_name(),
            self.rows_accepted
        );
        match self.facet {
            Facet::Input => log::info!("{}", text),
            _ => log::debug!("{}", text),
        }
        self.source.release();
        self.state = State::Exhausted;
    }

    fn display_name(&self) -> String {
        match &self.owner {
            Some(owner) if owner.as_str() != self.name => format!("{} ({})", self.name, owner),
            _ => self.name.clone(),
        }
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("facet", &self.facet)
            .field("state", &self.state)
            .field("rows_accepted", &self.rows_accepted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::{FilterOperator, TrackedSource, Value};
    use crate::row;

    fn numbers(n: i64) -> Processor {
        Processor::memory("numbers", (1..=n).map(|i| row! {"n" => i}).collect())
    }

    #[test]
    fn test_current_before_next_is_blank_schema() {
        let mut p = numbers(2);
        let current = p.current().unwrap();
        assert_eq!(current.names(), vec!["n"]);
        assert!(current.value("n").unwrap().is_null());
    }

    #[test]
    fn test_current_tracks_last_row() {
        let mut p = numbers(2);
        p.next().unwrap();
        assert_eq!(p.current().unwrap().value("n"), Some(&Value::from(1)));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let source = TrackedSource::new(vec![row! {"a" => 1}, row! {"a" => 2}]);
        let inits = source.inits.clone();
        let mut p = Processor::new("tracked", source);
        p.initialize().unwrap();
        p.initialize().unwrap();
        p.next().unwrap();
        assert_eq!(inits.get(), 1);
        assert!(p.is_initialized());
    }

    #[test]
    fn test_last_row_bounds_output() {
        let mut p = numbers(5);
        p.set_last_row(3);
        assert_eq!(p.collect_rows().unwrap().len(), 3);
        assert_eq!(p.rows_accepted(), 3);
    }

    #[test]
    fn test_zero_last_row_is_unbounded() {
        let mut p = numbers(5);
        p.set_last_row(0);
        assert_eq!(p.collect_rows().unwrap().len(), 5);
    }

    #[test]
    fn test_filtered_rows_are_skipped() {
        let mut p = numbers(4);
        p.add_filter(
            RowFilter::new()
                .deny("n", FilterOperator::Equal { value: "2".into() })
                .unwrap(),
        );
        let rows = p.collect_rows().unwrap();
        let values: Vec<String> = rows.iter().map(|r| r.value("n").unwrap().to_string()).collect();
        assert_eq!(values, vec!["1", "3", "4"]);
    }

    #[test]
    fn test_exhausted_keeps_returning_none() {
        let mut p = numbers(1);
        assert!(p.next().unwrap().is_some());
        assert!(p.next().unwrap().is_none());
        assert!(p.next().unwrap().is_none());
        assert!(p.is_finished());
        assert!(!p.is_closed());
    }

    #[test]
    fn test_next_after_close_fails() {
        let mut p = numbers(3);
        p.next().unwrap();
        p.close();
        assert!(matches!(p.next(), Err(EtlError::StreamClosed(name)) if name == "numbers"));
    }

    #[test]
    fn test_close_releases_source() {
        let source = TrackedSource::new(vec![row! {"a" => 1}, row! {"a" => 2}]);
        let released = source.released.clone();
        let mut p = Processor::new("tracked", source);
        p.next().unwrap();
        p.close();
        assert!(released.get());
    }
}
