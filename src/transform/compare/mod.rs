//! Pairwise comparison of several sources
//!
//! For sources `s0..sn` every pair `(si, sj)` with `i < j` is compared, in
//! that order, and the resulting [`DiffRecord`]s are concatenated into one
//! stream. One compared row pair may differ in several columns, so records
//! are buffered and drained before more input is pulled.
//!
//! Two strategies exist:
//! - line mode zips both sides row by row
//! - key mode preloads the target side by a key column and looks up each
//!   source row in it

mod key;
mod line;

use crate::error::{EtlError, Result};
use crate::etl::{Column, ComponentId, Processor, Row, RowSource, Value};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use key::KeyCompare;
use line::LineCompare;

/// Marks a column that is absent on the other side
pub const MISSING: &str = "#missing";
/// Marks a key-mode key that occurs more than once in the target
pub const DUPLICATE_KEY: &str = "#duplicateKey";

/// Opens a fresh stream over one source; called once per pair the source
/// takes part in
pub type SourceFactory = Box<dyn FnMut() -> Result<Processor>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// Compare rows by position
    #[default]
    Line,
    /// Compare rows by the value of one key column
    Key,
}

/// Which name identifies the table a compared row comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reference {
    /// The name of the source as configured, also for chained sources
    #[default]
    Source,
    /// The table each row was actually read from
    Origin,
}

impl Reference {
    fn table_name(&self, processor: &Processor) -> String {
        match self {
            Reference::Source => processor.name().to_string(),
            Reference::Origin => processor.origin().to_string(),
        }
    }
}

fn default_key_column() -> usize {
    1
}

/// Comparison options
///
/// # Example
/// ```
/// use etl_transforms::transform::compare::{CompareConfig, CompareMode, Reference};
///
/// let config: CompareConfig = serde_yaml::from_str("mode: key\nkey_column: 2\n").unwrap();
/// assert_eq!(config.mode, CompareMode::Key);
/// assert_eq!(config.key_column, 2);
/// assert!(!config.subheaders);
/// assert_eq!(config.reference, Reference::Source);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareConfig {
    #[serde(default)]
    pub mode: CompareMode,
    /// 1-based position of the key column in key mode
    #[serde(default = "default_key_column")]
    pub key_column: usize,
    /// Only log columns present on one side, don't report them as records
    #[serde(default)]
    pub ignore_missing_columns: bool,
    /// Emit a header record whenever the compared table pair changes
    #[serde(default)]
    pub subheaders: bool,
    /// Report and partition chained sources by their own name or by the
    /// table of each row
    #[serde(default)]
    pub reference: Reference,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            mode: CompareMode::default(),
            key_column: default_key_column(),
            ignore_missing_columns: false,
            subheaders: false,
            reference: Reference::default(),
        }
    }
}

impl CompareConfig {
    pub fn key(key_column: usize) -> Self {
        Self {
            mode: CompareMode::Key,
            key_column,
            ..Self::default()
        }
    }
}

/// One difference between a source and a target
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRecord {
    pub row_number: Option<usize>,
    pub timestamp: NaiveDateTime,
    pub source_table: String,
    pub target_table: String,
    pub source_column: Option<String>,
    pub target_column: Option<String>,
    pub source_value: Value,
    pub target_value: Value,
    pub source_key: Option<Value>,
    pub target_key: Option<Value>,
}

impl DiffRecord {
    fn new(timestamp: NaiveDateTime, source_table: &str, target_table: &str) -> Self {
        Self {
            row_number: None,
            timestamp,
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            source_column: None,
            target_column: None,
            source_value: Value::Null,
            target_value: Value::Null,
            source_key: None,
            target_key: None,
        }
    }

    /// Output columns; key mode adds `sourceKey` and `targetKey`
    pub fn schema(mode: CompareMode) -> Row {
        let mut row = Row::new();
        for name in [
            "rowNumber",
            "timestamp",
            "sourceTable",
            "targetTable",
            "sourceColumn",
            "targetColumn",
            "sourceValue",
            "targetValue",
        ] {
            row.add_column(Column::new(name));
        }
        if mode == CompareMode::Key {
            row.add_column(Column::new("sourceKey"));
            row.add_column(Column::new("targetKey"));
        }
        row
    }

    pub fn to_row(&self, mode: CompareMode) -> Row {
        let mut row = Self::schema(mode);
        row.set_value("rowNumber", self.row_number);
        row.set_value("timestamp", self.timestamp);
        row.set_value("sourceTable", self.source_table.as_str());
        row.set_value("targetTable", self.target_table.as_str());
        row.set_value("sourceColumn", self.source_column.clone());
        row.set_value("targetColumn", self.target_column.clone());
        row.set_value("sourceValue", self.source_value.clone());
        row.set_value("targetValue", self.target_value.clone());
        if mode == CompareMode::Key {
            row.set_value("sourceKey", self.source_key.clone());
            row.set_value("targetKey", self.target_key.clone());
        }
        row
    }

    /// True for subheader records, which only carry the table names
    pub fn is_header(&self) -> bool {
        self.row_number.is_none() && self.source_column.is_none() && self.target_column.is_none()
    }
}

/// Which side of a pair a one-sided row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

/// Record buffer shared by the strategies of one engine
struct Output {
    timestamp: NaiveDateTime,
    ignore_missing_columns: bool,
    subheaders: bool,
    buffer: VecDeque<DiffRecord>,
    last_tables: Option<(String, String)>,
    warned: HashSet<String>,
}

impl Output {
    fn record(&self, source_table: &str, target_table: &str) -> DiffRecord {
        DiffRecord::new(self.timestamp, source_table, target_table)
    }

    fn push(&mut self, record: DiffRecord) {
        let tables = (record.source_table.clone(), record.target_table.clone());
        if self.last_tables.as_ref() != Some(&tables) {
            if self.subheaders {
                let header = self.record(&tables.0, &tables.1);
                self.buffer.push_back(header);
            }
            self.last_tables = Some(tables);
        }
        self.buffer.push_back(record);
    }

    fn warn_structure(&mut self, source_table: &str, target_table: &str, column: &str, present_in: &str) {
        if self.warned.insert(column.to_string()) {
            log::warn!(
                "Sources {} and {} are structurally different: Column {} is only present in {}.",
                source_table,
                target_table,
                column,
                present_in
            );
        }
    }

    /// Compare same-named columns of two rows
    fn compare_rows(
        &mut self,
        tables: (&str, &str),
        source: &Row,
        target: &Row,
        row_number: usize,
        key: Option<&Value>,
    ) {
        let (source_table, target_table) = tables;
        let keyed = |mut record: DiffRecord| {
            record.row_number = Some(row_number);
            record.source_key = key.cloned();
            record.target_key = key.cloned();
            record
        };

        for sc in source.iter() {
            match target.get(sc.name()) {
                Some(tc) => {
                    if !sc.value().same_as(tc.value()) {
                        let mut record = self.record(source_table, target_table);
                        record.source_column = Some(sc.name().to_string());
                        record.target_column = Some(tc.name().to_string());
                        record.source_value = sc.value().clone();
                        record.target_value = tc.value().clone();
                        self.push(keyed(record));
                    }
                }
                None if !sc.is_null() => {
                    self.warn_structure(source_table, target_table, sc.name(), source_table);
                    if !self.ignore_missing_columns {
                        let mut record = self.record(source_table, target_table);
                        record.source_column = Some(sc.name().to_string());
                        record.target_column = Some(MISSING.to_string());
                        record.source_value = sc.value().clone();
                        self.push(keyed(record));
                    }
                }
                None => {}
            }
        }

        for tc in target.iter() {
            if source.contains(tc.name()) || tc.is_null() {
                continue;
            }
            self.warn_structure(source_table, target_table, tc.name(), target_table);
            if !self.ignore_missing_columns {
                let mut record = self.record(source_table, target_table);
                record.source_column = Some(MISSING.to_string());
                record.target_column = Some(tc.name().to_string());
                record.target_value = tc.value().clone();
                self.push(keyed(record));
            }
        }
    }

    /// Report every non-null column of a row the other side has no row for
    fn extra_row(&mut self, tables: (&str, &str), side: Side, row: &Row, row_number: usize) {
        for column in row.iter().filter(|c| !c.is_null()) {
            let mut record = self.record(tables.0, tables.1);
            record.row_number = Some(row_number);
            match side {
                Side::Source => {
                    record.source_column = Some(column.name().to_string());
                    record.source_value = column.value().clone();
                    record.target_column = Some(MISSING.to_string());
                }
                Side::Target => {
                    record.source_column = Some(MISSING.to_string());
                    record.target_column = Some(column.name().to_string());
                    record.target_value = column.value().clone();
                }
            }
            self.push(record);
        }
    }
}

/// Strategy comparing one source/target pair
trait PairCompare {
    /// Pull the next input and buffer its records. `false` once the pair is
    /// exhausted.
    fn step(&mut self, out: &mut Output) -> Result<bool>;

    fn close(&mut self);
}

/// Diff of several sources as a row stream
///
/// # Example
/// ```
/// use etl_transforms::etl::Processor;
/// use etl_transforms::row;
/// use etl_transforms::transform::compare::{CompareConfig, DiffEngine, SourceFactory};
/// use etl_transforms::etl::ComponentId;
///
/// let sources: Vec<SourceFactory> = vec![
///     Box::new(|| Ok(Processor::memory("a", vec![row! {"id" => 1, "v" => "x"}]))),
///     Box::new(|| Ok(Processor::memory("b", vec![row! {"id" => 1, "v" => "y"}]))),
/// ];
/// let engine = DiffEngine::new(ComponentId::new("cmp"), CompareConfig::default(), sources).unwrap();
/// let mut p = engine.into_processor("cmp");
/// let diff = p.next().unwrap().unwrap();
/// assert_eq!(diff.value("sourceColumn").unwrap().to_string(), "v");
/// assert!(p.next().unwrap().is_none());
/// ```
pub struct DiffEngine {
    component: ComponentId,
    config: CompareConfig,
    sources: Vec<SourceFactory>,
    pairs: VecDeque<(usize, usize)>,
    current: Option<Box<dyn PairCompare>>,
    out: Output,
    schema: Row,
}

impl DiffEngine {
    /// # Errors
    /// Fails with fewer than two sources or a key column position of 0
    pub fn new(component: ComponentId, config: CompareConfig, sources: Vec<SourceFactory>) -> Result<Self> {
        if sources.len() < 2 {
            return Err(EtlError::NotEnoughSources {
                component: component.to_string(),
                found: sources.len(),
            });
        }
        if config.mode == CompareMode::Key && config.key_column == 0 {
            return Err(EtlError::config(
                component.as_str(),
                "key column positions start at 1",
            ));
        }
        let n = sources.len();
        let pairs = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect();
        let out = Output {
            timestamp: Local::now().naive_local(),
            ignore_missing_columns: config.ignore_missing_columns,
            subheaders: config.subheaders,
            buffer: VecDeque::new(),
            last_tables: None,
            warned: HashSet::new(),
        };
        Ok(Self {
            component,
            schema: DiffRecord::schema(config.mode),
            config,
            sources,
            pairs,
            current: None,
            out,
        })
    }

    pub fn into_processor(self, name: impl Into<String>) -> Processor {
        let owner = self.component.clone();
        Processor::new(name, self).with_owner(owner)
    }

    fn open_pair(&mut self, source: usize, target: usize) -> Result<Box<dyn PairCompare>> {
        let source = (self.sources[source])()?.with_owner(self.component.clone());
        let target = (self.sources[target])()?.with_owner(self.component.clone());
        log::debug!(
            "Comparing {} with {} in {}",
            source.name(),
            target.name(),
            self.component
        );
        self.out.warned.clear();
        Ok(match self.config.mode {
            CompareMode::Line => Box::new(LineCompare::new(source, target, self.config.reference)),
            CompareMode::Key => Box::new(KeyCompare::new(
                self.component.clone(),
                source,
                target,
                self.config.key_column - 1,
                self.config.reference,
            )),
        })
    }
}

impl RowSource for DiffEngine {
    fn schema(&self) -> &Row {
        &self.schema
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(record) = self.out.buffer.pop_front() {
                return Ok(Some(record.to_row(self.config.mode)));
            }
            let mut current = match self.current.take() {
                Some(current) => current,
                None => match self.pairs.pop_front() {
                    Some((source, target)) => self.open_pair(source, target)?,
                    None => return Ok(None),
                },
            };
            if current.step(&mut self.out)? {
                self.current = Some(current);
            } else {
                current.close();
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        self.pairs.clear();
        self.out.buffer.clear();
    }
}
