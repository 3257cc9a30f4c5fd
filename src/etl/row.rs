//! Row and column data model
//!
//! A [`Row`] is an ordered, name-unique list of [`Column`]s. Rows are plain
//! values: cloning a row clones every column, so joins and the diff engine
//! can buffer as many rows as they need without aliasing.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Scalar cell value
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Date(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for null and for text that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Equality where null and the empty string are the same value
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Text(s)) | (Value::Text(s), Value::Null) => s.is_empty(),
            (a, b) => a == b,
        }
    }

    /// Convert a JSON scalar. Booleans become text, nested values their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Text(b.to_string()),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Number(n) if is_integral(*n) => serde_json::Value::from(*n as i64),
            Value::Number(n) => serde_json::Value::from(*n),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15
}

/// String rendering; null renders as the empty string
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) if is_integral(*n) => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_default()
    }
}

/// Role of a column within a row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Coordinate,
    Value,
    Function,
    Level,
    Attribute,
    Alias,
    Annex,
}

/// Aggregation applied when a level column is consolidated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    #[default]
    Sum,
    Average,
    Min,
    Max,
    Count,
}

/// A named, typed cell
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    value: Value,
    weight: f64,
    aggregate: AggregateFunction,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::default(),
            value: Value::Null,
            weight: 1.0,
            aggregate: AggregateFunction::default(),
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut column = Self::new(name);
        column.value = value.into();
        column
    }

    /// A level column consolidating into its parent with `weight`
    pub fn level(name: impl Into<String>, weight: f64) -> Self {
        Self::new(name).of_type(ColumnType::Level).with_weight(weight)
    }

    pub fn of_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateFunction) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    pub fn value_as_string(&self) -> String {
        self.value.to_string()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn aggregate(&self) -> AggregateFunction {
        self.aggregate
    }
}

/// Ordered, name-unique set of columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<Column>,
    lookup: HashMap<String, usize>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row of plain columns from `(name, value)` pairs
    pub fn from_pairs<N, V, I>(pairs: I) -> Self
    where
        N: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (N, V)>,
    {
        let mut row = Row::new();
        for (name, value) in pairs {
            row.add_column(Column::with_value(name, value));
        }
        row
    }

    /// Append a column. A column whose name is already taken is rejected.
    pub fn add_column(&mut self, column: Column) -> bool {
        if self.lookup.contains_key(column.name()) {
            return false;
        }
        self.lookup.insert(column.name().to_string(), self.columns.len());
        self.columns.push(column);
        true
    }

    /// Append copies of all columns of `other` whose names are still free
    pub fn add_columns(&mut self, other: &Row) {
        for column in other.columns() {
            self.add_column(column.clone());
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let index = self.lookup.remove(name)?;
        let removed = self.columns.remove(index);
        for position in self.lookup.values_mut() {
            if *position > index {
                *position -= 1;
            }
        }
        Some(removed)
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.lookup.get(name).map(|&i| &self.columns[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Column> {
        let index = *self.lookup.get(name)?;
        self.columns.get_mut(index)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(Column::value)
    }

    /// Set the value of column `name`. Returns false when there is no such column.
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.get_mut(name) {
            Some(column) => {
                column.set_value(value);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.columns.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn value_strings(&self) -> Vec<String> {
        self.columns.iter().map(Column::value_as_string).collect()
    }

    /// Copy of this row with every value set to null
    pub fn blank(&self) -> Row {
        let mut row = self.clone();
        row.clear_values();
        row
    }

    pub fn clear_values(&mut self) {
        for column in &mut self.columns {
            column.value = Value::Null;
        }
    }

    /// Comma separated value list, used when reporting a rejected row
    pub fn display_values(&self) -> String {
        self.value_strings().join(",")
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .map(|c| (c.name().to_string(), c.value().to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}
