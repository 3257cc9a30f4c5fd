//! SQLite as relational engine for SQL joins

use crate::error::{EtlError, Result};
use crate::etl::{Column, Facet, MemorySource, Processor, Row, Value};
use crate::transform::join::{RelationalEngine, quote_name};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use std::path::Path;

const QUOTE: &str = "\"";

/// [`RelationalEngine`] over a SQLite connection
///
/// Every materialized processor lands in its own table; table names get a
/// numeric suffix so the same processor name can be loaded twice.
///
/// # Example
/// ```
/// use etl_transforms::etl::Processor;
/// use etl_transforms::row;
/// use etl_transforms::storage::SqliteEngine;
/// use etl_transforms::transform::join::RelationalEngine;
///
/// let mut engine = SqliteEngine::open_in_memory().unwrap();
/// let mut input = Processor::memory("numbers", vec![row! {"n" => 1}, row! {"n" => 2}]);
/// let table = engine.materialize("numbers", &mut input).unwrap();
/// let mut result = engine.run_query(&format!("select sum(n) as total from \"{table}\"")).unwrap();
/// assert_eq!(result.next().unwrap().unwrap().display_values(), "3");
/// ```
pub struct SqliteEngine {
    connection: Connection,
    tables: usize,
}

impl SqliteEngine {
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    /// Engine over a database file, created if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_connection(Connection::open(path)?))
    }

    pub fn with_connection(connection: Connection) -> Self {
        Self {
            connection,
            tables: 0,
        }
    }

    fn next_table_name(&mut self, name: &str) -> String {
        self.tables += 1;
        format!("{}_{}", name, self.tables)
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => SqlValue::Integer(*n as i64),
        Value::Number(n) => SqlValue::Real(*n),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i as f64),
        ValueRef::Real(f) => Value::Number(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl RelationalEngine for SqliteEngine {
    fn identifier_quote(&self) -> &str {
        QUOTE
    }

    fn materialize(&mut self, name: &str, source: &mut Processor) -> Result<String> {
        let schema = source.schema().clone();
        if schema.is_empty() {
            return Err(EtlError::Engine(format!(
                "source {} has no columns to materialize",
                source.name()
            )));
        }
        let table = self.next_table_name(name);
        let columns = schema
            .names()
            .into_iter()
            .map(|n| quote_name(n, QUOTE))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; schema.len()].join(", ");

        let tx = self.connection.transaction()?;
        tx.execute(&format!("drop table if exists {}", quote_name(&table, QUOTE)), [])?;
        tx.execute(
            &format!("create table {} ({})", quote_name(&table, QUOTE), columns),
            [],
        )?;
        let mut count = 0;
        {
            let mut insert = tx.prepare(&format!(
                "insert into {} ({}) values ({})",
                quote_name(&table, QUOTE),
                columns,
                placeholders
            ))?;
            while let Some(row) = source.next()? {
                let values = schema
                    .iter()
                    .map(|c| row.value(c.name()).map(to_sql).unwrap_or(SqlValue::Null));
                insert.execute(params_from_iter(values))?;
                count += 1;
            }
        }
        tx.commit()?;

        log::debug!("Materialized {} rows of {} as {}", count, source.name(), table);
        Ok(table)
    }

    fn run_query(&mut self, sql: &str) -> Result<Processor> {
        let mut statement = self.connection.prepare(sql)?;
        let names: Vec<String> = statement.column_names().into_iter().map(String::from).collect();

        let mut schema = Row::new();
        for name in &names {
            schema.add_column(Column::new(name.as_str()));
        }

        let mut rows = Vec::new();
        let mut result = statement.query([])?;
        while let Some(record) = result.next()? {
            let mut row = schema.clone();
            for index in 0..names.len() {
                let value = from_sql(record.get_ref(index)?);
                if let Some(column) = row.column_mut(index) {
                    column.set_value(value);
                }
            }
            rows.push(row);
        }

        Ok(Processor::new("query", MemorySource::new(schema, rows)).with_facet(Facet::Connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::ComponentId;
    use crate::row;
    use crate::transform::join::{Condition, Join, JoinDefinition, JoinKey, JoinKind, KeyPair};

    #[test]
    fn test_materialize_keeps_types() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        let mut input = Processor::memory(
            "mixed",
            vec![row! {"i" => 2, "f" => 1.5, "s" => "x", "n" => Value::Null}],
        );
        let table = engine.materialize("mixed", &mut input).unwrap();
        let mut result = engine
            .run_query(&format!("select typeof(i), typeof(f), typeof(s), typeof(n) from \"{table}\""))
            .unwrap();
        assert_eq!(
            result.next().unwrap().unwrap().display_values(),
            "integer,real,text,null"
        );
    }

    #[test]
    fn test_same_name_materialized_twice() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        let first = engine
            .materialize("t", &mut Processor::memory("t", vec![row! {"a" => 1}]))
            .unwrap();
        let second = engine
            .materialize("t", &mut Processor::memory("t", vec![row! {"a" => 1}]))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_result_has_schema() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        let table = engine
            .materialize("t", &mut Processor::memory("t", vec![row! {"a" => 1, "b" => 2}]))
            .unwrap();
        let mut result = engine
            .run_query(&format!("select a, b from \"{table}\" where a > 10"))
            .unwrap();
        assert_eq!(result.schema().names(), vec!["a", "b"]);
        assert!(result.next().unwrap().is_none());
        assert_eq!(result.facet(), Facet::Connection);
    }

    #[test]
    fn test_bad_query_is_an_error() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        assert!(matches!(
            engine.run_query("select * from nowhere"),
            Err(EtlError::Sqlite(_))
        ));
    }

    #[test]
    fn test_range_join_through_sqlite() {
        let bands = vec![
            row! {"band" => "low", "upper" => 10},
            row! {"band" => "high", "upper" => 100},
        ];
        let values = vec![row! {"id" => 1, "amount" => 5}, row! {"id" => 2, "amount" => 50}];
        let def = JoinDefinition::new("values", "bands", JoinKind::Inner).with_key(KeyPair::new(
            JoinKey::column("amount"),
            Condition::Lt,
            JoinKey::column("upper"),
        ));
        let join = Join::build(
            ComponentId::new("banding"),
            &def,
            Processor::memory("values", values),
            Processor::memory("bands", bands),
            Some(Box::new(SqliteEngine::open_in_memory().unwrap())),
        )
        .unwrap();
        assert!(matches!(join, Join::Sql(_)));

        let mut p = join.into_processor("banding");
        assert_eq!(p.schema().names(), vec!["id", "amount", "band", "upper"]);
        let mut rows: Vec<String> = p.collect_rows().unwrap().iter().map(Row::display_values).collect();
        rows.sort();
        assert_eq!(rows, vec!["1,5,high,100", "1,5,low,10", "2,50,high,100"]);
    }

    #[test]
    fn test_equality_join_matches_text_and_numbers() {
        let def = JoinDefinition::new("l", "r", JoinKind::LeftOuter)
            .with_key(KeyPair::eq("id", "code"))
            .with_persistence(true);
        let join = Join::build(
            ComponentId::new("persisted"),
            &def,
            Processor::memory("l", vec![row! {"id" => 7, "x" => "a"}, row! {"id" => 8, "x" => "b"}]),
            Processor::memory("r", vec![row! {"code" => " 7 ", "y" => "c"}]),
            Some(Box::new(SqliteEngine::open_in_memory().unwrap())),
        )
        .unwrap();
        let mut p = join.into_processor("persisted");
        let rows: Vec<String> = p.collect_rows().unwrap().iter().map(Row::display_values).collect();
        assert_eq!(rows, vec!["7,a, 7 ,c", "8,b,,"]);
    }
}
