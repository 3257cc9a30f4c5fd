//! Key based comparison
//!
//! The target side is preloaded into partitions of `key -> (row number, row)`:
//! one per pair by default, one per chained target table when tables are
//! referenced by origin. Keys seen more than once are moved out of
//! the partition into a duplicate map and never matched. The source side is
//! then streamed; each source row pops its counterpart from the partition
//! of the same position. When the source table changes, or the source ends,
//! the unmatched targets of the finished partition are reported in row
//! number order.

use super::{DUPLICATE_KEY, DiffRecord, MISSING, Output, PairCompare, Reference};
use crate::error::{EtlError, Result};
use crate::etl::{ComponentId, Processor, Row, Value};
use std::collections::HashMap;

struct Partition {
    table: String,
    rows: HashMap<String, (usize, Row)>,
    duplicates: HashMap<String, Vec<(usize, Row)>>,
    flushed: bool,
}

impl Partition {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows: HashMap::new(),
            duplicates: HashMap::new(),
            flushed: false,
        }
    }
}

pub(super) struct KeyCompare {
    component: ComponentId,
    source: Processor,
    target: Processor,
    key_index: usize,
    reference: Reference,
    loaded: bool,
    partitions: Vec<Partition>,
    /// Source table per partition position, as far as the source got
    source_tables: Vec<String>,
}

impl KeyCompare {
    pub(super) fn new(
        component: ComponentId,
        source: Processor,
        target: Processor,
        key_index: usize,
        reference: Reference,
    ) -> Self {
        Self {
            component,
            source,
            target,
            key_index,
            reference,
            loaded: false,
            partitions: Vec::new(),
            source_tables: Vec::new(),
        }
    }

    /// Key value of `row`, `None` for a null key
    fn key_of(&self, row: &Row, table: &str, row_number: usize) -> Result<Option<(String, Value)>> {
        let column = row.column(self.key_index).ok_or_else(|| {
            EtlError::config(
                self.component.as_str(),
                format!(
                    "Key position {} is greater than number of available columns in source {}: {}",
                    self.key_index + 1,
                    table,
                    row.len()
                ),
            )
        })?;
        if column.is_null() {
            log::warn!(
                "Key value of column {} at row {} is null. Row from source {} will be ignored.",
                column.name(),
                row_number,
                table
            );
            return Ok(None);
        }
        Ok(Some((column.value_as_string(), column.value().clone())))
    }

    fn preload(&mut self) -> Result<()> {
        while let Some(row) = self.target.next()? {
            let row_number = self.target.rows_accepted();
            let table = self.reference.table_name(&self.target);
            let Some((key, _)) = self.key_of(&row, &table, row_number)? else {
                continue;
            };
            if self.partitions.last().is_none_or(|p| p.table != table) {
                self.partitions.push(Partition::new(&table));
            }
            let Some(partition) = self.partitions.last_mut() else {
                continue;
            };

            let first = partition.rows.remove(&key);
            if first.is_some() || partition.duplicates.contains_key(&key) {
                let key_name = row.column(self.key_index).map(|c| c.name().to_string()).unwrap_or_default();
                log::warn!(
                    "Key value {} of column {} at row {} is duplicate. Key will be ignored.",
                    key,
                    key_name,
                    row_number
                );
                let occurrences = partition.duplicates.entry(key).or_default();
                occurrences.extend(first);
                occurrences.push((row_number, row));
            } else {
                partition.rows.insert(key, (row_number, row));
            }
        }
        self.target.close();
        log::debug!(
            "Preloaded {} target partitions for {}",
            self.partitions.len(),
            self.component
        );
        Ok(())
    }

    /// Report the unmatched and duplicate targets of partition `index`
    fn flush(&mut self, index: usize, out: &mut Output) {
        let source_table = self
            .source_tables
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.source.name().to_string());
        let key_index = self.key_index;
        let Some(partition) = self.partitions.get_mut(index) else {
            return;
        };
        if partition.flushed {
            return;
        }
        partition.flushed = true;

        let unmatched = partition.rows.drain().map(|(_, entry)| (MISSING, entry));
        let duplicates = partition
            .duplicates
            .drain()
            .flat_map(|(_, entries)| entries.into_iter().map(|entry| (DUPLICATE_KEY, entry)));
        let mut pending: Vec<(usize, DiffRecord)> = unmatched
            .chain(duplicates)
            .filter_map(|(marker, (row_number, row))| {
                let key = row.column(key_index)?;
                let mut record = out.record(&source_table, &partition.table);
                record.row_number = Some(row_number);
                record.source_column = Some(marker.to_string());
                record.target_column = Some(key.name().to_string());
                record.target_value = key.value().clone();
                record.target_key = Some(key.value().clone());
                Some((row_number, record))
            })
            .collect();
        pending.sort_by_key(|(row_number, _)| *row_number);
        for (_, record) in pending {
            out.push(record);
        }
    }

    fn flush_all(&mut self, out: &mut Output) {
        for index in 0..self.partitions.len() {
            self.flush(index, out);
        }
    }
}

impl PairCompare for KeyCompare {
    fn step(&mut self, out: &mut Output) -> Result<bool> {
        if !self.loaded {
            self.preload()?;
            self.loaded = true;
        }
        let Some(row) = self.source.next()? else {
            self.flush_all(out);
            return Ok(false);
        };

        let source_table = self.reference.table_name(&self.source);
        if self.source_tables.last() != Some(&source_table) {
            if !self.source_tables.is_empty() {
                self.flush(self.source_tables.len() - 1, out);
            }
            self.source_tables.push(source_table.clone());
        }
        let index = self.source_tables.len() - 1;

        let row_number = self.source.rows_accepted();
        let Some((key, key_value)) = self.key_of(&row, &source_table, row_number)? else {
            return Ok(true);
        };
        let target_table = self
            .partitions
            .get(index)
            .map(|p| p.table.clone())
            .unwrap_or_else(|| self.target.name().to_string());

        let matched = self.partitions.get_mut(index).and_then(|p| p.rows.remove(&key));
        match matched {
            Some((_, target)) => {
                out.compare_rows(
                    (&source_table, &target_table),
                    &row,
                    &target,
                    row_number,
                    Some(&key_value),
                );
            }
            None => {
                let duplicate = self
                    .partitions
                    .get(index)
                    .is_some_and(|p| p.duplicates.contains_key(&key));
                let key_name = row
                    .column(self.key_index)
                    .map(|c| c.name().to_string())
                    .unwrap_or_default();
                let mut record = out.record(&source_table, &target_table);
                record.row_number = Some(row_number);
                record.source_column = Some(key_name);
                record.source_value = key_value.clone();
                record.target_column = Some(if duplicate { DUPLICATE_KEY } else { MISSING }.to_string());
                record.source_key = Some(key_value.clone());
                record.target_key = Some(key_value);
                out.push(record);
            }
        }
        Ok(true)
    }

    fn close(&mut self) {
        self.partitions.clear();
        self.source.close();
        self.target.close();
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{diff, factory};
    use super::super::{CompareConfig, DiffRecord, SourceFactory};
    use super::*;
    use crate::etl::UnionSource;
    use crate::row;

    fn markers(records: &[DiffRecord]) -> Vec<(Option<usize>, String, String)> {
        records
            .iter()
            .map(|r| {
                (
                    r.row_number,
                    r.source_column.clone().unwrap_or_default(),
                    r.target_column.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_column_change_by_key() {
        let records = diff(
            CompareConfig::key(1),
            vec![
                factory("a", vec![row! {"id" => 1, "name" => "Bob", "age" => 30}]),
                factory("b", vec![row! {"id" => 1, "name" => "Bob", "age" => 31}]),
            ],
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_column.as_deref(), Some("age"));
        assert_eq!(records[0].source_value, Value::from(30));
        assert_eq!(records[0].target_value, Value::from(31));
        assert_eq!(records[0].source_key, Some(Value::from(1)));
    }

    #[test]
    fn test_order_does_not_matter() {
        let records = diff(
            CompareConfig::key(1),
            vec![
                factory("a", vec![row! {"id" => 1, "v" => "x"}, row! {"id" => 2, "v" => "y"}]),
                factory("b", vec![row! {"id" => 2, "v" => "y"}, row! {"id" => 1, "v" => "x"}]),
            ],
        );
        assert!(records.is_empty());
    }

    #[test]
    fn test_one_sided_rows() {
        let records = diff(
            CompareConfig::key(1),
            vec![
                factory("a", vec![row! {"id" => 1, "v" => "x"}, row! {"id" => 3, "v" => "z"}]),
                factory(
                    "b",
                    vec![
                        row! {"id" => 5, "v" => "q"},
                        row! {"id" => 1, "v" => "x"},
                        row! {"id" => 4, "v" => "w"},
                    ],
                ),
            ],
        );
        assert_eq!(
            markers(&records),
            vec![
                (Some(2), "id".to_string(), MISSING.to_string()),
                (Some(1), MISSING.to_string(), "id".to_string()),
                (Some(3), MISSING.to_string(), "id".to_string()),
            ]
        );
        assert_eq!(records[1].target_value, Value::from(5));
        assert_eq!(records[0].source_key, Some(Value::from(3)));
        assert_eq!(records[0].target_key, Some(Value::from(3)));
    }

    #[test]
    fn test_duplicate_target_keys_are_excluded() {
        let records = diff(
            CompareConfig::key(1),
            vec![
                factory("a", vec![row! {"id" => 1, "v" => "x"}]),
                factory("b", vec![row! {"id" => 1, "v" => "x"}, row! {"id" => 1, "v" => "y"}]),
            ],
        );
        assert_eq!(
            markers(&records),
            vec![
                (Some(1), "id".to_string(), DUPLICATE_KEY.to_string()),
                (Some(1), DUPLICATE_KEY.to_string(), "id".to_string()),
                (Some(2), DUPLICATE_KEY.to_string(), "id".to_string()),
            ]
        );
    }

    #[test]
    fn test_null_keys_skipped() {
        let records = diff(
            CompareConfig::key(1),
            vec![
                factory("a", vec![row! {"id" => Value::Null, "v" => "x"}]),
                factory("b", vec![row! {"id" => Value::Null, "v" => "y"}]),
            ],
        );
        assert!(records.is_empty());
    }

    #[test]
    fn test_key_position_out_of_range_is_fatal() {
        let mut engine = super::super::DiffEngine::new(
            ComponentId::new("cmp"),
            CompareConfig::key(3),
            vec![
                factory("a", vec![row! {"id" => 1}]),
                factory("b", vec![row! {"id" => 1}]),
            ],
        )
        .unwrap()
        .into_processor("cmp");
        assert!(matches!(engine.next(), Err(EtlError::Config { .. })));
    }

    fn chained(name: &'static str, tables: Vec<(&'static str, Vec<Row>)>) -> SourceFactory {
        Box::new(move || {
            let inputs = tables
                .iter()
                .map(|(table, rows)| Processor::memory(*table, rows.clone()))
                .collect();
            Ok(Processor::new(name, UnionSource::new(inputs)))
        })
    }

    fn chained_pair() -> Vec<SourceFactory> {
        vec![
            chained(
                "before",
                vec![
                    ("s1", vec![row! {"id" => 1, "v" => "a"}]),
                    ("s2", vec![row! {"id" => 7, "v" => "b"}]),
                ],
            ),
            chained(
                "after",
                vec![
                    ("t1", vec![row! {"id" => 2, "v" => "a"}, row! {"id" => 1, "v" => "a"}]),
                    ("t2", vec![row! {"id" => 7, "v" => "c"}]),
                ],
            ),
        ]
    }

    fn tables_and_columns(records: &[DiffRecord]) -> Vec<(String, String, String, String)> {
        records
            .iter()
            .map(|r| {
                (
                    r.source_table.clone(),
                    r.target_table.clone(),
                    r.source_column.clone().unwrap_or_default(),
                    r.target_column.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_chained_sources_form_one_partition_by_default() {
        let records = diff(CompareConfig::key(1), chained_pair());
        assert_eq!(
            tables_and_columns(&records),
            vec![
                ("before".into(), "after".into(), "v".into(), "v".into()),
                ("before".into(), "after".into(), MISSING.into(), "id".into()),
            ]
        );
    }

    #[test]
    fn test_unmatched_targets_flushed_per_origin_table() {
        let config = CompareConfig {
            reference: Reference::Origin,
            ..CompareConfig::key(1)
        };
        let records = diff(config, chained_pair());
        assert_eq!(
            tables_and_columns(&records),
            vec![
                ("s1".into(), "t1".into(), MISSING.into(), "id".into()),
                ("s2".into(), "t2".into(), "v".into(), "v".into()),
            ]
        );
    }
}
