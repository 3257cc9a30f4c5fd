//! Positional comparison

use super::{Output, PairCompare, Reference, Side};
use crate::error::Result;
use crate::etl::Processor;

/// Zips source and target rows until both are exhausted
pub(super) struct LineCompare {
    source: Processor,
    target: Processor,
    reference: Reference,
    row_number: usize,
}

impl LineCompare {
    pub(super) fn new(source: Processor, target: Processor, reference: Reference) -> Self {
        Self {
            source,
            target,
            reference,
            row_number: 0,
        }
    }
}

impl PairCompare for LineCompare {
    fn step(&mut self, out: &mut Output) -> Result<bool> {
        let source = self.source.next()?;
        let target = self.target.next()?;
        let source_table = self.reference.table_name(&self.source);
        let target_table = self.reference.table_name(&self.target);
        let tables = (source_table.as_str(), target_table.as_str());
        match (source, target) {
            (None, None) => return Ok(false),
            (Some(source), Some(target)) => {
                self.row_number += 1;
                out.compare_rows(tables, &source, &target, self.row_number, None);
            }
            (Some(source), None) => {
                self.row_number += 1;
                out.extra_row(tables, Side::Source, &source, self.row_number);
            }
            (None, Some(target)) => {
                self.row_number += 1;
                out.extra_row(tables, Side::Target, &target, self.row_number);
            }
        }
        Ok(true)
    }

    fn close(&mut self) {
        self.source.close();
        self.target.close();
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{diff, factory};
    use super::super::{CompareConfig, MISSING, Reference, SourceFactory};
    use crate::etl::{Processor, Row, UnionSource, Value};
    use crate::row;

    fn people() -> Vec<Row> {
        vec![
            row! {"id" => 1, "name" => "Bob", "age" => 30},
            row! {"id" => 2, "name" => "Ann", "age" => ""},
        ]
    }

    #[test]
    fn test_identical_sources_have_no_diff() {
        let records = diff(
            CompareConfig::default(),
            vec![factory("a", people()), factory("b", people())],
        );
        assert!(records.is_empty());
    }

    #[test]
    fn test_single_column_change() {
        let mut changed = people();
        changed[1].set_value("name", "Anne");
        let records = diff(
            CompareConfig::default(),
            vec![factory("a", people()), factory("b", changed)],
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].row_number, Some(2));
        assert_eq!(records[0].source_column.as_deref(), Some("name"));
        assert_eq!(records[0].source_value, Value::from("Ann"));
        assert_eq!(records[0].target_value, Value::from("Anne"));
    }

    #[test]
    fn test_null_equals_empty() {
        let records = diff(
            CompareConfig::default(),
            vec![
                factory("a", vec![row! {"id" => 1, "v" => Value::Null}]),
                factory("b", vec![row! {"id" => 1, "v" => ""}]),
            ],
        );
        assert!(records.is_empty());
    }

    #[test]
    fn test_longer_side_reported_as_extra() {
        let mut longer = people();
        longer.push(row! {"id" => 3, "name" => "Eve", "age" => Value::Null});
        let records = diff(
            CompareConfig::default(),
            vec![factory("a", people()), factory("b", longer)],
        );
        let summary: Vec<(Option<usize>, Option<&str>, Option<&str>)> = records
            .iter()
            .map(|r| (r.row_number, r.source_column.as_deref(), r.target_column.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Some(3), Some(MISSING), Some("id")),
                (Some(3), Some(MISSING), Some("name")),
            ]
        );
    }

    #[test]
    fn test_missing_columns_reported_unless_ignored() {
        let sources = || {
            vec![
                factory("a", vec![row! {"id" => 1, "extra" => "x"}]),
                factory("b", vec![row! {"id" => 1, "other" => Value::Null}]),
            ]
        };
        let records = diff(CompareConfig::default(), sources());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_column.as_deref(), Some("extra"));
        assert_eq!(records[0].target_column.as_deref(), Some(MISSING));

        let ignoring = CompareConfig {
            ignore_missing_columns: true,
            ..CompareConfig::default()
        };
        assert!(diff(ignoring, sources()).is_empty());
    }

    fn before_and_after() -> Vec<SourceFactory> {
        let after: SourceFactory = Box::new(|| {
            Ok(Processor::new(
                "after",
                UnionSource::new(vec![
                    Processor::memory("after-1", vec![row! {"v" => 9}]),
                    Processor::memory("after-2", vec![row! {"v" => 8}]),
                ]),
            ))
        });
        vec![
            factory("before", vec![row! {"v" => 1}, row! {"v" => 2}]),
            after,
        ]
    }

    fn target_tables(config: CompareConfig) -> Vec<String> {
        diff(config, before_and_after())
            .into_iter()
            .map(|r| r.target_table)
            .collect()
    }

    #[test]
    fn test_chained_target_reported_by_source_name() {
        assert_eq!(target_tables(CompareConfig::default()), vec!["after", "after"]);
    }

    #[test]
    fn test_chained_target_reported_by_origin() {
        let config = CompareConfig {
            reference: Reference::Origin,
            ..CompareConfig::default()
        };
        assert_eq!(target_tables(config), vec!["after-1", "after-2"]);
    }
}
