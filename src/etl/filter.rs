//! Row-level filters
//!
//! A [`RowFilter`] is an ordered list of conditions. A row passes when it
//! matches no `deny` condition and, if there are `accept` conditions, at
//! least one of them.

use super::Row;
use crate::error::{EtlError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Accept,
    Deny,
}

/// Comparison applied to the string rendering of a column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "lowercase")]
pub enum FilterOperator {
    Equal { value: String },
    /// Regular expression search
    Like { pattern: String },
    /// Inclusive range, numeric when all three sides parse as numbers
    Between { from: String, to: String },
}

/// Declarative filter condition, as found in job files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub column: String,
    #[serde(default)]
    pub mode: FilterMode,
    #[serde(flatten)]
    pub operator: FilterOperator,
}

#[derive(Debug, Clone)]
enum Matcher {
    Equal(String),
    Like(Regex),
    Between(String, String),
}

impl Matcher {
    fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Equal(expected) => value == expected,
            Matcher::Like(regex) => regex.is_match(value),
            Matcher::Between(from, to) => {
                match (value.parse::<f64>(), from.parse::<f64>(), to.parse::<f64>()) {
                    (Ok(v), Ok(lo), Ok(hi)) => lo <= v && v <= hi,
                    _ => from.as_str() <= value && value <= to.as_str(),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    column: String,
    mode: FilterMode,
    matcher: Matcher,
}

/// Compiled filter over rows
///
/// # Example
/// ```
/// use etl_transforms::etl::{FilterOperator, RowFilter};
/// use etl_transforms::row;
///
/// let filter = RowFilter::new()
///     .deny("region", FilterOperator::Like { pattern: "^E".into() })
///     .unwrap();
/// assert!(filter.accepts(&row! {"region" => "North"}));
/// assert!(!filter.accepts(&row! {"region" => "East"}));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    conditions: Vec<Condition>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a list of declarative conditions
    ///
    /// # Errors
    /// Returns a configuration error for an invalid `like` pattern
    pub fn from_config(configs: &[FilterConfig]) -> Result<Self> {
        let mut filter = Self::new();
        for config in configs {
            filter = filter.with(&config.column, config.mode, config.operator.clone())?;
        }
        Ok(filter)
    }

    pub fn accept(self, column: &str, operator: FilterOperator) -> Result<Self> {
        self.with(column, FilterMode::Accept, operator)
    }

    pub fn deny(self, column: &str, operator: FilterOperator) -> Result<Self> {
        self.with(column, FilterMode::Deny, operator)
    }

    fn with(mut self, column: &str, mode: FilterMode, operator: FilterOperator) -> Result<Self> {
        let matcher = match operator {
            FilterOperator::Equal { value } => Matcher::Equal(value),
            FilterOperator::Like { pattern } => Matcher::Like(Regex::new(&pattern).map_err(|e| {
                EtlError::config("filter", format!("invalid pattern on column {}: {}", column, e))
            })?),
            FilterOperator::Between { from, to } => Matcher::Between(from, to),
        };
        self.conditions.push(Condition {
            column: column.to_string(),
            mode,
            matcher,
        });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Missing columns are read as null, i.e. the empty string
    pub fn accepts(&self, row: &Row) -> bool {
        let mut has_accept = false;
        let mut accepted = false;
        for condition in &self.conditions {
            let value = row
                .value(&condition.column)
                .map(ToString::to_string)
                .unwrap_or_default();
            let hit = condition.matcher.matches(&value);
            match condition.mode {
                FilterMode::Deny if hit => return false,
                FilterMode::Deny => {}
                FilterMode::Accept => {
                    has_accept = true;
                    accepted |= hit;
                }
            }
        }
        !has_accept || accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_empty_filter_accepts_everything() {
        assert!(RowFilter::new().accepts(&row! {"a" => 1}));
    }

    #[test]
    fn test_accept_conditions_are_alternatives() {
        let filter = RowFilter::new()
            .accept("a", FilterOperator::Equal { value: "1".into() })
            .unwrap()
            .accept("a", FilterOperator::Equal { value: "2".into() })
            .unwrap();
        assert!(filter.accepts(&row! {"a" => 1}));
        assert!(filter.accepts(&row! {"a" => 2}));
        assert!(!filter.accepts(&row! {"a" => 3}));
    }

    #[test]
    fn test_deny_wins_over_accept() {
        let filter = RowFilter::new()
            .accept("a", FilterOperator::Like { pattern: ".*".into() })
            .unwrap()
            .deny("a", FilterOperator::Equal { value: "x".into() })
            .unwrap();
        assert!(filter.accepts(&row! {"a" => "y"}));
        assert!(!filter.accepts(&row! {"a" => "x"}));
    }

    #[test]
    fn test_between_numeric_and_lexical() {
        let numeric = RowFilter::new()
            .accept(
                "n",
                FilterOperator::Between {
                    from: "2".into(),
                    to: "10".into(),
                },
            )
            .unwrap();
        assert!(numeric.accepts(&row! {"n" => 9}));
        assert!(!numeric.accepts(&row! {"n" => 11}));

        let lexical = RowFilter::new()
            .accept(
                "s",
                FilterOperator::Between {
                    from: "b".into(),
                    to: "d".into(),
                },
            )
            .unwrap();
        assert!(lexical.accepts(&row! {"s" => "c"}));
        assert!(!lexical.accepts(&row! {"s" => "e"}));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = RowFilter::new().accept("a", FilterOperator::Like { pattern: "(".into() });
        assert!(matches!(result, Err(EtlError::Config { .. })));
    }

    #[test]
    fn test_from_yaml_config() {
        let yaml = "- column: region\n  mode: deny\n  operator: equal\n  value: East\n";
        let configs: Vec<FilterConfig> = serde_yaml::from_str(yaml).unwrap();
        let filter = RowFilter::from_config(&configs).unwrap();
        assert!(!filter.accepts(&row! {"region" => "East"}));
        assert!(filter.accepts(&row! {"region" => "West"}));
    }
}
