//! Joins of two processors
//!
//! Two strategies implement a [`JoinDefinition`]:
//! - [`HashJoin`]: in-memory equality join, buffering the right side
//! - [`SqlJoin`]: query synthesis for an external [`RelationalEngine`],
//!   used for non-equality conditions or when persistence is requested
//!
//! The strategy is picked once by [`Join::build`].

mod hash;
mod sql;

pub use hash::HashJoin;
pub use sql::{RelationalEngine, SqlJoin, build_query, quote_name};

use crate::error::{EtlError, Result};
use crate::etl::{ComponentId, Processor, Row, RowSource};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Join kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    #[serde(alias = "full")]
    Inner,
    #[serde(alias = "left outer", alias = "left")]
    LeftOuter,
    #[serde(alias = "right outer", alias = "right")]
    RightOuter,
}

impl JoinKind {
    /// SQL keyword(s) preceding `join`
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::LeftOuter => "left outer",
            JoinKind::RightOuter => "right outer",
        }
    }
}

/// Comparison between a left and a right key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    #[default]
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
}

impl Condition {
    pub fn operator(&self) -> &'static str {
        match self {
            Condition::Eq => "=",
            Condition::Ne => "!=",
            Condition::Le => "<=",
            Condition::Lt => "<",
            Condition::Ge => ">=",
            Condition::Gt => ">",
        }
    }

    /// The same condition with its operands swapped
    pub fn mirrored(&self) -> Self {
        match self {
            Condition::Le => Condition::Ge,
            Condition::Lt => Condition::Gt,
            Condition::Ge => Condition::Le,
            Condition::Gt => Condition::Lt,
            other => *other,
        }
    }

    /// Equality and inequality compare normalized string renderings
    pub fn is_equality_like(&self) -> bool {
        matches!(self, Condition::Eq | Condition::Ne)
    }
}

/// One side of a key pair: a column reference or a literal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinKey {
    Column(String),
    Constant { constant: String },
}

impl JoinKey {
    pub fn column(name: impl Into<String>) -> Self {
        JoinKey::Column(name.into())
    }

    pub fn constant(value: impl Into<String>) -> Self {
        JoinKey::Constant {
            constant: value.into(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, JoinKey::Constant { .. })
    }

    /// Column name or literal text
    pub fn name(&self) -> &str {
        match self {
            JoinKey::Column(name) => name,
            JoinKey::Constant { constant } => constant,
        }
    }

    pub fn as_column(&self) -> Option<&str> {
        match self {
            JoinKey::Column(name) => Some(name),
            JoinKey::Constant { .. } => None,
        }
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKey::Column(name) => f.write_str(name),
            JoinKey::Constant { constant } => write!(f, "'{}'", constant),
        }
    }
}

/// `(left key, condition, right key)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub left: JoinKey,
    pub right: JoinKey,
    #[serde(default)]
    pub condition: Condition,
}

impl KeyPair {
    pub fn new(left: JoinKey, condition: Condition, right: JoinKey) -> Self {
        Self {
            left,
            right,
            condition,
        }
    }

    /// Equality between two columns
    pub fn eq(left: &str, right: &str) -> Self {
        Self::new(JoinKey::column(left), Condition::Eq, JoinKey::column(right))
    }

    /// The pair seen from the other side
    pub fn swapped(&self) -> Self {
        Self::new(self.right.clone(), self.condition.mirrored(), self.left.clone())
    }

    /// Equality of two columns with the same name
    pub fn is_identical_match(&self, name: &str) -> bool {
        self.condition == Condition::Eq
            && matches!((self.left.as_column(), self.right.as_column()),
                (Some(l), Some(r)) if l.eq_ignore_ascii_case(name) && r.eq_ignore_ascii_case(name))
    }
}

/// Declarative join of two named sources
///
/// # Example
/// ```
/// use etl_transforms::transform::join::{JoinDefinition, JoinKind};
///
/// let yaml = r#"
/// left: orders
/// right: customers
/// kind: left_outer
/// keys:
///   - left: customer_id
///     right: id
/// "#;
/// let def: JoinDefinition = serde_yaml::from_str(yaml).unwrap();
/// assert_eq!(def.kind, JoinKind::LeftOuter);
/// assert!(!def.needs_sql());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDefinition {
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub kind: JoinKind,
    #[serde(default)]
    pub keys: Vec<KeyPair>,
    /// Run the join on the relational engine even for pure equality joins
    #[serde(default)]
    pub persistent: bool,
}

impl JoinDefinition {
    pub fn new(left: impl Into<String>, right: impl Into<String>, kind: JoinKind) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            kind,
            keys: Vec::new(),
            persistent: false,
        }
    }

    pub fn with_key(mut self, key: KeyPair) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// True when the join must be delegated to a relational engine
    pub fn needs_sql(&self) -> bool {
        self.persistent || self.keys.iter().any(|k| k.condition != Condition::Eq)
    }

    pub fn is_identical_match(&self, name: &str) -> bool {
        self.keys.iter().any(|k| k.is_identical_match(name))
    }

    /// Right-outer joins rewritten as left-outer joins with swapped sides
    pub fn normalized(&self) -> Self {
        if self.kind != JoinKind::RightOuter {
            return self.clone();
        }
        Self {
            left: self.right.clone(),
            right: self.left.clone(),
            kind: JoinKind::LeftOuter,
            keys: self.keys.iter().map(KeyPair::swapped).collect(),
            persistent: self.persistent,
        }
    }
}

/// Make sure every column key of `keys` exists in `schema`
pub(crate) fn check_keys<'a>(
    component: &ComponentId,
    table: &str,
    schema: &Row,
    keys: impl IntoIterator<Item = &'a JoinKey>,
) -> Result<()> {
    for key in keys {
        if let Some(column) = key.as_column()
            && !schema.contains(column)
        {
            return Err(EtlError::MissingColumn {
                component: component.to_string(),
                table: table.to_string(),
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

/// A join with its strategy chosen
pub enum Join {
    Hash(HashJoin),
    Sql(SqlJoin),
}

impl Join {
    /// Pick the strategy for `def` and set it up over `left` and `right`
    ///
    /// # Errors
    /// Returns a configuration error when the definition has no keys, when
    /// a key column is missing from a source schema, or when the join needs
    /// a relational engine and none is given.
    pub fn build(
        component: ComponentId,
        def: &JoinDefinition,
        left: Processor,
        right: Processor,
        engine: Option<Box<dyn RelationalEngine>>,
    ) -> Result<Self> {
        if def.keys.is_empty() {
            return Err(EtlError::config(
                component.as_str(),
                "a join needs at least one key pair",
            ));
        }
        if def.needs_sql() {
            let engine = engine.ok_or_else(|| {
                EtlError::config(
                    component.as_str(),
                    "join needs a relational engine for non-equality or persistent joins",
                )
            })?;
            log::debug!("Join {} runs on the relational engine", component);
            Ok(Join::Sql(SqlJoin::new(component, def, left, right, engine)?))
        } else {
            log::debug!("Join {} runs in memory", component);
            Ok(Join::Hash(HashJoin::new(component, def, left, right)?))
        }
    }

    pub fn into_processor(self, name: impl Into<String>) -> Processor {
        let owner = match &self {
            Join::Hash(join) => join.component().clone(),
            Join::Sql(join) => join.component().clone(),
        };
        Processor::new(name, self).with_owner(owner)
    }
}

impl RowSource for Join {
    fn init(&mut self) -> Result<()> {
        match self {
            Join::Hash(join) => join.init(),
            Join::Sql(join) => join.init(),
        }
    }

    fn schema(&self) -> &Row {
        match self {
            Join::Hash(join) => join.schema(),
            Join::Sql(join) => join.schema(),
        }
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        match self {
            Join::Hash(join) => join.fetch(),
            Join::Sql(join) => join.fetch(),
        }
    }

    fn release(&mut self) {
        match self {
            Join::Hash(join) => join.release(),
            Join::Sql(join) => join.release(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_strategy_selection() {
        let eq = JoinDefinition::new("l", "r", JoinKind::Inner).with_key(KeyPair::eq("id", "id"));
        assert!(!eq.needs_sql());
        assert!(eq.clone().with_persistence(true).needs_sql());

        let lt = JoinDefinition::new("l", "r", JoinKind::Inner).with_key(KeyPair::new(
            JoinKey::column("a"),
            Condition::Lt,
            JoinKey::column("b"),
        ));
        assert!(lt.needs_sql());
    }

    #[test]
    fn test_right_outer_normalized_to_left_outer() {
        let def = JoinDefinition::new("l", "r", JoinKind::RightOuter).with_key(KeyPair::new(
            JoinKey::column("a"),
            Condition::Lt,
            JoinKey::column("b"),
        ));
        let normalized = def.normalized();
        assert_eq!(normalized.kind, JoinKind::LeftOuter);
        assert_eq!(normalized.left, "r");
        assert_eq!(normalized.keys[0].left, JoinKey::column("b"));
        assert_eq!(normalized.keys[0].condition, Condition::Gt);
    }

    #[test]
    fn test_full_is_inner() {
        let kind: JoinKind = serde_yaml::from_str("full").unwrap();
        assert_eq!(kind, JoinKind::Inner);
    }

    #[test]
    fn test_constant_key_from_yaml() {
        let yaml = "left: region\nright:\n  constant: EU\ncondition: NE\n";
        let pair: KeyPair = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pair.right, JoinKey::constant("EU"));
        assert_eq!(pair.condition, Condition::Ne);
    }

    #[test]
    fn test_sql_join_without_engine_is_config_error() {
        let def = JoinDefinition::new("l", "r", JoinKind::Inner)
            .with_key(KeyPair::eq("id", "id"))
            .with_persistence(true);
        let result = Join::build(
            ComponentId::new("j"),
            &def,
            Processor::memory("l", vec![row! {"id" => 1}]),
            Processor::memory("r", vec![row! {"id" => 1}]),
            None,
        );
        assert!(matches!(result, Err(EtlError::Config { .. })));
    }

    #[test]
    fn test_join_without_keys_is_config_error() {
        let def = JoinDefinition::new("l", "r", JoinKind::Inner);
        let result = Join::build(
            ComponentId::new("j"),
            &def,
            Processor::memory("l", vec![row! {"id" => 1}]),
            Processor::memory("r", vec![row! {"id" => 1}]),
            None,
        );
        assert!(matches!(result, Err(EtlError::Config { .. })));
    }
}
