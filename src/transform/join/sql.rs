//! Join delegated to a relational engine
//!
//! [`SqlJoin`] materializes both sides as relations, synthesizes one
//! `select ... from ... join ... on ...` statement and streams the engine's
//! result. Only query synthesis lives here; execution belongs to the
//! [`RelationalEngine`].

use super::{JoinDefinition, JoinKey, JoinKind, check_keys};
use crate::error::{EtlError, Result};
use crate::etl::{ComponentId, Facet, Processor, Row, RowSource, Value};

const LEFT_ALIAS: &str = "sl";
const RIGHT_ALIAS: &str = "sr";

/// Capability of an external relational engine
pub trait RelationalEngine {
    /// Character(s) used to quote identifiers
    fn identifier_quote(&self) -> &str;

    /// Load all rows of `source` into a relation and return its name,
    /// unquoted. The engine may pick a name different from `name`.
    fn materialize(&mut self, name: &str, source: &mut Processor) -> Result<String>;

    /// Run `sql` and stream its result
    fn run_query(&mut self, sql: &str) -> Result<Processor>;
}

/// Quote an identifier, doubling embedded quote characters
pub fn quote_name(name: &str, quote: &str) -> String {
    if quote.is_empty() {
        return name.to_string();
    }
    format!("{quote}{}{quote}", name.replace(quote, &format!("{quote}{quote}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn alias(&self) -> &'static str {
        match self {
            Side::Left => LEFT_ALIAS,
            Side::Right => RIGHT_ALIAS,
        }
    }
}

/// Output columns: every left column, then the right columns whose names
/// the left side does not have. Each name appears once, read from the side
/// preferred by the join kind.
fn projection(kind: JoinKind, left: &Row, right: &Row) -> Vec<(Side, String)> {
    let names = left
        .names()
        .into_iter()
        .chain(right.names().into_iter().filter(|n| !left.contains(n)));
    names
        .map(|name| {
            let side = match kind {
                JoinKind::Inner | JoinKind::LeftOuter if left.contains(name) => Side::Left,
                JoinKind::Inner | JoinKind::LeftOuter => Side::Right,
                JoinKind::RightOuter if right.contains(name) => Side::Right,
                JoinKind::RightOuter => Side::Left,
            };
            (side, name.to_string())
        })
        .collect()
}

fn render_key(key: &JoinKey, side: Side, quote: &str) -> String {
    match key {
        JoinKey::Column(name) => format!("{}.{}", side.alias(), quote_name(name, quote)),
        JoinKey::Constant { constant } => format!("'{}'", constant.replace('\'', "''")),
    }
}

fn cast(expression: String, key: &JoinKey) -> String {
    if key.is_constant() {
        expression
    } else {
        format!("TRIM(CAST(CAST({} AS CHAR(100)) AS VARCHAR(100)))", expression)
    }
}

fn conditions(def: &JoinDefinition, quote: &str) -> String {
    def.keys
        .iter()
        .map(|pair| {
            let left = render_key(&pair.left, Side::Left, quote);
            let right = render_key(&pair.right, Side::Right, quote);
            if pair.condition.is_equality_like() {
                format!(
                    "{} {} {}",
                    cast(left, &pair.left),
                    pair.condition.operator(),
                    cast(right, &pair.right)
                )
            } else {
                format!("{} {} {}", left, pair.condition.operator(), right)
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Synthesize the join statement for `def`
///
/// `left_relation`/`right_relation` are the unquoted relation names the
/// sides were materialized as; `left`/`right` their schemas.
///
/// # Example
/// ```
/// use etl_transforms::row;
/// use etl_transforms::transform::join::{JoinDefinition, JoinKind, KeyPair, build_query};
///
/// let def = JoinDefinition::new("l", "r", JoinKind::Inner).with_key(KeyPair::eq("id", "id"));
/// let sql = build_query(&def, "l", "r", &row! {"id" => 1}, &row! {"id" => 1, "v" => 2}, "\"");
/// assert!(sql.starts_with("select sl.\"id\",sr.\"v\" from \"l\" sl inner join \"r\" sr on "));
/// ```
pub fn build_query(
    def: &JoinDefinition,
    left_relation: &str,
    right_relation: &str,
    left: &Row,
    right: &Row,
    quote: &str,
) -> String {
    let fields = projection(def.kind, left, right)
        .iter()
        .map(|(side, name)| format!("{}.{}", side.alias(), quote_name(name, quote)))
        .collect::<Vec<_>>()
        .join(",");
    let mut sql = format!(
        "select {} from {} {} {} join {} {}",
        fields,
        quote_name(left_relation, quote),
        LEFT_ALIAS,
        def.kind.sql_keyword(),
        quote_name(right_relation, quote),
        RIGHT_ALIAS
    );
    if !def.keys.is_empty() {
        sql.push_str(" on ");
        sql.push_str(&conditions(def, quote));
    }
    sql
}

/// Join run as a query on a [`RelationalEngine`]
pub struct SqlJoin {
    component: ComponentId,
    def: JoinDefinition,
    left: Processor,
    right: Processor,
    engine: Box<dyn RelationalEngine>,
    schema: Row,
    result: Option<Processor>,
}

impl SqlJoin {
    /// # Errors
    /// Fails when a key column is missing from either schema
    pub fn new(
        component: ComponentId,
        def: &JoinDefinition,
        left: Processor,
        right: Processor,
        engine: Box<dyn RelationalEngine>,
    ) -> Result<Self> {
        check_keys(&component, left.name(), left.schema(), def.keys.iter().map(|k| &k.left))?;
        check_keys(&component, right.name(), right.schema(), def.keys.iter().map(|k| &k.right))?;

        for column in right.schema().iter() {
            if left.schema().contains(column.name()) && !def.is_identical_match(column.name()) {
                log::warn!(
                    "Removing column {} of source {} from joint result, because source {} already contains column with identical name.",
                    column.name(),
                    right.name(),
                    left.name()
                );
            }
        }

        let mut schema = Row::new();
        for (side, name) in projection(def.kind, left.schema(), right.schema()) {
            let source = match side {
                Side::Left => left.schema(),
                Side::Right => right.schema(),
            };
            if let Some(column) = source.get(&name) {
                let mut column = column.clone();
                column.set_value(Value::Null);
                schema.add_column(column);
            }
        }

        Ok(Self {
            component,
            def: def.clone(),
            left,
            right,
            engine,
            schema,
            result: None,
        })
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }
}

impl RowSource for SqlJoin {
    fn init(&mut self) -> Result<()> {
        let left_relation = self.engine.materialize(&self.def.left, &mut self.left)?;
        let right_relation = self.engine.materialize(&self.def.right, &mut self.right)?;
        let sql = build_query(
            &self.def,
            &left_relation,
            &right_relation,
            self.left.schema(),
            self.right.schema(),
            self.engine.identifier_quote(),
        );
        log::debug!("join query is: {}", sql);
        self.left.close();
        self.right.close();

        let result = self
            .engine
            .run_query(&sql)?
            .with_owner(self.component.clone())
            .with_facet(Facet::Connection);
        if result.schema().len() != self.schema.len() {
            return Err(EtlError::Engine(format!(
                "join query of {} returned {} columns, expected {}",
                self.component,
                result.schema().len(),
                self.schema.len()
            )));
        }
        self.result = Some(result);
        Ok(())
    }

    fn schema(&self) -> &Row {
        &self.schema
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        let Some(result) = self.result.as_mut() else {
            return Ok(None);
        };
        let Some(row) = result.next()? else {
            return Ok(None);
        };
        let mut out = self.schema.clone();
        for (index, column) in row.iter().enumerate() {
            if let Some(target) = out.column_mut(index) {
                target.set_value(column.value().clone());
            }
        }
        Ok(Some(out))
    }

    fn release(&mut self) {
        if let Some(result) = self.result.as_mut() {
            result.close();
        }
        self.left.close();
        self.right.close();
    }
}
