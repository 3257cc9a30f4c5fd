//! In-memory equality join

use super::{Condition, JoinDefinition, JoinKey, JoinKind, check_keys};
use crate::error::{EtlError, Result};
use crate::etl::{ComponentId, Processor, Row, RowSource, Value};
use std::collections::{HashMap, VecDeque};

const KEY_DELIMITER: &str = "@";

/// Equality join buffering the right side in a multimap
///
/// On initialization the right processor is drained into
/// `composite key -> [right values]`. Each left row is then looked up in
/// that map; a left row with `k` matches yields `k` consecutive rows.
/// Left rows without a match yield one row with null right columns unless
/// the join is inner.
///
/// Composite keys are the `@`-joined string renderings of the key columns;
/// values that contain `@` themselves may collide.
pub struct HashJoin {
    component: ComponentId,
    kind: JoinKind,
    left: Processor,
    right: Processor,
    left_keys: Vec<JoinKey>,
    right_keys: Vec<JoinKey>,
    /// Right columns carried into the output, in right schema order
    right_columns: Vec<String>,
    schema: Row,
    lookup: HashMap<String, Vec<Vec<Value>>>,
    pending: VecDeque<Row>,
}

impl HashJoin {
    /// # Errors
    /// Fails for non-equality conditions and for key columns missing from
    /// either schema.
    pub fn new(
        component: ComponentId,
        def: &JoinDefinition,
        left: Processor,
        right: Processor,
    ) -> Result<Self> {
        if def.keys.iter().any(|k| k.condition != Condition::Eq) {
            return Err(EtlError::config(
                component.as_str(),
                "the in-memory join supports equality conditions only",
            ));
        }
        let (def, left, right) = if def.kind == JoinKind::RightOuter {
            (def.normalized(), right, left)
        } else {
            (def.clone(), left, right)
        };

        let left_keys: Vec<JoinKey> = def.keys.iter().map(|k| k.left.clone()).collect();
        let right_keys: Vec<JoinKey> = def.keys.iter().map(|k| k.right.clone()).collect();
        check_keys(&component, left.name(), left.schema(), &left_keys)?;
        check_keys(&component, right.name(), right.schema(), &right_keys)?;

        let mut schema = left.schema().blank();
        let mut right_columns = Vec::new();
        for column in right.schema().iter() {
            let name = column.name();
            let duplicate = schema.contains(name) && !def.is_identical_match(name);
            if right_keys.iter().any(|k| k.as_column() == Some(name)) {
                if duplicate {
                    log::warn!(
                        "Removing column {} of source {} from joint result, because source {} already contains column with identical name.",
                        name,
                        right.name(),
                        left.name()
                    );
                }
                continue;
            }
            if duplicate {
                log::warn!(
                    "Removing column {} of source {} from joint result, because source {} already contains column with identical name.",
                    name,
                    right.name(),
                    left.name()
                );
                continue;
            }
            let mut column = column.clone();
            column.set_value(Value::Null);
            schema.add_column(column);
            right_columns.push(name.to_string());
        }

        Ok(Self {
            component,
            kind: def.kind,
            left,
            right,
            left_keys,
            right_keys,
            right_columns,
            schema,
            lookup: HashMap::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    fn key_of(&self, row: &Row, keys: &[JoinKey], table: &str) -> Result<String> {
        let mut parts = Vec::with_capacity(keys.len());
        for key in keys {
            match key {
                JoinKey::Column(name) => {
                    let value = row.value(name).ok_or_else(|| EtlError::MissingColumn {
                        component: self.component.to_string(),
                        table: table.to_string(),
                        column: name.clone(),
                    })?;
                    parts.push(value.to_string());
                }
                JoinKey::Constant { constant } => parts.push(constant.clone()),
            }
        }
        Ok(parts.join(KEY_DELIMITER))
    }

    fn output(&self, left: &Row, right: Option<&[Value]>) -> Row {
        let mut out = self.schema.clone();
        for column in left.iter() {
            out.set_value(column.name(), column.value().clone());
        }
        if let Some(values) = right {
            for (name, value) in self.right_columns.iter().zip(values) {
                out.set_value(name, value.clone());
            }
        }
        out
    }
}

impl RowSource for HashJoin {
    fn init(&mut self) -> Result<()> {
        let table = self.right.name().to_string();
        let mut rows = 0;
        while let Some(row) = self.right.next()? {
            let key = self.key_of(&row, &self.right_keys, &table)?;
            let values = self
                .right_columns
                .iter()
                .map(|name| row.value(name).cloned().unwrap_or_default())
                .collect();
            self.lookup.entry(key).or_default().push(values);
            rows += 1;
        }
        self.right.close();
        log::debug!(
            "Join {} buffered {} rows under {} keys from {}",
            self.component,
            rows,
            self.lookup.len(),
            table
        );
        Ok(())
    }

    fn schema(&self) -> &Row {
        &self.schema
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(left) = self.left.next()? else {
                return Ok(None);
            };
            let key = self.key_of(&left, &self.left_keys, self.left.name())?;
            match self.lookup.get(&key) {
                Some(matches) => {
                    let rows: Vec<Row> = matches
                        .iter()
                        .map(|values| self.output(&left, Some(values)))
                        .collect();
                    self.pending.extend(rows);
                }
                None if self.kind != JoinKind::Inner => return Ok(Some(self.output(&left, None))),
                None => {}
            }
        }
    }

    fn release(&mut self) {
        self.lookup.clear();
        self.pending.clear();
        self.left.close();
        self.right.close();
    }
}
