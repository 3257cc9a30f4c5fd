//! Hierarchy as a parent/child row stream

use super::{MemoryTreeManager, TreeBuilder, TreeConfig};
use crate::error::Result;
use crate::etl::{Column, ComponentId, Facet, Processor, Row, RowSource, Value};
use std::collections::{HashSet, VecDeque};

pub const PARENT_COLUMN: &str = "parent";
pub const CHILD_COLUMN: &str = "child";
pub const WEIGHT_COLUMN: &str = "weight";

/// Builds a tree on initialization and yields one row per edge
///
/// Rows come in depth-first order from each root. A root is reported once
/// with an empty parent and weight 1; every committed edge is reported
/// exactly once. Each declared attribute adds one column holding the
/// child's value.
pub struct TreeProcessor {
    builder: TreeBuilder,
    input: Processor,
    manager: MemoryTreeManager,
    schema: Row,
    rows: VecDeque<Row>,
}

impl TreeProcessor {
    /// # Errors
    /// Fails when `config` does not fit the input schema
    pub fn new(component: ComponentId, config: TreeConfig, input: Processor) -> Result<Self> {
        let builder = TreeBuilder::new(component.clone(), config, input.schema(), input.name())?;
        let input = input.with_owner(component.clone()).with_facet(Facet::Tree);

        let mut schema = Row::new();
        schema.add_column(Column::new(PARENT_COLUMN));
        schema.add_column(Column::new(CHILD_COLUMN));
        schema.add_column(Column::new(WEIGHT_COLUMN));
        for level in builder.levels() {
            for attribute in &level.attributes {
                schema.add_column(Column::new(attribute.name()));
            }
        }

        Ok(Self {
            builder,
            input,
            manager: MemoryTreeManager::new(component.as_str()),
            schema,
            rows: VecDeque::new(),
        })
    }

    /// Processor over the tree rows, owned by the tree's component
    pub fn into_processor(self, name: impl Into<String>) -> Processor {
        let owner = self.builder.component().clone();
        Processor::new(name, self).with_owner(owner)
    }

    fn edge_row(&self, parent: Option<&str>, child: &str, weight: f64) -> Row {
        let mut row = self.schema.clone();
        row.set_value(PARENT_COLUMN, parent);
        row.set_value(CHILD_COLUMN, child);
        row.set_value(WEIGHT_COLUMN, weight);
        if let Some(element) = self.manager.element(child) {
            for (name, value) in &element.attributes {
                row.set_value(name, value.clone());
            }
        }
        row
    }

    fn tree_rows(&self) -> VecDeque<Row> {
        let mut rows = VecDeque::new();
        let mut expanded: HashSet<&str> = HashSet::new();
        for root in self.manager.roots() {
            rows.push_back(self.edge_row(None, &root.name, 1.0));
            expanded.insert(root.name.as_str());
            let mut stack: Vec<_> = self.manager.children(&root.name).into_iter().rev().collect();
            while let Some(edge) = stack.pop() {
                rows.push_back(self.edge_row(Some(edge.parent.as_str()), &edge.child, edge.weight));
                if expanded.insert(edge.child.as_str()) {
                    stack.extend(self.manager.children(&edge.child).into_iter().rev());
                }
            }
        }
        rows
    }
}

impl RowSource for TreeProcessor {
    fn init(&mut self) -> Result<()> {
        let summary = self.builder.build(&mut self.input, &mut self.manager)?;
        self.input.close();
        log::debug!(
            "Tree {} built from {} rows ({} rejected)",
            self.builder.component(),
            summary.rows,
            summary.rejected
        );
        self.rows = self.tree_rows();
        Ok(())
    }

    fn schema(&self) -> &Row {
        &self.schema
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn release(&mut self) {
        self.rows.clear();
        self.input.close();
    }
}
