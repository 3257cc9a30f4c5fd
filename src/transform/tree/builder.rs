//! Flat level columns to consolidation hierarchy

use super::{ElementType, Level, TreeConfig, TreeManager};
use crate::error::{EtlError, Result};
use crate::etl::{ComponentId, Processor, Row};

/// Counters of one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub rows: usize,
    pub rejected: usize,
    pub depth: usize,
}

/// Turns rows of level columns into parent/child edges
///
/// Levels are walked left to right per row. Each non-empty value becomes an
/// element consolidated under the element of the previous non-empty level.
/// A row that fails inside the [`TreeManager`] is logged and skipped.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    component: ComponentId,
    config: TreeConfig,
    levels: Vec<Level>,
}

impl TreeBuilder {
    /// Validate `config` against the input `schema`
    ///
    /// # Errors
    /// Fails when no level can be determined, when a level or attribute
    /// column is missing from the schema, or when a default parent is given
    /// without a default element.
    pub fn new(component: ComponentId, config: TreeConfig, schema: &Row, table: &str) -> Result<Self> {
        let levels = if config.levels.is_empty() {
            Level::from_schema(schema)
        } else {
            config.levels.clone()
        };
        if levels.is_empty() {
            return Err(EtlError::config(
                component.as_str(),
                "no level columns defined for the tree",
            ));
        }
        if config.default_parent.is_some() && config.default_element.is_none() {
            return Err(EtlError::config(
                component.as_str(),
                "a default parent requires a default element",
            ));
        }
        let columns = levels
            .iter()
            .flat_map(|l| std::iter::once(&l.column).chain(l.attributes.iter().map(|a| &a.column)));
        for column in columns {
            if !schema.contains(column) {
                return Err(EtlError::MissingColumn {
                    component: component.to_string(),
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(Self {
            component,
            config,
            levels,
        })
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    /// Drain `input` into `manager` and commit
    ///
    /// # Errors
    /// Propagates errors of the input stream and of the commit. Errors of
    /// single rows are logged and counted in [`BuildSummary::rejected`].
    pub fn build<M: TreeManager + ?Sized>(&self, input: &mut Processor, manager: &mut M) -> Result<BuildSummary> {
        let mut summary = BuildSummary::default();
        while let Some(row) = input.next()? {
            summary.rows += 1;
            if let Err(e) = self.add_row(&row, input.name(), manager) {
                log::error!(
                    "Failed to build tree from data {} in transform {}: {}",
                    row.display_values(),
                    self.component,
                    e
                );
                summary.rejected += 1;
            }
        }

        self.add_default_element(manager)?;
        manager.commit_consolidations()?;
        manager.commit_attribute_values()?;

        summary.depth = manager.levels_count();
        log::debug!("Number of Levels: {}", summary.depth);
        if summary.depth > self.levels.len() {
            log::warn!(
                "Transform {} defines {} levels but the resulting tree has a maximum depth of {}. Check the uniqueness of data between the levels.",
                self.component,
                self.levels.len(),
                summary.depth
            );
        }
        Ok(summary)
    }

    fn add_row<M: TreeManager + ?Sized>(&self, row: &Row, table: &str, manager: &mut M) -> Result<()> {
        let mut parent: Option<String> = None;
        for (i, level) in self.levels.iter().enumerate() {
            let column = row.get(&level.column).ok_or_else(|| EtlError::MissingColumn {
                component: self.component.to_string(),
                table: table.to_string(),
                column: level.column.clone(),
            })?;
            let name = column.value_as_string();

            if name.trim().is_empty() {
                if self.config.skip_empty_level {
                    continue;
                }
                let orphan = self.levels[i + 1..]
                    .iter()
                    .filter_map(|l| row.get(&l.column))
                    .find(|c| !c.value().is_blank());
                if let Some(orphan) = orphan {
                    log::warn!(
                        "In transform {} value {} of {} has empty parent and is therefore ignored. Use a default value in the source to fix this.",
                        self.component,
                        orphan.value_as_string(),
                        orphan.name()
                    );
                }
                break;
            }

            if parent.as_deref() == Some(name.as_str()) {
                log::debug!("Ignore consolidation of node {} to parent with same name", name);
                continue;
            }

            manager.provide_element(&name, self.config.element_type)?;
            if let Some(parent) = &parent {
                manager.add_consolidation(parent, &name, level.weight)?;
            }
            for attribute in &level.attributes {
                if !manager.has_attribute(attribute.name()) {
                    manager.add_attribute(attribute.name(), attribute.element_type, attribute.kind);
                }
                let value = row.value(&attribute.column).cloned().unwrap_or_default();
                manager.add_attribute_value(attribute.name(), &name, value)?;
            }
            parent = Some(name);
        }
        Ok(())
    }

    fn add_default_element<M: TreeManager + ?Sized>(&self, manager: &mut M) -> Result<()> {
        let Some(element) = &self.config.default_element else {
            return Ok(());
        };
        if manager.has_element(element) {
            log::warn!("Default Element {} is already existing in Tree.", element);
        }
        manager.provide_element(element, ElementType::Numeric)?;
        if let Some(parent) = &self.config.default_parent {
            if manager.has_element(parent) {
                manager.add_consolidation(parent, element, 1.0)?;
            } else {
                log::warn!(
                    "Element {} is not existing. The default element {} will not get consolidated.",
                    parent,
                    element
                );
            }
        }
        Ok(())
    }
}
