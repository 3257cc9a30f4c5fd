//! Consolidation hierarchies
//!
//! A [`TreeBuilder`] reads rows whose level columns describe a path from
//! the most general element to the most specific one and turns them into a
//! weighted forest inside a [`TreeManager`]. [`MemoryTreeManager`] keeps
//! the forest in memory; [`TreeProcessor`] exposes it as a parent/child
//! row stream.

mod builder;
mod memory;
mod processor;

pub use builder::{BuildSummary, TreeBuilder};
pub use memory::{AttributeDefinition, Consolidation, Element, MemoryTreeManager};
pub use processor::TreeProcessor;

use crate::error::Result;
use crate::etl::{ColumnType, Row, Value};
use serde::{Deserialize, Serialize};

/// Type of a tree element or attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    #[default]
    Numeric,
    String,
    Consolidated,
}

/// Whether an attribute is a plain attribute or an alternative element name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    #[default]
    Attribute,
    Alias,
}

/// Capability a hierarchy is written to
///
/// Consolidations and attribute values are staged and only become visible
/// after the matching `commit_*` call.
pub trait TreeManager {
    /// Create the element `name` unless it exists. Idempotent by name.
    fn provide_element(&mut self, name: &str, element_type: ElementType) -> Result<()>;

    fn has_element(&self, name: &str) -> bool;

    /// Stage a weighted parent -> child edge
    fn add_consolidation(&mut self, parent: &str, child: &str, weight: f64) -> Result<()>;

    /// Declare an attribute. Declaring it again is a no-op.
    fn add_attribute(&mut self, name: &str, element_type: ElementType, kind: AttributeKind);

    fn has_attribute(&self, name: &str) -> bool;

    /// Stage a value of a declared attribute for an existing element
    fn add_attribute_value(&mut self, attribute: &str, element: &str, value: Value) -> Result<()>;

    fn commit_consolidations(&mut self) -> Result<()>;

    fn commit_attribute_values(&mut self) -> Result<()>;

    /// Maximum depth of the committed forest, counted in elements
    fn levels_count(&self) -> usize;
}

fn default_weight() -> f64 {
    1.0
}

fn default_attribute_type() -> ElementType {
    ElementType::String
}

/// An attribute read from a column of the same row as its level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAttribute {
    pub column: String,
    /// Attribute name; the column name when absent
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: AttributeKind,
    #[serde(default = "default_attribute_type")]
    pub element_type: ElementType,
}

impl LevelAttribute {
    pub fn new(column: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            column: column.into(),
            name: None,
            kind,
            element_type: default_attribute_type(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.column)
    }
}

/// One level of the hierarchy, outermost first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub column: String,
    /// Weight of the edge from the previous level's element to this one
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub attributes: Vec<LevelAttribute>,
}

impl Level {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            weight: default_weight(),
            attributes: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_attribute(mut self, attribute: LevelAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Levels declared by the column types of `schema`
    ///
    /// Every level column starts a level; attribute and alias columns that
    /// follow it belong to it.
    pub fn from_schema(schema: &Row) -> Vec<Level> {
        let mut levels: Vec<Level> = Vec::new();
        for column in schema.iter() {
            match column.column_type() {
                ColumnType::Level => {
                    levels.push(Level::new(column.name()).with_weight(column.weight()));
                }
                ColumnType::Attribute | ColumnType::Alias => {
                    let kind = if column.column_type() == ColumnType::Alias {
                        AttributeKind::Alias
                    } else {
                        AttributeKind::Attribute
                    };
                    if let Some(level) = levels.last_mut() {
                        level.attributes.push(LevelAttribute::new(column.name(), kind));
                    }
                }
                _ => {}
            }
        }
        levels
    }
}

/// Hierarchy build options
///
/// # Example
/// ```
/// use etl_transforms::transform::tree::TreeConfig;
///
/// let yaml = r#"
/// levels:
///   - column: region
///   - column: country
///     weight: 0.5
///     attributes:
///       - column: iso
///         kind: alias
/// skip_empty_level: true
/// default_element: Unassigned
/// "#;
/// let config: TreeConfig = serde_yaml::from_str(yaml).unwrap();
/// assert_eq!(config.levels[1].attributes[0].name(), "iso");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Levels to read; derived from the input's level columns when empty
    #[serde(default)]
    pub levels: Vec<Level>,
    #[serde(default)]
    pub skip_empty_level: bool,
    /// Type of the elements created from level values
    #[serde(default)]
    pub element_type: ElementType,
    /// Extra element added after all rows
    #[serde(default)]
    pub default_element: Option<String>,
    /// Parent of the default element
    #[serde(default)]
    pub default_parent: Option<String>,
}

impl TreeConfig {
    pub fn new(levels: Vec<Level>) -> Self {
        Self {
            levels,
            ..Self::default()
        }
    }

    pub fn with_skip_empty_level(mut self, skip: bool) -> Self {
        self.skip_empty_level = skip;
        self
    }

    pub fn with_default_element(mut self, element: impl Into<String>, parent: Option<&str>) -> Self {
        self.default_element = Some(element.into());
        self.default_parent = parent.map(str::to_string);
        self
    }
}
