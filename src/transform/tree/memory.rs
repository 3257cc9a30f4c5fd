//! In-memory tree manager

use super::{AttributeKind, ElementType, TreeManager};
use crate::error::{EtlError, Result};
use crate::etl::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// A named tree element with its committed attribute values
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub element_type: ElementType,
    pub attributes: HashMap<String, Value>,
}

/// Weighted parent -> child edge
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidation {
    pub parent: String,
    pub child: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub name: String,
    pub element_type: ElementType,
    pub kind: AttributeKind,
}

/// Forest kept in memory
///
/// Edges are staged by [`add_consolidation`](TreeManager::add_consolidation)
/// and validated on commit: repeated parent/child pairs are dropped, and so
/// are edges that would close a cycle.
///
/// # Example
/// ```
/// use etl_transforms::transform::tree::{ElementType, MemoryTreeManager, TreeManager};
///
/// let mut tree = MemoryTreeManager::new("regions");
/// tree.provide_element("World", ElementType::Numeric).unwrap();
/// tree.provide_element("Europe", ElementType::Numeric).unwrap();
/// tree.add_consolidation("World", "Europe", 1.0).unwrap();
/// tree.add_consolidation("World", "Europe", 1.0).unwrap();
/// tree.commit_consolidations().unwrap();
///
/// assert_eq!(tree.consolidations().len(), 1);
/// assert_eq!(tree.levels_count(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MemoryTreeManager {
    name: String,
    elements: Vec<Element>,
    index: HashMap<String, usize>,
    staged: Vec<Consolidation>,
    consolidations: Vec<Consolidation>,
    children: HashMap<String, Vec<usize>>,
    parents: HashMap<String, Vec<usize>>,
    attributes: Vec<AttributeDefinition>,
    staged_values: Vec<(String, String, Value)>,
    depth: usize,
}

impl MemoryTreeManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Elements in creation order
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.index.get(name).map(|&i| &self.elements[i])
    }

    /// Committed edges in commit order
    pub fn consolidations(&self) -> &[Consolidation] {
        &self.consolidations
    }

    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    pub fn attribute_value(&self, element: &str, attribute: &str) -> Option<&Value> {
        self.element(element)?.attributes.get(attribute)
    }

    /// Elements without a committed parent, in creation order
    pub fn roots(&self) -> Vec<&Element> {
        self.elements
            .iter()
            .filter(|e| !self.parents.contains_key(&e.name))
            .collect()
    }

    pub fn children(&self, name: &str) -> Vec<&Consolidation> {
        self.edges(&self.children, name)
    }

    pub fn parents(&self, name: &str) -> Vec<&Consolidation> {
        self.edges(&self.parents, name)
    }

    fn edges<'a>(&'a self, map: &HashMap<String, Vec<usize>>, name: &str) -> Vec<&'a Consolidation> {
        map.get(name)
            .map(|edges| edges.iter().map(|&i| &self.consolidations[i]).collect())
            .unwrap_or_default()
    }

    /// True when `to` can be reached from `from` along committed edges
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(name) = queue.pop_front() {
            if name == to {
                return true;
            }
            if !seen.insert(name) {
                continue;
            }
            for edge in self.children(name) {
                queue.push_back(edge.child.as_str());
            }
        }
        false
    }

    fn compute_depth(&self) -> usize {
        let mut memo: HashMap<&str, usize> = HashMap::new();
        self.elements
            .iter()
            .map(|e| self.depth_of(&e.name, &mut memo))
            .max()
            .unwrap_or(0)
    }

    fn depth_of<'a>(&'a self, name: &'a str, memo: &mut HashMap<&'a str, usize>) -> usize {
        if let Some(&depth) = memo.get(name) {
            return depth;
        }
        let depth = 1 + self
            .children(name)
            .into_iter()
            .map(|edge| self.depth_of(&edge.child, memo))
            .max()
            .unwrap_or(0);
        memo.insert(name, depth);
        depth
    }

    fn require_element(&self, name: &str) -> Result<()> {
        if self.index.contains_key(name) {
            Ok(())
        } else {
            Err(EtlError::Tree(format!(
                "element {} not existing in tree {}",
                name, self.name
            )))
        }
    }
}

impl TreeManager for MemoryTreeManager {
    fn provide_element(&mut self, name: &str, element_type: ElementType) -> Result<()> {
        if name.trim().is_empty() {
            return Err(EtlError::Tree(format!(
                "empty element name in tree {}",
                self.name
            )));
        }
        if !self.index.contains_key(name) {
            self.index.insert(name.to_string(), self.elements.len());
            self.elements.push(Element {
                name: name.to_string(),
                element_type,
                attributes: HashMap::new(),
            });
        }
        Ok(())
    }

    fn has_element(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn add_consolidation(&mut self, parent: &str, child: &str, weight: f64) -> Result<()> {
        self.require_element(parent)?;
        self.require_element(child)?;
        self.staged.push(Consolidation {
            parent: parent.to_string(),
            child: child.to_string(),
            weight,
        });
        Ok(())
    }

    fn add_attribute(&mut self, name: &str, element_type: ElementType, kind: AttributeKind) {
        if !self.has_attribute(name) {
            self.attributes.push(AttributeDefinition {
                name: name.to_string(),
                element_type,
                kind,
            });
        }
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    fn add_attribute_value(&mut self, attribute: &str, element: &str, value: Value) -> Result<()> {
        if !self.has_attribute(attribute) {
            return Err(EtlError::Tree(format!(
                "attribute {} not existing in tree {}",
                attribute, self.name
            )));
        }
        self.require_element(element)?;
        self.staged_values
            .push((attribute.to_string(), element.to_string(), value));
        Ok(())
    }

    fn commit_consolidations(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut committed = 0;
        for edge in staged {
            let duplicate = self
                .children(&edge.parent)
                .iter()
                .any(|e| e.child == edge.child);
            if duplicate {
                continue;
            }
            if self.reaches(&edge.child, &edge.parent) {
                log::warn!(
                    "Consolidation of {} under {} in tree {} would create a cycle and is ignored.",
                    edge.child,
                    edge.parent,
                    self.name
                );
                continue;
            }
            let position = self.consolidations.len();
            self.children
                .entry(edge.parent.clone())
                .or_default()
                .push(position);
            self.parents
                .entry(edge.child.clone())
                .or_default()
                .push(position);
            self.consolidations.push(edge);
            committed += 1;
        }
        self.depth = self.compute_depth();
        log::debug!(
            "Committed {} consolidations in tree {}, depth {}",
            committed,
            self.name,
            self.depth
        );
        Ok(())
    }

    fn commit_attribute_values(&mut self) -> Result<()> {
        for (attribute, element, value) in std::mem::take(&mut self.staged_values) {
            if let Some(&i) = self.index.get(&element) {
                self.elements[i].attributes.insert(attribute, value);
            }
        }
        Ok(())
    }

    fn levels_count(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(names: &[&str]) -> MemoryTreeManager {
        let mut tree = MemoryTreeManager::new("test");
        for name in names {
            tree.provide_element(name, ElementType::Numeric).unwrap();
        }
        tree
    }

    #[test]
    fn test_provide_element_is_idempotent() {
        let mut tree = tree(&["A"]);
        tree.provide_element("A", ElementType::String).unwrap();
        assert_eq!(tree.elements().len(), 1);
        assert_eq!(tree.element("A").unwrap().element_type, ElementType::Numeric);
    }

    #[test]
    fn test_duplicate_edge_committed_once() {
        let mut tree = tree(&["A", "B"]);
        tree.add_consolidation("A", "B", 1.0).unwrap();
        tree.commit_consolidations().unwrap();
        tree.add_consolidation("A", "B", 1.0).unwrap();
        tree.commit_consolidations().unwrap();
        assert_eq!(tree.consolidations().len(), 1);
    }

    #[test]
    fn test_cycle_is_dropped() {
        let mut tree = tree(&["A", "B", "C"]);
        tree.add_consolidation("A", "B", 1.0).unwrap();
        tree.add_consolidation("B", "C", 1.0).unwrap();
        tree.add_consolidation("C", "A", 1.0).unwrap();
        tree.commit_consolidations().unwrap();
        assert_eq!(tree.consolidations().len(), 2);
        assert_eq!(tree.levels_count(), 3);
    }

    #[test]
    fn test_multiple_parents_and_roots() {
        let mut tree = tree(&["A", "X", "B"]);
        tree.add_consolidation("A", "B", 1.0).unwrap();
        tree.add_consolidation("X", "B", 0.5).unwrap();
        tree.commit_consolidations().unwrap();

        let roots: Vec<&str> = tree.roots().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(roots, vec!["A", "X"]);
        assert_eq!(tree.parents("B").len(), 2);
        assert_eq!(tree.parents("B")[1].weight, 0.5);
    }

    #[test]
    fn test_unknown_element_rejected() {
        let mut tree = tree(&["A"]);
        assert!(matches!(
            tree.add_consolidation("A", "missing", 1.0),
            Err(EtlError::Tree(_))
        ));
        assert!(tree.provide_element("  ", ElementType::Numeric).is_err());
    }

    #[test]
    fn test_attribute_values_visible_after_commit() {
        let mut tree = tree(&["A"]);
        tree.add_attribute("code", ElementType::String, AttributeKind::Alias);
        tree.add_attribute("code", ElementType::Numeric, AttributeKind::Attribute);
        assert_eq!(tree.attributes().len(), 1);

        tree.add_attribute_value("code", "A", Value::from("a1")).unwrap();
        assert!(tree.attribute_value("A", "code").is_none());
        tree.commit_attribute_values().unwrap();
        assert_eq!(tree.attribute_value("A", "code"), Some(&Value::from("a1")));

        assert!(tree.add_attribute_value("nope", "A", Value::Null).is_err());
    }
}
