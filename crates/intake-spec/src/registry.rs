//! Runtime state for every field of a schema, addressed by path.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::{Config, ConfigError};
use crate::outcome::{FieldError, Outcome, join_messages};
use crate::safety::SafetyState;
use crate::spec::field::{FieldKind, FieldSpec};
use crate::spec::schema::SchemaSpec;
use crate::value::FieldValue;

/// What a rule may read about other fields.
pub trait Collaborators {
    fn value(&self, path: &str) -> Option<&FieldValue>;
    /// Result of the field's most recent validation; never validated reads as false.
    fn is_valid(&self, path: &str) -> bool;
    fn label(&self, path: &str) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldNode {
    pub id: String,
    pub path: String,
    pub label: String,
    pub gate: bool,
    pub value: FieldValue,
    pub errors: Vec<FieldError>,
    /// `None` until the field has been validated once.
    pub last_result: Option<bool>,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyState>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub derived: BTreeMap<String, FieldValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldNode>,
    #[serde(skip)]
    default: FieldValue,
    #[serde(skip)]
    initial_options: Vec<String>,
}

impl FieldNode {
    fn new(spec: &FieldSpec, parent: Option<&str>, config: &Config) -> Result<Self, ConfigError> {
        let path = match parent {
            Some(parent) => format!("{parent}.{}", spec.id),
            None => spec.id.clone(),
        };
        let options = match &spec.kind {
            FieldKind::Select(select) | FieldKind::MultiSelect(select) => {
                match (&select.options_list, &select.options_hierarchy) {
                    (Some(list), _) => config.list(list)?.to_vec(),
                    (None, Some(hierarchy)) => config.hierarchy_roots(hierarchy)?,
                    (None, None) => select.options.clone(),
                }
            }
            _ => Vec::new(),
        };
        let safety = match &spec.kind {
            FieldKind::Number(number) if number.safety.is_some() => Some(SafetyState::default()),
            _ => None,
        };
        let children = spec
            .children
            .iter()
            .map(|child| FieldNode::new(child, Some(&path), config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: spec.id.clone(),
            label: spec.display_name().to_string(),
            gate: spec.gate,
            value: spec.default.clone(),
            errors: Vec::new(),
            last_result: None,
            options: options.clone(),
            safety,
            derived: BTreeMap::new(),
            children,
            default: spec.default.clone(),
            initial_options: options,
            path,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.last_result == Some(true)
    }

    /// Error messages joined for display under the input.
    pub fn error_text(&self) -> String {
        join_messages(&self.errors)
    }

    pub(crate) fn apply(&mut self, outcome: Outcome) {
        self.last_result = Some(outcome.is_valid());
        if let Some(normalized) = outcome.normalized {
            self.value = normalized;
        }
        self.derived = outcome.derived.into_iter().collect();
        if let Some(safety) = outcome.safety {
            self.safety = Some(safety);
        }
        self.errors = outcome.errors;
    }

    /// Records a result that skipped the field's own rule.
    pub(crate) fn settle(&mut self, errors: Vec<FieldError>) {
        self.last_result = Some(errors.is_empty());
        self.errors = errors;
        self.derived.clear();
    }

    fn reset(&mut self) {
        self.value = self.default.clone();
        self.errors.clear();
        self.last_result = None;
        self.options = self.initial_options.clone();
        self.derived.clear();
        if self.safety.is_some() {
            self.safety = Some(SafetyState::default());
        }
        for child in &mut self.children {
            child.reset();
        }
    }
}

/// Flat lookup over the top-level nodes; children are reached through their parent.
#[derive(Debug, Clone)]
pub struct Registry {
    nodes: Vec<FieldNode>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new(schema: &SchemaSpec, config: &Config) -> Result<Self, ConfigError> {
        let nodes = schema
            .fields
            .iter()
            .map(|field| FieldNode::new(field, None, config))
            .collect::<Result<Vec<_>, _>>()?;
        let index = nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.id.clone(), position))
            .collect();
        Ok(Self { nodes, index })
    }

    pub fn get(&self, path: &str) -> Option<&FieldNode> {
        match path.split_once('.') {
            Some((parent, child)) => self
                .nodes
                .get(*self.index.get(parent)?)?
                .children
                .iter()
                .find(|node| node.id == child),
            None => self.nodes.get(*self.index.get(path)?),
        }
    }

    pub(crate) fn get_mut(&mut self, path: &str) -> Option<&mut FieldNode> {
        match path.split_once('.') {
            Some((parent, child)) => {
                let position = *self.index.get(parent)?;
                self.nodes
                    .get_mut(position)?
                    .children
                    .iter_mut()
                    .find(|node| node.id == child)
            }
            None => {
                let position = *self.index.get(path)?;
                self.nodes.get_mut(position)
            }
        }
    }

    /// Top-level nodes in declaration order.
    pub fn nodes(&self) -> &[FieldNode] {
        &self.nodes
    }

    /// Every node, each parent before its children.
    pub fn walk(&self) -> impl Iterator<Item = &FieldNode> {
        self.nodes
            .iter()
            .flat_map(|node| std::iter::once(node).chain(node.children.iter()))
    }

    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }
}

impl Collaborators for Registry {
    fn value(&self, path: &str) -> Option<&FieldValue> {
        self.get(path).map(|node| &node.value)
    }

    fn is_valid(&self, path: &str) -> bool {
        self.get(path).is_some_and(FieldNode::is_valid)
    }

    fn label(&self, path: &str) -> Option<&str> {
        self.get(path).map(|node| node.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let schema = SchemaSpec::builtin("msf").expect("schema");
        let config = Config::builtin().expect("config");
        Registry::new(&schema, &config).expect("registry")
    }

    #[test]
    fn child_paths_resolve_through_parent() {
        let registry = registry();
        let gate = registry.get("pH.available").expect("gate");
        assert_eq!(gate.path, "pH.available");
        assert!(gate.gate);
        assert!(registry.get("pH.missing").is_none());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn config_backed_options_are_loaded() {
        let registry = registry();
        let centres = registry.get("operationalCentre").expect("centres");
        assert!(centres.options.iter().any(|centre| centre == "Paris"));
        let project = registry.get("project").expect("project");
        assert!(project.options.is_empty());

        let schema = SchemaSpec::builtin("regional").expect("schema");
        let config = Config::builtin().expect("config");
        let regional = Registry::new(&schema, &config).expect("registry");
        let factors = regional.get("preventableFactors").expect("factors");
        assert!(!factors.options.is_empty());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut registry = registry();
        let node = registry.get_mut("weight").expect("weight");
        node.value = FieldValue::Number(20.0);
        node.last_result = Some(true);
        registry.reset();
        let node = registry.get("weight").expect("weight");
        assert!(node.value.is_empty());
        assert_eq!(node.last_result, None);
        assert_eq!(node.safety, Some(SafetyState::default()));
    }
}
