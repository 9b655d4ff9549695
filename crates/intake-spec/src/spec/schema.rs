use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::field::{Effect, FieldKind, FieldSpec};

pub const MSF_SCHEMA: &str = include_str!("../../schemas/msf.json");
pub const REGIONAL_SCHEMA: &str = include_str!("../../schemas/regional.json");

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read schema '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no built-in schema named '{0}'")]
    UnknownBuiltin(String),
    #[error("duplicate field id '{0}'")]
    DuplicateField(String),
    #[error("duplicate step index {0}")]
    DuplicateStep(usize),
    #[error("field '{field}' references unknown field '{reference}'")]
    UnknownReference { field: String, reference: String },
    #[error("field '{field}' is assigned to undeclared step {step}")]
    UnknownStep { field: String, step: usize },
    #[error("field '{field}' is optional in step {step} but not assigned to it")]
    OptionalOutsideSteps { field: String, step: usize },
    #[error("child field '{0}' must not declare steps; children follow their parent")]
    ChildSteps(String),
    #[error("field '{0}' nests children more than one level deep")]
    NestedTooDeep(String),
    #[error("gate '{0}' must be a select field")]
    GateKind(String),
    #[error("field '{field}' has invalid pattern: {source}")]
    Pattern {
        field: String,
        #[source]
        source: Box<regex::Error>,
    },
    #[error("prerequisite cycle through '{0}'")]
    PrerequisiteCycle(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    pub index: usize,
    pub id: String,
    pub title: String,
    /// Named workflow the step belongs to (`"new"`, `"update"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

/// Field and step definitions for one intake form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSpec {
    pub id: String,
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    pub fields: Vec<FieldSpec>,
}

impl SchemaSpec {
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Schemas compiled into the crate: `msf` and `regional`.
    pub fn builtin(name: &str) -> Result<Self, SchemaError> {
        match name {
            "msf" => Self::from_json(MSF_SCHEMA),
            "regional" => Self::from_json(REGIONAL_SCHEMA),
            other => Err(SchemaError::UnknownBuiltin(other.to_string())),
        }
    }

    /// Looks up a top-level field by id or a child by `parent.child`.
    pub fn field(&self, path: &str) -> Option<&FieldSpec> {
        match path.split_once('.') {
            Some((parent, child)) => self.top_level(parent)?.child(child),
            None => self.top_level(path),
        }
    }

    fn top_level(&self, id: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.id == id)
    }

    /// Path of the field whose selection populates `target`'s options.
    pub fn options_source(&self, target: &str) -> Option<String> {
        self.paths().into_iter().find(|path| {
            self.field(path).is_some_and(|field| {
                field.effects.iter().any(
                    |effect| matches!(effect, Effect::PopulateOptions { target: populated, .. } if populated == target),
                )
            })
        })
    }

    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.iter().find(|step| step.index == index)
    }

    /// Top-level fields assigned to `step`, in declaration order.
    pub fn fields_in_step(&self, step: usize) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(move |field| field.steps.contains(&step))
    }

    /// Every field path, each parent before its children.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for field in &self.fields {
            paths.push(field.id.clone());
            for child in &field.children {
                paths.push(format!("{}.{}", field.id, child.id));
            }
        }
        paths
    }

    /// Structural integrity: unique ids, resolvable references, declared
    /// steps, compilable patterns and an acyclic prerequisite graph.
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut steps = BTreeSet::new();
        for step in &self.steps {
            if !steps.insert(step.index) {
                return Err(SchemaError::DuplicateStep(step.index));
            }
        }

        let mut ids = BTreeSet::new();
        for field in &self.fields {
            if !ids.insert(field.id.as_str()) {
                return Err(SchemaError::DuplicateField(field.id.clone()));
            }
            let mut child_ids = BTreeSet::new();
            for child in &field.children {
                let path = format!("{}.{}", field.id, child.id);
                if !child_ids.insert(child.id.as_str()) {
                    return Err(SchemaError::DuplicateField(path));
                }
                if !child.steps.is_empty() {
                    return Err(SchemaError::ChildSteps(path));
                }
                if !child.children.is_empty() {
                    return Err(SchemaError::NestedTooDeep(path));
                }
            }
        }

        for field in &self.fields {
            for step in &field.steps {
                if !steps.contains(step) {
                    return Err(SchemaError::UnknownStep {
                        field: field.id.clone(),
                        step: *step,
                    });
                }
            }
            for step in &field.optional_in_steps {
                if !field.steps.contains(step) {
                    return Err(SchemaError::OptionalOutsideSteps {
                        field: field.id.clone(),
                        step: *step,
                    });
                }
            }
            self.check_field(field, &field.id)?;
            for child in &field.children {
                self.check_field(child, &format!("{}.{}", field.id, child.id))?;
            }
        }

        self.check_prerequisites()
    }

    fn check_field(&self, field: &FieldSpec, path: &str) -> Result<(), SchemaError> {
        for reference in field.references() {
            if self.field(reference).is_none() {
                return Err(SchemaError::UnknownReference {
                    field: path.to_string(),
                    reference: reference.to_string(),
                });
            }
        }
        if field.gate && !matches!(field.kind, FieldKind::Select(_)) {
            return Err(SchemaError::GateKind(path.to_string()));
        }
        if let FieldKind::Text(text) = &field.kind
            && let Some(pattern) = &text.pattern
        {
            Regex::new(pattern).map_err(|source| SchemaError::Pattern {
                field: path.to_string(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    /// Depth-first search over `requires` edges.
    fn check_prerequisites(&self) -> Result<(), SchemaError> {
        let mut edges: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for field in &self.fields {
            edges.insert(field.id.clone(), field.requires.iter().map(String::as_str).collect());
            for child in &field.children {
                edges.insert(
                    format!("{}.{}", field.id, child.id),
                    child.requires.iter().map(String::as_str).collect(),
                );
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            edges: &'a BTreeMap<String, Vec<&'a str>>,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> Result<(), SchemaError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(SchemaError::PrerequisiteCycle(node.to_string())),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            for &next in edges.get(node).map(Vec::as_slice).unwrap_or_default() {
                visit(next, edges, marks)?;
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        for node in edges.keys() {
            visit(node, &edges, &mut marks)?;
        }
        Ok(())
    }
}
