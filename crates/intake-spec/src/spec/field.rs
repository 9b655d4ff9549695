use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::value::{FieldValue, Rounding};

/// One clinical input and its nested sub-questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub id: String,
    pub label: String,
    /// Short name used inside messages ("Name" for "Full name").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "is_null")]
    pub default: FieldValue,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_in_steps: Vec<usize>,
    /// Availability switch whose value is reported among the record's gates.
    #[serde(default)]
    pub gate: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldSpec>,
    /// When false the field is inapplicable and validates without looking at its value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_when: Option<Expr>,
    /// Overrides `required` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_when: Option<Expr>,
    /// Collaborators refreshed before this field's rule runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
    /// Message template overrides keyed by rule code.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

fn default_required() -> bool {
    true
}

fn is_null(value: &FieldValue) -> bool {
    matches!(value, FieldValue::Null)
}

impl FieldSpec {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.label)
    }

    pub fn child(&self, id: &str) -> Option<&FieldSpec> {
        self.children.iter().find(|child| child.id == id)
    }

    /// Every field path this field reads or writes, for integrity checks.
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        if let Some(expr) = &self.applies_when {
            refs.extend(expr.fields());
        }
        if let Some(expr) = &self.required_when {
            refs.extend(expr.fields());
        }
        refs.extend(self.requires.iter().map(String::as_str));
        for effect in &self.effects {
            match effect {
                Effect::Clear { when, targets } => {
                    if let Some(expr) = when {
                        refs.extend(expr.fields());
                    }
                    refs.extend(targets.iter().map(String::as_str));
                }
                Effect::PopulateOptions { target, .. } => refs.push(target),
                Effect::Revalidate { targets } => refs.extend(targets.iter().map(String::as_str)),
            }
        }
        if let FieldKind::Number(number) = &self.kind {
            if let Some(unit_field) = &number.unit_field {
                refs.push(unit_field);
            }
            if let Some(alternative) = number
                .diagnostic
                .as_ref()
                .and_then(|rule| rule.alternative.as_ref())
            {
                refs.push(&alternative.field);
            }
            if let Some(safety) = &number.safety {
                refs.push(&safety.sex_field);
                refs.push(&safety.dob_field);
            }
        }
        refs
    }
}

/// Closed set of field kinds; each carries its own rule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Number(NumberSpec),
    Text(TextSpec),
    DateOfBirth(DateOfBirthSpec),
    DateWindow(DateWindowSpec),
    Select(SelectSpec),
    MultiSelect(SelectSpec),
    Consent,
}

impl FieldKind {
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Number(_) => "number",
            FieldKind::Text(_) => "text",
            FieldKind::DateOfBirth(_) => "date_of_birth",
            FieldKind::DateWindow(_) => "date_window",
            FieldKind::Select(_) => "select",
            FieldKind::MultiSelect(_) => "multi_select",
            FieldKind::Consent => "consent",
        }
    }

    pub fn static_options(&self) -> &[String] {
        match self {
            FieldKind::Select(select) | FieldKind::MultiSelect(select) => &select.options,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NumberSpec {
    /// Key into `config.validation`; defaults to the field id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// Suffix appended to numbers in messages (" mmol/L", "+").
    #[serde(default)]
    pub units: String,
    /// Child selecting the measurement unit, e.g. `glucose.units`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_field: Option<String>,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub rounding: Rounding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<DiagnosticRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetySpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Below,
    AtMost,
    AtLeast,
    Above,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Below => value < threshold,
            Comparison::AtMost => value <= threshold,
            Comparison::AtLeast => value >= threshold,
            Comparison::Above => value > threshold,
        }
    }
}

/// Diagnosis-consistency criterion checked after the plain range passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRule {
    pub threshold: String,
    pub comparison: Comparison,
    /// A second measurement that satisfies the criterion on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative: Option<AlternativeCriterion>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeCriterion {
    pub field: String,
    pub threshold: String,
    pub comparison: Comparison,
}

/// Age/sex derived safety window for a numeric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafetySpec {
    pub sex_field: String,
    pub dob_field: String,
    /// An override only counts once it has been confirmed.
    #[serde(default)]
    pub require_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TextSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DateOfBirthSpec {
    /// Key into `config.validation` holding the permitted age in years.
    pub age_range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DateWindowSpec {
    pub window: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SelectSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Name of a `config.lists` entry supplying the options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_list: Option<String>,
    /// Name of a `config.hierarchies` entry whose top-level names are the options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_hierarchy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_selected: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selected: Option<usize>,
}

/// Side effect run after a field validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Null the targets, unconditionally or when `when` holds.
    Clear {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<Expr>,
        targets: Vec<String>,
    },
    /// Replace the target's options with this field's children in `hierarchy`.
    PopulateOptions { target: String, hierarchy: String },
    /// Re-run the targets' validation so their messages reflect this value.
    Revalidate { targets: Vec<String> },
}
