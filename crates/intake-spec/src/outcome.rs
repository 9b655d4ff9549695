use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::safety::SafetyState;
use crate::value::FieldValue;

/// Category of a field-level violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Required value missing.
    Presence,
    /// Value cannot be read as the expected type.
    Parse,
    /// Parsed value outside its configured bounds or date window.
    Range,
    Length,
    Format,
    /// Selection missing or not among the offered options.
    Selection,
    /// Outside the age/sex safety window; recoverable by override.
    SafetyRange,
    /// Inconsistent with a clinical threshold.
    Diagnostic,
    /// A prerequisite field is itself invalid or unselected.
    DependencyUnavailable,
}

/// A message displayed verbatim next to the offending input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

/// Result of running one field rule; applied to the node by the session.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub errors: Vec<FieldError>,
    pub normalized: Option<FieldValue>,
    pub derived: Vec<(String, FieldValue)>,
    pub safety: Option<SafetyState>,
}

impl Outcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Space-joined display text for a list of errors.
pub fn join_messages(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
