use serde_json::{Value, json};

use crate::validate::{FieldReport, ValidationResult};
use crate::value::FieldValue;

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// Every step validates; a record can be built.
    Complete,
    /// At least one field needs correcting.
    NeedInput,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::Complete => "complete",
            RenderStatus::NeedInput => "need_input",
        }
    }

    pub fn of(result: &ValidationResult) -> Self {
        if result.valid {
            RenderStatus::Complete
        } else {
            RenderStatus::NeedInput
        }
    }
}

/// Render a validation result as a structured JSON value.
pub fn render_json(result: &ValidationResult) -> Value {
    json!({
        "schemaId": result.schema_id,
        "schemaTitle": result.schema_title,
        "status": RenderStatus::of(result).as_str(),
        "progress": {
            "valid": result.valid_steps(),
            "total": result.steps.len(),
        },
        "steps": result.steps,
    })
}

/// Render a validation result as human-friendly text.
pub fn render_text(result: &ValidationResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Intake: {} ({})", result.schema_title, result.schema_id));
    lines.push(format!(
        "Status: {} ({}/{} steps valid)",
        RenderStatus::of(result).as_str(),
        result.valid_steps(),
        result.steps.len()
    ));

    for step in &result.steps {
        let verdict = if step.valid { "valid" } else { "invalid" };
        lines.push(format!("Step {} {}: {}", step.index, step.title, verdict));
        for field in &step.fields {
            lines.push(field_line(field));
            for error in &field.errors {
                lines.push(format!("     {}", error.message));
            }
        }
    }

    lines.join("\n")
}

fn field_line(field: &FieldReport) -> String {
    let mut entry = format!(" - {} ({})", field.path, field.label);
    if !field.active {
        entry.push_str(" [not applicable]");
    } else if !field.valid {
        entry.push_str(" [invalid]");
    }
    if !field.value.is_empty() {
        entry.push_str(&format!(" = {}", value_to_display(&field.value)));
    }
    entry
}

fn value_to_display(value: &FieldValue) -> String {
    match value {
        FieldValue::List(items) => items.join(", "),
        other => other.as_text().map(|text| text.into_owned()).unwrap_or_default(),
    }
}
