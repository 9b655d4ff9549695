use std::sync::Arc;

use serde::Serialize;

use crate::age::{Clock, SystemClock};
use crate::answers::AnswerSet;
use crate::config::Config;
use crate::error::EngineError;
use crate::outcome::FieldError;
use crate::session::IntakeSession;
use crate::spec::schema::SchemaSpec;
use crate::value::FieldValue;
use crate::visibility::resolve_visibility;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReport {
    pub path: String,
    pub label: String,
    pub valid: bool,
    /// False when the field's availability gate excludes it.
    pub active: bool,
    pub value: FieldValue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub valid: bool,
    pub fields: Vec<FieldReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub schema_id: String,
    pub schema_title: String,
    pub valid: bool,
    pub steps: Vec<StepReport>,
}

impl ValidationResult {
    pub fn valid_steps(&self) -> usize {
        self.steps.iter().filter(|step| step.valid).count()
    }
}

impl IntakeSession {
    /// Validates `step` and reports every field in it, gates included.
    pub fn validate_step(&mut self, step: usize) -> Result<StepReport, EngineError> {
        let valid = self.step_is_valid(step)?;
        let visibility = resolve_visibility(self.schema(), self.registry());
        let schema = self.schema();
        let registry = self.registry();
        let meta = schema.step(step).ok_or(EngineError::UnknownStep(step))?;

        let mut fields = Vec::new();
        for field in schema.fields_in_step(step) {
            for node in registry
                .nodes()
                .iter()
                .filter(|node| node.id == field.id)
                .flat_map(|node| std::iter::once(node).chain(node.children.iter()))
            {
                fields.push(FieldReport {
                    path: node.path.clone(),
                    label: node.label.clone(),
                    valid: node.is_valid(),
                    active: visibility.get(&node.path).copied().unwrap_or(true),
                    value: node.value.clone(),
                    errors: node.errors.clone(),
                });
            }
        }
        Ok(StepReport {
            index: meta.index,
            id: meta.id.clone(),
            title: meta.title.clone(),
            valid,
            fields,
        })
    }

    /// Validates every step in declaration order.
    pub fn report(&mut self) -> Result<ValidationResult, EngineError> {
        let indices: Vec<usize> = self.schema().steps.iter().map(|step| step.index).collect();
        let steps = indices
            .into_iter()
            .map(|step| self.validate_step(step))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ValidationResult {
            schema_id: self.schema().id.clone(),
            schema_title: self.schema().title.clone(),
            valid: steps.iter().all(|step| step.valid),
            steps,
        })
    }
}

/// Applies `answers` to a fresh session and validates every step.
pub fn validate(schema: SchemaSpec, config: Config, answers: &AnswerSet) -> Result<ValidationResult, EngineError> {
    validate_with_clock(schema, config, answers, Arc::new(SystemClock))
}

pub fn validate_with_clock(
    schema: SchemaSpec,
    config: Config,
    answers: &AnswerSet,
    clock: Arc<dyn Clock>,
) -> Result<ValidationResult, EngineError> {
    let mut session = IntakeSession::with_clock(schema, config, clock)?;
    session.apply(answers)?;
    session.report()
}
