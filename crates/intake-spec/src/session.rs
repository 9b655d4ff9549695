//! A single intake: schema, config, clock and the field registry.

use std::sync::Arc;

use chrono::Months;
use serde_json::json;
use tracing::{debug, info, trace, warn};

use crate::age::{Clock, SystemClock, format_date, format_local, truncate_to_minute};
use crate::answers::AnswerSet;
use crate::config::Config;
use crate::error::EngineError;
use crate::outcome::{ErrorKind, FieldError};
use crate::record::IntakeRecord;
use crate::registry::{Collaborators, FieldNode, Registry};
use crate::resolver::{self, Action};
use crate::rules::{self, RuleContext, Subject};
use crate::safety::SafetyState;
use crate::spec::field::FieldKind;
use crate::spec::schema::SchemaSpec;
use crate::template::TemplateEngine;
use crate::value::{FieldValue, Rounding, format_number, round_to};

/// Gate and prerequisite checks nest at most this deep below a step-level call.
const MAX_DEPTH: usize = 4;

/// Limits a form input should advertise for a field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputBounds {
    pub min: Option<String>,
    pub max: Option<String>,
    pub step: Option<f64>,
}

pub struct IntakeSession {
    schema: Arc<SchemaSpec>,
    config: Arc<Config>,
    templates: Arc<TemplateEngine>,
    clock: Arc<dyn Clock>,
    registry: Registry,
}

impl std::fmt::Debug for IntakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeSession")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl IntakeSession {
    /// Checks schema and config integrity and builds the registry.
    pub fn new(schema: SchemaSpec, config: Config) -> Result<Self, EngineError> {
        Self::with_clock(schema, config, Arc::new(SystemClock))
    }

    pub fn with_clock(schema: SchemaSpec, config: Config, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        schema.check()?;
        config.check_against(&schema)?;
        let templates = TemplateEngine::for_schema(&schema)?;
        let registry = Registry::new(&schema, &config)?;
        info!(schema = %schema.id, version = %schema.version, fields = schema.fields.len(), "intake session ready");
        Ok(Self {
            schema: Arc::new(schema),
            config: Arc::new(config),
            templates: Arc::new(templates),
            clock,
            registry,
        })
    }

    pub fn schema(&self) -> &SchemaSpec {
        &self.schema
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn node(&self, path: &str) -> Result<&FieldNode, EngineError> {
        self.registry
            .get(path)
            .ok_or_else(|| EngineError::UnknownField(path.to_string()))
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut FieldNode, EngineError> {
        self.registry
            .get_mut(path)
            .ok_or_else(|| EngineError::UnknownField(path.to_string()))
    }

    pub fn value(&self, path: &str) -> Result<&FieldValue, EngineError> {
        Ok(&self.node(path)?.value)
    }

    /// Stores a raw value. Nothing is validated until asked.
    pub fn set_value(&mut self, path: &str, value: impl Into<FieldValue>) -> Result<(), EngineError> {
        let node = self.node_mut(path)?;
        node.value = value.into();
        trace!(field = path, "value set");
        Ok(())
    }

    /// Sets and immediately validates, as an input's change handler would.
    pub fn edit(&mut self, path: &str, value: impl Into<FieldValue>) -> Result<bool, EngineError> {
        self.set_value(path, value)?;
        self.validate(path, false)
    }

    /// Validates one field, running its gates, prerequisites and effects.
    pub fn validate(&mut self, path: &str, optional: bool) -> Result<bool, EngineError> {
        self.node(path)?;
        Ok(self.validate_at(path, optional, 0))
    }

    fn validate_at(&mut self, path: &str, optional: bool, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            warn!(field = path, depth, "validation nested too deep; treating as invalid");
            return false;
        }
        let schema = Arc::clone(&self.schema);
        let Some(spec) = schema.field(path) else {
            warn!(field = path, "validation requested for unknown field");
            return false;
        };
        let empty = self.registry.get(path).is_none_or(|node| node.value.is_empty());
        if optional && empty {
            self.settle(path, Vec::new());
            return true;
        }

        if let Some(condition) = &spec.applies_when {
            for gate in condition.fields() {
                if gate != path && !self.validate_at(gate, false, depth + 1) {
                    let label = self.registry.label(gate).unwrap_or(gate).to_string();
                    let error = self.render_error(
                        path,
                        ErrorKind::DependencyUnavailable,
                        "gate_dependency",
                        json!({ "gate": label }),
                    );
                    self.settle(path, vec![error]);
                    return false;
                }
            }
            if !condition.evaluate(&self.registry) {
                debug!(field = path, "inapplicable; value not checked");
                self.settle(path, Vec::new());
                return true;
            }
        }

        for prerequisite in &spec.requires {
            self.validate_at(prerequisite, false, depth + 1);
        }

        let outcome = {
            let Some(node) = self.registry.get(path) else {
                return false;
            };
            let ctx = RuleContext {
                schema: &schema,
                config: &self.config,
                templates: &self.templates,
                collaborators: &self.registry,
                now: self.clock.now(),
            };
            let subject = Subject {
                path,
                spec,
                value: &node.value,
                options: &node.options,
                safety: node.safety.as_ref(),
            };
            rules::evaluate(&subject, &ctx)
        };
        let valid = outcome.is_valid();
        debug!(field = path, valid, depth, errors = outcome.errors.len(), "validated");
        if let Some(node) = self.registry.get_mut(path) {
            node.apply(outcome);
        }

        let actions = resolver::plan(spec, path, &self.registry, &self.config);
        self.run_actions(path, actions, depth);
        valid
    }

    fn run_actions(&mut self, source: &str, actions: Vec<Action>, depth: usize) {
        for action in actions {
            match action {
                Action::Clear(target) => {
                    if let Some(node) = self.registry.get_mut(&target)
                        && !node.value.is_empty()
                    {
                        debug!(field = source, target = %target, "cleared dependent value");
                        node.value = FieldValue::Null;
                    }
                }
                Action::Populate { target, options } => {
                    if let Some(node) = self.registry.get_mut(&target) {
                        node.options = options;
                    }
                }
                Action::Revalidate(target) => {
                    if depth == 0 {
                        self.validate_at(&target, false, depth + 1);
                    } else {
                        trace!(field = source, target = %target, "nested revalidation skipped");
                    }
                }
            }
        }
    }

    fn settle(&mut self, path: &str, errors: Vec<FieldError>) {
        if let Some(node) = self.registry.get_mut(path) {
            node.settle(errors);
        }
    }

    fn render_error(&self, path: &str, kind: ErrorKind, code: &str, extra: serde_json::Value) -> FieldError {
        let mut data = json!({
            "name": self.schema.field(path).map(|spec| spec.display_name()).unwrap_or(path),
        });
        if let (serde_json::Value::Object(base), serde_json::Value::Object(extra)) = (&mut data, extra) {
            base.extend(extra);
        }
        FieldError {
            kind,
            code: code.to_string(),
            message: self.templates.render(path, code, &data),
        }
    }

    /// Validates every field assigned to `step`, children first; true only if all pass.
    pub fn step_is_valid(&mut self, step: usize) -> Result<bool, EngineError> {
        if self.schema.step(step).is_none() {
            return Err(EngineError::UnknownStep(step));
        }
        let schema = Arc::clone(&self.schema);
        let mut valid = true;
        for field in schema.fields_in_step(step) {
            let optional = field.optional_in_steps.contains(&step);
            for child in &field.children {
                let path = format!("{}.{}", field.id, child.id);
                if !self.validate_at(&path, optional, 0) {
                    valid = false;
                }
            }
            if !self.validate_at(&field.id, optional, 0) {
                valid = false;
            }
        }
        info!(step, valid, "step validated");
        Ok(valid)
    }

    /// Indices of steps that currently fail, validating each in order.
    pub fn failing_steps(&mut self) -> Vec<usize> {
        let indices: Vec<usize> = self.schema.steps.iter().map(|step| step.index).collect();
        indices
            .into_iter()
            .filter(|&step| !self.step_is_valid(step).unwrap_or(false))
            .collect()
    }

    /// Loads an answer set: values in schema order, then override flags.
    pub fn apply(&mut self, answers: &AnswerSet) -> Result<(), EngineError> {
        for path in answers.values.keys().chain(answers.overrides.keys()) {
            self.node(path)?;
        }
        for path in self.schema.paths() {
            if let Some(value) = answers.values.get(&path) {
                self.set_value(&path, value.clone())?;
            }
        }
        for (path, flags) in &answers.overrides {
            let state = self.safety_mut(path)?;
            state.overridden = flags.overridden;
            state.override_confirm = flags.overridden && flags.override_confirm;
            state.use_2sd = flags.use_2sd;
        }
        debug!(values = answers.values.len(), overrides = answers.overrides.len(), "answers applied");
        Ok(())
    }

    pub fn safety(&self, path: &str) -> Result<&SafetyState, EngineError> {
        self.node(path)?
            .safety
            .as_ref()
            .ok_or_else(|| EngineError::NoSafetyRange(path.to_string()))
    }

    fn safety_mut(&mut self, path: &str) -> Result<&mut SafetyState, EngineError> {
        self.node_mut(path)?
            .safety
            .as_mut()
            .ok_or_else(|| EngineError::NoSafetyRange(path.to_string()))
    }

    /// Accepts or withdraws a value outside the safety window.
    pub fn set_override(&mut self, path: &str, accepted: bool) -> Result<(), EngineError> {
        let state = self.safety_mut(path)?;
        state.overridden = accepted;
        if !accepted {
            state.override_confirm = false;
        }
        info!(field = path, accepted, "safety override set");
        Ok(())
    }

    pub fn confirm_override(&mut self, path: &str, confirmed: bool) -> Result<(), EngineError> {
        let state = self.safety_mut(path)?;
        if confirmed && !state.overridden {
            return Err(EngineError::OverrideNotRequested(path.to_string()));
        }
        state.override_confirm = confirmed;
        info!(field = path, confirmed, "safety override confirmation set");
        Ok(())
    }

    /// Replaces the value with the upper safety bound and records that it was adopted.
    pub fn adopt_upper_bound(&mut self, path: &str) -> Result<f64, EngineError> {
        let range = self
            .safety(path)?
            .range
            .ok_or_else(|| EngineError::RangeUnavailable(path.to_string()))?;
        let upper = range.upper_2dp();
        let node = self.node_mut(path)?;
        node.value = FieldValue::Number(upper);
        if let Some(state) = node.safety.as_mut() {
            state.use_2sd = true;
        }
        info!(field = path, "upper safety bound adopted");
        self.validate_at(path, false, 0);
        Ok(upper)
    }

    /// Limits for the field's input control given the current clock and unit.
    pub fn bounds_for(&self, path: &str) -> Result<InputBounds, EngineError> {
        let spec = self
            .schema
            .field(path)
            .ok_or_else(|| EngineError::UnknownField(path.to_string()))?;
        let now = self.clock.now();
        let bounds = match &spec.kind {
            FieldKind::Number(number) => {
                let unit = number
                    .unit_field
                    .as_deref()
                    .and_then(|unit_field| self.registry.value(unit_field))
                    .and_then(|value| value.as_text())
                    .filter(|text| !text.trim().is_empty())
                    .map(|text| text.into_owned());
                let key = number.range.as_deref().unwrap_or(&spec.id);
                let resolved = self.config.bounds(key, unit.as_deref())?;
                let precision = resolved.precision.unwrap_or(number.precision);
                InputBounds {
                    min: Some(format_number(resolved.min)),
                    max: Some(format_number(resolved.max)),
                    step: Some(round_to(10f64.powi(-(precision as i32)), precision, Rounding::Round)),
                }
            }
            FieldKind::DateOfBirth(dob) => {
                let max_age = self.config.bounds(&dob.age_range, None)?.max;
                let months = Months::new(((max_age.max(0.0) as u32) + 1) * 12);
                InputBounds {
                    min: now.checked_sub_months(months).map(format_date),
                    max: Some(format_date(now)),
                    step: None,
                }
            }
            FieldKind::DateWindow(window) => {
                let window = self.config.window(&window.window)?;
                let now = truncate_to_minute(now).unwrap_or(now);
                InputBounds {
                    min: Some(format_local(now - chrono::Duration::hours(window.within_past_hours))),
                    max: Some(format_local(now + chrono::Duration::hours(window.within_future_hours))),
                    step: None,
                }
            }
            _ => InputBounds::default(),
        };
        Ok(bounds)
    }

    /// Returns every field to its schema default.
    pub fn reset(&mut self) {
        self.registry.reset();
        info!("intake reset");
    }

    /// Builds the record once every step validates.
    pub fn record(&mut self) -> Result<IntakeRecord, EngineError> {
        let failing = self.failing_steps();
        if !failing.is_empty() {
            let fields = self
                .registry
                .walk()
                .filter(|node| node.last_result == Some(false))
                .map(|node| node.path.clone())
                .collect();
            return Err(EngineError::Incomplete { steps: failing, fields });
        }
        Ok(IntakeRecord::from_registry(&self.schema, &self.registry))
    }
}
