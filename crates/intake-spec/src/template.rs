//! Message templates for field errors.
//!
//! Every rule renders its message through a named handlebars template so that a
//! schema can reword any message for one field without touching rule code.
//! Field overrides are registered as `<path>::<code>` and win over the default
//! template registered as `<code>`.

use handlebars::{Handlebars, handlebars_helper, no_escape};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::spec::field::FieldSpec;
use crate::spec::schema::SchemaSpec;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{name}' is invalid: {source}")]
    Invalid {
        name: String,
        #[source]
        source: Box<handlebars::TemplateError>,
    },
}

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    ("required", "{{name}} must be provided."),
    ("not_a_number", "{{name}} must be a number."),
    ("not_a_number_optional", "{{name}}, if provided, must be a number."),
    ("min", "{{name}} must be at least {{min}}{{units}}."),
    ("max", "{{name}} must be no more than {{max}}{{units}}."),
    ("min_length", "{{name}} must be at least {{min}} characters."),
    ("max_length", "{{name}} must be no more than {{max}} characters."),
    ("pattern", "{{name}} is not in the expected format."),
    ("select", "{{name}} must be selected."),
    ("option", "{{name}} must be one of the available options."),
    ("unit", "{{name}} units are not recognised."),
    ("min_selected", "At least {{min}} {{plural min \"option\" \"options\"}} must be selected for {{lower name}}."),
    ("max_selected", "No more than {{max}} {{plural max \"option\" \"options\"}} can be selected for {{lower name}}."),
    ("consent", "{{name}} must be given."),
    ("date_invalid", "A valid date must be entered for {{lower name}}."),
    ("datetime_invalid", "A valid date/time must be entered for {{lower name}}."),
    ("date_future", "{{name}} cannot be after today."),
    ("age_max", "Patient age cannot be greater than {{fixed max 0}} years."),
    ("window_past", "{{name}} must be within the past {{hours}} {{plural hours \"hour\" \"hours\"}} of the current date/time."),
    ("window_future", "{{name}} must be no more than {{hours}} {{plural hours \"hour\" \"hours\"}} ahead of the current date/time."),
    ("safety_range", "{{name}} must be within 2 standard deviations of the mean for age (upper limit {{cap}} {{units}}) (range {{fixed lower 2}} {{units}} to {{fixed upper 2}} {{units}})."),
    ("safety_dependency", "{{name}} cannot be checked against the expected range until valid values are entered for: {{fields}}."),
    ("safety_table", "No expected {{lower name}} range is available for {{sex}} patients aged {{months}} months."),
    ("gate_dependency", "{{name}} cannot be validated until {{gate}} has been selected."),
    ("diagnostic", "{{name}} does not meet the diagnostic threshold for DKA."),
];

handlebars_helper!(fixed: |value: f64, digits: u64| format!("{:.*}", digits as usize, value));
handlebars_helper!(lower: |text: str| text.to_lowercase());
handlebars_helper!(plural: |count: f64, one: str, many: str| {
    if count == 1.0 { one.to_string() } else { many.to_string() }
});

/// Registers the helpers every message template may use.
pub fn register_default_helpers(registry: &mut Handlebars<'_>) {
    registry.register_helper("fixed", Box::new(fixed));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("plural", Box::new(plural));
}

pub struct TemplateEngine {
    registry: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(no_escape);
        register_default_helpers(&mut registry);
        for (name, template) in DEFAULT_TEMPLATES {
            // The defaults are compiled into the crate; the test below keeps them valid.
            if let Err(err) = registry.register_template_string(name, template) {
                warn!(template = name, error = %err, "default template rejected");
            }
        }
        Self { registry }
    }

    /// Builds an engine with every message override declared by `schema`.
    pub fn for_schema(schema: &SchemaSpec) -> Result<Self, TemplateError> {
        let mut engine = Self::new();
        for field in &schema.fields {
            engine.register_field(field, None)?;
        }
        Ok(engine)
    }

    fn register_field(&mut self, field: &FieldSpec, parent: Option<&str>) -> Result<(), TemplateError> {
        let path = match parent {
            Some(parent) => format!("{parent}.{}", field.id),
            None => field.id.clone(),
        };
        for (code, template) in &field.messages {
            self.register(&format!("{path}::{code}"), template)?;
        }
        if let crate::spec::field::FieldKind::Number(number) = &field.kind
            && let Some(rule) = &number.diagnostic
        {
            self.register(&format!("{path}::diagnostic"), &rule.message)?;
        }
        for child in &field.children {
            self.register_field(child, Some(&path))?;
        }
        Ok(())
    }

    pub fn register(&mut self, name: &str, template: &str) -> Result<(), TemplateError> {
        self.registry
            .register_template_string(name, template)
            .map_err(|source| TemplateError::Invalid {
                name: name.to_string(),
                source: Box::new(source),
            })
    }

    /// Renders the message for `code` on the field at `path`.
    ///
    /// A render failure falls back to a generic sentence rather than dropping the error.
    pub fn render(&self, path: &str, code: &str, data: &Value) -> String {
        let scoped = format!("{path}::{code}");
        let name = if self.registry.has_template(&scoped) {
            scoped.as_str()
        } else {
            code
        };
        match self.registry.render(name, data) {
            Ok(text) => text,
            Err(err) => {
                warn!(field = path, code, error = %err, "message template failed to render");
                let subject = data.get("name").and_then(Value::as_str).unwrap_or(path);
                format!("{subject} is invalid.")
            }
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
