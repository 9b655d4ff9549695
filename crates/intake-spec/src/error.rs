use thiserror::Error;

use crate::config::ConfigError;
use crate::spec::schema::SchemaError;
use crate::template::TemplateError;

/// Failures of the engine itself. Field-level problems are reported as
/// [`FieldError`](crate::outcome::FieldError)s, never through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("unknown step {0}")]
    UnknownStep(usize),
    #[error("field '{0}' has no safety range")]
    NoSafetyRange(String),
    #[error("no safety range has been computed for '{0}' yet")]
    RangeUnavailable(String),
    #[error("override for '{0}' must be requested before it can be confirmed")]
    OverrideNotRequested(String),
    #[error("intake incomplete: steps {steps:?} have invalid fields {fields:?}")]
    Incomplete { steps: Vec<usize>, fields: Vec<String> },
}
