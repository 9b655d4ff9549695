#![allow(missing_docs)]

pub mod age;
pub mod answers;
pub mod checks;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod expr;
pub mod outcome;
pub mod record;
pub mod registry;
mod resolver;
pub mod render;
pub mod rules;
pub mod safety;
pub mod session;
pub mod spec;
pub mod template;
pub mod validate;
pub mod value;
pub mod visibility;

pub use age::{Clock, FixedClock, SystemClock};
pub use answers::{AnswerSet, OverrideInput, demo_answers};
pub use config::{Config, ConfigError};
pub use error::EngineError;
pub use expr::Expr;
pub use outcome::{ErrorKind, FieldError};
pub use record::{IntakeRecord, SafetyAudit};
pub use registry::{Collaborators, FieldNode, Registry};
pub use render::{RenderStatus, render_json, render_text};
pub use safety::{SafetyRange, SafetyState};
pub use session::{InputBounds, IntakeSession};
pub use spec::{FieldKind, FieldSpec, SchemaError, SchemaSpec, StepSpec};
pub use template::{TemplateEngine, TemplateError, register_default_helpers};
pub use validate::{FieldReport, StepReport, ValidationResult, validate, validate_with_clock};
pub use value::FieldValue;
