pub mod field;
pub mod schema;

pub use field::{
    AlternativeCriterion, Comparison, DateOfBirthSpec, DateWindowSpec, DiagnosticRule, Effect,
    FieldKind, FieldSpec, NumberSpec, SafetySpec, SelectSpec, TextSpec,
};
pub use schema::{SchemaError, SchemaSpec, StepSpec};
