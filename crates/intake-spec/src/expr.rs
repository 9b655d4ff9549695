use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry::Collaborators;
use crate::value::FieldValue;

/// Condition over collaborator values used for gates, conditional
/// requiredness and conditional clears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Eq { field: String, value: FieldValue },
    Ne { field: String, value: FieldValue },
    In { field: String, values: Vec<FieldValue> },
    Present { field: String },
    And { expressions: Vec<Expr> },
    Or { expressions: Vec<Expr> },
    Not { expression: Box<Expr> },
}

impl Expr {
    fn current<'a>(lookup: &'a dyn Collaborators, path: &str) -> &'a FieldValue {
        static NULL: FieldValue = FieldValue::Null;
        lookup.value(path).unwrap_or(&NULL)
    }

    /// Evaluates the condition. Unknown fields read as null.
    pub fn evaluate(&self, lookup: &dyn Collaborators) -> bool {
        match self {
            Expr::Eq { field, value } => Self::current(lookup, field).matches(value),
            Expr::Ne { field, value } => !Self::current(lookup, field).matches(value),
            Expr::In { field, values } => {
                let current = Self::current(lookup, field);
                values.iter().any(|value| current.matches(value))
            }
            Expr::Present { field } => !Self::current(lookup, field).is_empty(),
            Expr::And { expressions } => expressions.iter().all(|expr| expr.evaluate(lookup)),
            Expr::Or { expressions } => expressions.iter().any(|expr| expr.evaluate(lookup)),
            Expr::Not { expression } => !expression.evaluate(lookup),
        }
    }

    /// Field paths read by the condition, in declaration order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Expr::Eq { field, .. }
            | Expr::Ne { field, .. }
            | Expr::In { field, .. }
            | Expr::Present { field } => vec![field.as_str()],
            Expr::And { expressions } | Expr::Or { expressions } => {
                let mut fields = Vec::new();
                for expr in expressions {
                    for field in expr.fields() {
                        if !fields.contains(&field) {
                            fields.push(field);
                        }
                    }
                }
                fields
            }
            Expr::Not { expression } => expression.fields(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    struct Stub(BTreeMap<&'static str, FieldValue>);

    impl Collaborators for Stub {
        fn value(&self, path: &str) -> Option<&FieldValue> {
            self.0.get(path)
        }

        fn is_valid(&self, _path: &str) -> bool {
            true
        }

        fn label(&self, _path: &str) -> Option<&str> {
            None
        }
    }

    #[test]
    fn ne_treats_missing_as_not_equal() {
        let stub = Stub(BTreeMap::new());
        let expr: Expr = serde_json::from_value(json!({
            "op": "ne", "field": "pH.available", "value": "true"
        }))
        .expect("expr");
        assert!(expr.evaluate(&stub));
    }

    #[test]
    fn boolean_values_match_text_choices() {
        let stub = Stub(BTreeMap::from([("gate", FieldValue::Bool(true))]));
        let expr = Expr::Eq {
            field: "gate".into(),
            value: "true".into(),
        };
        assert!(expr.evaluate(&stub));
        let negated = Expr::Not {
            expression: Box::new(expr),
        };
        assert!(!negated.evaluate(&stub));
    }

    #[test]
    fn nested_fields_are_deduplicated() {
        let expr = Expr::Or {
            expressions: vec![
                Expr::Present { field: "a".into() },
                Expr::And {
                    expressions: vec![
                        Expr::Present { field: "a".into() },
                        Expr::Present { field: "b".into() },
                    ],
                },
            ],
        };
        assert_eq!(expr.fields(), vec!["a", "b"]);
    }
}
