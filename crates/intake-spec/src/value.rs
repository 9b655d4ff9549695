use std::borrow::Cow;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Value held by a field node.
///
/// Selection fields carry their choice as text (`"true"`, `"male"`), so a JSON
/// `true` and the string `"true"` compare equal through [`FieldValue::as_text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// True for null, blank text and empty lists.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            FieldValue::Text(text) => Some(Cow::Borrowed(text.as_str())),
            FieldValue::Bool(flag) => Some(Cow::Owned(flag.to_string())),
            FieldValue::Number(number) => Some(Cow::Owned(format_number(*number))),
            FieldValue::Null | FieldValue::List(_) => None,
        }
    }

    /// Parses the value as a finite number. Text is trimmed before parsing.
    pub fn as_number(&self) -> Option<f64> {
        let number = match self {
            FieldValue::Number(number) => *number,
            FieldValue::Text(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        number.is_finite().then_some(number)
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(flag) => Some(*flag),
            FieldValue::Text(text) => match text.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Textual equality used by conditions; null only matches null.
    pub fn matches(&self, other: &FieldValue) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => true,
            (false, false) => match (self.as_text(), other.as_text()) {
                (Some(left), Some(right)) => left == right,
                _ => self == other,
            },
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

/// Formats a number without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}

/// Rounding applied when a numeric field normalizes its precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    #[default]
    Round,
    Truncate,
}

pub fn round_to(value: f64, decimals: u32, rounding: Rounding) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    let scaled = match rounding {
        Rounding::Round => scaled.round(),
        Rounding::Truncate => scaled.trunc(),
    };
    scaled / factor
}
