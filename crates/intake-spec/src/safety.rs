//! Age/sex safety window for weight and its override flags.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::age::{age_in_years, age_months, parse_local};
use crate::outcome::{ErrorKind, FieldError};
use crate::rules::{RuleContext, Subject};
use crate::spec::field::SafetySpec;
use crate::value::{Rounding, format_number, round_to};

/// Expected band for one sex and age; `upper` is already capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SafetyRange {
    pub lower: f64,
    pub upper: f64,
    pub cap: f64,
}

impl SafetyRange {
    pub fn lower_2dp(&self) -> f64 {
        round_to(self.lower, 2, Rounding::Round)
    }

    pub fn upper_2dp(&self) -> f64 {
        round_to(self.upper, 2, Rounding::Round)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower_2dp() && value <= self.upper_2dp()
    }
}

/// Flags carried by a field with a safety range. Read by rendering and audit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafetyState {
    pub exceeded: bool,
    #[serde(rename = "override")]
    pub overridden: bool,
    pub override_confirm: bool,
    #[serde(rename = "use2SD")]
    pub use_2sd: bool,
    /// Range computed by the most recent successful lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<SafetyRange>,
}

impl SafetyState {
    /// Drops `use2SD` once the value no longer equals the previously computed upper bound.
    pub fn track_adopted_value(&mut self, value: f64) {
        if self.use_2sd
            && let Some(range) = self.range
            && range.upper_2dp() != value
        {
            self.use_2sd = false;
        }
    }

    fn accepted(&self, spec: &SafetySpec) -> bool {
        self.overridden && (!spec.require_confirmation || self.override_confirm)
    }
}

/// Checks `value` against the sex/age window. Runs only after the global range passed.
pub fn resolve(
    spec: &SafetySpec,
    subject: &Subject<'_>,
    value: f64,
    units: &str,
    mut state: SafetyState,
    ctx: &RuleContext<'_>,
) -> (SafetyState, Option<FieldError>) {
    let prerequisites = [spec.dob_field.as_str(), spec.sex_field.as_str()];
    let sex = ctx
        .collaborators
        .value(&spec.sex_field)
        .and_then(|value| value.as_text())
        .map(|text| text.into_owned());
    let dob = ctx
        .collaborators
        .value(&spec.dob_field)
        .and_then(|value| value.as_text())
        .and_then(|text| parse_local(&text));

    let unavailable: Vec<&str> = prerequisites
        .into_iter()
        .filter(|path| !ctx.collaborators.is_valid(path))
        .map(|path| ctx.collaborators.label(path).unwrap_or(path))
        .collect();
    let (Some(sex), Some(dob), true) = (sex, dob, unavailable.is_empty()) else {
        let fields = if unavailable.is_empty() {
            prerequisites
                .into_iter()
                .map(|path| ctx.collaborators.label(path).unwrap_or(path))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            unavailable.join(", ")
        };
        let error = ctx.error(
            subject,
            ErrorKind::DependencyUnavailable,
            "safety_dependency",
            json!({ "fields": fields }),
        );
        return (state, Some(error));
    };

    let months = age_months(age_in_years(dob, ctx.now));
    let Some(range) = ctx
        .config
        .weight_limits
        .as_ref()
        .and_then(|limits| limits.range(&sex, months))
    else {
        let error = ctx.error(
            subject,
            ErrorKind::DependencyUnavailable,
            "safety_table",
            json!({ "sex": sex, "months": months }),
        );
        return (state, Some(error));
    };

    if state.use_2sd && state.range.unwrap_or(range).upper_2dp() != value {
        state.use_2sd = false;
    }
    state.range = Some(range);

    if range.contains(value) {
        state.exceeded = false;
        state.overridden = false;
        state.override_confirm = false;
        return (state, None);
    }

    state.exceeded = true;
    if state.accepted(spec) {
        return (state, None);
    }
    let error = ctx.error(
        subject,
        ErrorKind::SafetyRange,
        "safety_range",
        json!({
            "lower": range.lower_2dp(),
            "upper": range.upper_2dp(),
            "cap": format_number(range.cap),
            "units": units.trim(),
        }),
    );
    (state, Some(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopted_value_survives_until_edited() {
        let mut state = SafetyState {
            use_2sd: true,
            range: Some(SafetyRange {
                lower: 13.7,
                upper: 24.657,
                cap: 75.0,
            }),
            ..SafetyState::default()
        };
        state.track_adopted_value(24.66);
        assert!(state.use_2sd);
        state.track_adopted_value(24.0);
        assert!(!state.use_2sd);
    }

    #[test]
    fn range_compares_at_two_decimals() {
        let range = SafetyRange {
            lower: 13.704,
            upper: 24.657,
            cap: 75.0,
        };
        assert!(range.contains(13.70));
        assert!(range.contains(24.66));
        assert!(!range.contains(24.67));
    }

    #[test]
    fn serialized_flags_use_audit_names() {
        let value = serde_json::to_value(SafetyState {
            overridden: true,
            ..SafetyState::default()
        })
        .expect("json");
        assert_eq!(value["override"], true);
        assert_eq!(value["use2SD"], false);
        assert_eq!(value["overrideConfirm"], false);
    }
}
