//! Clinical threshold checks (pH, bicarbonate, glucose, ketones).

use serde_json::json;
use tracing::{debug, warn};

use crate::outcome::{ErrorKind, FieldError};
use crate::rules::{RuleContext, Subject};
use crate::spec::field::{AlternativeCriterion, DiagnosticRule, FieldKind};
use crate::value::{format_number, round_to};

/// Evaluates `rule` for an in-range `value`. `unit` selects per-unit thresholds.
pub fn evaluate(
    rule: &DiagnosticRule,
    subject: &Subject<'_>,
    value: f64,
    unit: Option<&str>,
    units: &str,
    ctx: &RuleContext<'_>,
) -> Option<FieldError> {
    let threshold = match ctx.config.threshold(&rule.threshold, unit) {
        Ok(threshold) => threshold,
        Err(err) => {
            warn!(field = subject.path, error = %err, "diagnostic threshold unavailable");
            return Some(ctx.error(subject, ErrorKind::Selection, "unit", json!({})));
        }
    };
    if rule.comparison.holds(value, threshold) {
        return None;
    }

    let mut data = json!({
        "threshold": format_number(threshold),
        "units": units,
    });
    if let Some(alternative) = &rule.alternative {
        if alternative_met(alternative, ctx) {
            debug!(field = subject.path, alternative = %alternative.field, "diagnostic met by alternative");
            return None;
        }
        data["alternative"] = json!(
            ctx.collaborators
                .label(&alternative.field)
                .unwrap_or(&alternative.field)
        );
        if let Ok(threshold) = ctx.config.threshold(&alternative.threshold, None) {
            data["alternativeThreshold"] = json!(format_number(threshold));
        }
    }
    Some(ctx.error(subject, ErrorKind::Diagnostic, "diagnostic", data))
}

/// The alternative counts only when its value, normalized the way its own
/// validation would store it, is a number inside its own bounds.
fn alternative_met(alternative: &AlternativeCriterion, ctx: &RuleContext<'_>) -> bool {
    let Some(raw) = ctx
        .collaborators
        .value(&alternative.field)
        .and_then(|value| value.as_number())
    else {
        return false;
    };
    let Ok(threshold) = ctx.config.threshold(&alternative.threshold, None) else {
        return false;
    };
    let Some((spec, FieldKind::Number(number))) = ctx.schema.field(&alternative.field).map(|spec| (spec, &spec.kind))
    else {
        return false;
    };
    let unit = number
        .unit_field
        .as_deref()
        .and_then(|path| ctx.collaborators.value(path))
        .and_then(|value| value.as_text())
        .filter(|text| !text.trim().is_empty())
        .map(|text| text.into_owned());
    let key = number.range.as_deref().unwrap_or(&spec.id);
    let Ok(bounds) = ctx.config.bounds(key, unit.as_deref()) else {
        return false;
    };
    let value = round_to(raw, bounds.precision.unwrap_or(number.precision), number.rounding);
    value >= bounds.min && value <= bounds.max && alternative.comparison.holds(value, threshold)
}
