//! Per-kind field rules.
//!
//! Rules are pure: they read the field's own state plus whatever the
//! [`Collaborators`] expose and return an [`Outcome`]. Writing the outcome back
//! and running effects is the session's job.

use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::age::{age_in_years, age_months, format_date, format_local, has_time, parse_local, truncate_to_minute};
use crate::checks::{check_length, check_number_range};
use crate::config::Config;
use crate::diagnostic;
use crate::outcome::{ErrorKind, FieldError, Outcome};
use crate::registry::Collaborators;
use crate::safety::{self, SafetyState};
use crate::spec::field::{
    DateOfBirthSpec, DateWindowSpec, FieldKind, FieldSpec, NumberSpec, SelectSpec, TextSpec,
};
use crate::spec::schema::SchemaSpec;
use crate::template::TemplateEngine;
use crate::value::{FieldValue, format_number, round_to};

/// Derived value keys written by date-of-birth fields.
pub const AGE_YEARS: &str = "ageYears";
pub const AGE_MONTHS: &str = "ageMonths";

pub struct RuleContext<'a> {
    pub schema: &'a SchemaSpec,
    pub config: &'a Config,
    pub templates: &'a TemplateEngine,
    pub collaborators: &'a dyn Collaborators,
    pub now: NaiveDateTime,
}

/// The field being validated.
pub struct Subject<'a> {
    pub path: &'a str,
    pub spec: &'a FieldSpec,
    pub value: &'a FieldValue,
    pub options: &'a [String],
    pub safety: Option<&'a SafetyState>,
}

impl RuleContext<'_> {
    /// Renders `code` for `subject`; `extra` is merged over `{name, label}`.
    pub fn error(&self, subject: &Subject<'_>, kind: ErrorKind, code: &str, extra: Value) -> FieldError {
        let mut data = json!({
            "name": subject.spec.display_name(),
            "label": subject.spec.label,
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut data, extra) {
            base.extend(extra);
        }
        FieldError {
            kind,
            code: code.to_string(),
            message: self.templates.render(subject.path, code, &data),
        }
    }
}

/// Runs the rule for the subject's kind.
pub fn evaluate(subject: &Subject<'_>, ctx: &RuleContext<'_>) -> Outcome {
    let required = match &subject.spec.required_when {
        Some(condition) => condition.evaluate(ctx.collaborators),
        None => subject.spec.required,
    };
    match &subject.spec.kind {
        FieldKind::Number(spec) => number(spec, subject, required, ctx),
        FieldKind::Text(spec) => text(spec, subject, required, ctx),
        FieldKind::DateOfBirth(spec) => date_of_birth(spec, subject, required, ctx),
        FieldKind::DateWindow(spec) => date_window(spec, subject, required, ctx),
        FieldKind::Select(spec) => select(spec, subject, required, ctx),
        FieldKind::MultiSelect(spec) => multi_select(spec, subject, required, ctx),
        FieldKind::Consent => consent(subject, ctx),
    }
}

fn number(spec: &NumberSpec, subject: &Subject<'_>, required: bool, ctx: &RuleContext<'_>) -> Outcome {
    let mut outcome = Outcome::default();
    if subject.value.is_empty() {
        if required {
            outcome.errors.push(ctx.error(subject, ErrorKind::Presence, "required", json!({})));
        }
        return outcome;
    }
    let Some(raw) = subject.value.as_number() else {
        let code = if required { "not_a_number" } else { "not_a_number_optional" };
        outcome.errors.push(ctx.error(subject, ErrorKind::Parse, code, json!({})));
        return outcome;
    };

    let unit = spec
        .unit_field
        .as_deref()
        .and_then(|path| ctx.collaborators.value(path))
        .and_then(|value| value.as_text())
        .filter(|text| !text.trim().is_empty())
        .map(|text| text.into_owned());
    let key = spec.range.as_deref().unwrap_or(&subject.spec.id);
    let bounds = match ctx.config.bounds(key, unit.as_deref()) {
        Ok(bounds) => bounds,
        Err(err) => {
            debug!(field = subject.path, error = %err, "no bounds for selected unit");
            outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "unit", json!({})));
            return outcome;
        }
    };
    let value = round_to(raw, bounds.precision.unwrap_or(spec.precision), spec.rounding);
    outcome.normalized = Some(FieldValue::Number(value));

    let mut safety_state = subject.safety.copied();
    if let Some(state) = safety_state.as_mut() {
        state.track_adopted_value(value);
    }
    outcome.safety = safety_state;

    let units = match &bounds.unit {
        Some(unit) if spec.units.is_empty() => format!(" {unit}"),
        _ => spec.units.clone(),
    };
    for code in check_number_range(value, bounds.min, bounds.max) {
        outcome.errors.push(ctx.error(
            subject,
            ErrorKind::Range,
            code,
            json!({
                "min": format_number(bounds.min),
                "max": format_number(bounds.max),
                "units": units,
            }),
        ));
    }
    if !outcome.errors.is_empty() {
        return outcome;
    }

    if let Some(rule) = &spec.diagnostic
        && let Some(error) = diagnostic::evaluate(rule, subject, value, bounds.unit.as_deref(), &units, ctx)
    {
        outcome.errors.push(error);
    }
    if let Some(safety_spec) = &spec.safety {
        let (state, error) = safety::resolve(
            safety_spec,
            subject,
            value,
            &units,
            safety_state.unwrap_or_default(),
            ctx,
        );
        outcome.safety = Some(state);
        outcome.errors.extend(error);
    }
    outcome
}

fn text(spec: &TextSpec, subject: &Subject<'_>, required: bool, ctx: &RuleContext<'_>) -> Outcome {
    let mut outcome = Outcome::default();
    if subject.value.is_empty() {
        if required {
            outcome.errors.push(ctx.error(subject, ErrorKind::Presence, "required", json!({})));
        }
        return outcome;
    }
    let Some(text) = subject.value.as_text() else {
        outcome.errors.push(ctx.error(subject, ErrorKind::Format, "pattern", json!({})));
        return outcome;
    };
    for code in check_length(&text, spec.min_length, spec.max_length) {
        outcome.errors.push(ctx.error(
            subject,
            ErrorKind::Length,
            code,
            json!({ "min": spec.min_length, "max": spec.max_length }),
        ));
    }
    if let Some(pattern) = &spec.pattern {
        match Regex::new(pattern) {
            Ok(regex) if !regex.is_match(&text) => {
                outcome.errors.push(ctx.error(subject, ErrorKind::Format, "pattern", json!({})));
            }
            Ok(_) => {}
            Err(err) => warn!(field = subject.path, error = %err, "text pattern does not compile"),
        }
    }
    outcome
}

fn date_of_birth(
    spec: &DateOfBirthSpec,
    subject: &Subject<'_>,
    required: bool,
    ctx: &RuleContext<'_>,
) -> Outcome {
    let mut outcome = Outcome::default();
    if subject.value.is_empty() {
        if required {
            outcome.errors.push(ctx.error(subject, ErrorKind::Presence, "required", json!({})));
        }
        return outcome;
    }
    let raw = subject.value.as_text().unwrap_or_default();
    let Some(dob) = parse_local(&raw) else {
        outcome.errors.push(ctx.error(subject, ErrorKind::Parse, "date_invalid", json!({})));
        return outcome;
    };
    outcome.normalized = Some(FieldValue::Text(if has_time(&raw) {
        format_local(dob)
    } else {
        format_date(dob)
    }));

    if dob > ctx.now {
        outcome.errors.push(ctx.error(subject, ErrorKind::Range, "date_future", json!({})));
        return outcome;
    }
    let years = age_in_years(dob, ctx.now);
    outcome.derived = vec![
        (AGE_YEARS.to_string(), FieldValue::Number(years)),
        (AGE_MONTHS.to_string(), FieldValue::Number(f64::from(age_months(years)))),
    ];
    match ctx.config.bounds(&spec.age_range, None) {
        Ok(bounds) if years > bounds.max => {
            outcome.errors.push(ctx.error(
                subject,
                ErrorKind::Range,
                "age_max",
                json!({ "max": bounds.max }),
            ));
        }
        Ok(_) => {}
        Err(err) => warn!(field = subject.path, error = %err, "age range unavailable"),
    }
    outcome
}

fn date_window(
    spec: &DateWindowSpec,
    subject: &Subject<'_>,
    required: bool,
    ctx: &RuleContext<'_>,
) -> Outcome {
    let mut outcome = Outcome::default();
    if subject.value.is_empty() {
        if required {
            outcome.errors.push(ctx.error(subject, ErrorKind::Presence, "required", json!({})));
        }
        return outcome;
    }
    let Some(datetime) = subject
        .value
        .as_text()
        .filter(|raw| has_time(raw))
        .and_then(|raw| parse_local(&raw))
    else {
        outcome.errors.push(ctx.error(subject, ErrorKind::Parse, "datetime_invalid", json!({})));
        return outcome;
    };
    outcome.normalized = Some(FieldValue::Text(format_local(datetime)));

    let window = match ctx.config.window(&spec.window) {
        Ok(window) => window,
        Err(err) => {
            warn!(field = subject.path, error = %err, "date window unavailable");
            return outcome;
        }
    };
    let now = truncate_to_minute(ctx.now).unwrap_or(ctx.now);
    let earliest = now - Duration::hours(window.within_past_hours);
    let latest = now + Duration::hours(window.within_future_hours);
    if datetime < earliest {
        outcome.errors.push(ctx.error(
            subject,
            ErrorKind::Range,
            "window_past",
            json!({ "hours": window.within_past_hours }),
        ));
    } else if datetime > latest {
        outcome.errors.push(ctx.error(
            subject,
            ErrorKind::Range,
            "window_future",
            json!({ "hours": window.within_future_hours }),
        ));
    }
    outcome
}

fn select(_spec: &SelectSpec, subject: &Subject<'_>, required: bool, ctx: &RuleContext<'_>) -> Outcome {
    let mut outcome = Outcome::default();
    if subject.value.is_empty() {
        if required {
            outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "select", json!({})));
        }
        return outcome;
    }
    let Some(choice) = subject.value.as_text() else {
        outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "option", json!({})));
        return outcome;
    };
    // Options filled from another field's selection stay empty until that selection is known.
    if subject.options.is_empty()
        && let Some(source) = ctx.schema.options_source(subject.path)
    {
        let gate = ctx.schema.field(&source).map_or(source.as_str(), |field| field.display_name());
        outcome.errors.push(ctx.error(
            subject,
            ErrorKind::DependencyUnavailable,
            "gate_dependency",
            json!({ "gate": gate }),
        ));
        return outcome;
    }
    // An empty option list means the options have not been populated yet.
    if !subject.options.is_empty() &&!subject.options.iter().any(|option| option.as_str() == choice.as_ref()) {
        outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "option", json!({})));
        return outcome;
    }
    outcome.normalized = Some(FieldValue::Text(choice.into_owned()));
    outcome
}

fn multi_select(spec: &SelectSpec, subject: &Subject<'_>, required: bool, ctx: &RuleContext<'_>) -> Outcome {
    let mut outcome = Outcome::default();
    let chosen: Vec<String> = match subject.value {
        FieldValue::List(items) => items.clone(),
        FieldValue::Null => Vec::new(),
        other => other.as_text().map(|text| vec![text.into_owned()]).unwrap_or_default(),
    };
    if chosen.is_empty() {
        if required {
            outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "select", json!({})));
        }
        return outcome;
    }
    if !subject.options.is_empty() && chosen.iter().any(|item| !subject.options.contains(item)) {
        outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "option", json!({})));
    }
    if let Some(min) = spec.min_selected
        && chosen.len() < min
    {
        outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "min_selected", json!({ "min": min })));
    }
    if let Some(max) = spec.max_selected
        && chosen.len() > max
    {
        outcome.errors.push(ctx.error(subject, ErrorKind::Selection, "max_selected", json!({ "max": max })));
    }
    outcome.normalized = Some(FieldValue::List(chosen));
    outcome
}

fn consent(subject: &Subject<'_>, ctx: &RuleContext<'_>) -> Outcome {
    let mut outcome = Outcome::default();
    if subject.value.as_flag() == Some(true) {
        outcome.normalized = Some(FieldValue::Bool(true));
    } else {
        outcome.errors.push(ctx.error(subject, ErrorKind::Presence, "consent", json!({})));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Default)]
    struct Stub {
        values: BTreeMap<String, FieldValue>,
        valid: Vec<String>,
    }

    impl Collaborators for Stub {
        fn value(&self, path: &str) -> Option<&FieldValue> {
            self.values.get(path)
        }

        fn is_valid(&self, path: &str) -> bool {
            self.valid.iter().any(|valid| valid == path)
        }

        fn label(&self, path: &str) -> Option<&str> {
            Some(Box::leak(path.to_owned().into_boxed_str()))
        }
    }

    struct Fixture {
        schema: SchemaSpec,
        config: Config,
        templates: TemplateEngine,
        now: NaiveDateTime,
    }

    impl Fixture {
        fn new() -> Self {
            let schema = SchemaSpec::builtin("msf").expect("schema");
            let templates = TemplateEngine::for_schema(&schema).expect("templates");
            Self {
                schema,
                config: Config::builtin().expect("config"),
                templates,
                now: parse_local("2024-03-31T12:00").expect("now"),
            }
        }

        fn run(&self, path: &str, value: FieldValue, stub: &Stub) -> Outcome {
            let spec = self.schema.field(path).expect("field");
            let ctx = RuleContext {
                schema: &self.schema,
                config: &self.config,
                templates: &self.templates,
                collaborators: stub,
                now: self.now,
            };
            let options = match &spec.kind {
                FieldKind::Select(select) | FieldKind::MultiSelect(select) => select.options.clone(),
                _ => Vec::new(),
            };
            let safety = SafetyState::default();
            let subject = Subject {
                path,
                spec,
                value: &value,
                options: &options,
                safety: Some(&safety),
            };
            evaluate(&subject, &ctx)
        }
    }

    fn messages(outcome: &Outcome) -> Vec<&str> {
        outcome.errors.iter().map(|error| error.message.as_str()).collect()
    }

    #[test]
    fn number_rounds_before_range_check() {
        let fixture = Fixture::new();
        let stub = Stub {
            values: BTreeMap::from([("bicarbonate".to_string(), FieldValue::from(10.0))]),
            ..Stub::default()
        };
        let outcome = fixture.run("pH", FieldValue::from("7.456"), &stub);
        assert_eq!(outcome.normalized, Some(FieldValue::Number(7.46)));
        assert!(outcome.is_valid(), "{:?}", messages(&outcome));

        let outcome = fixture.run("pH", FieldValue::from("7.504"), &stub);
        assert_eq!(outcome.normalized, Some(FieldValue::Number(7.5)));
        assert!(outcome.is_valid());
    }

    #[test]
    fn optional_number_reports_parse_error_wording() {
        let fixture = Fixture::new();
        let outcome = fixture.run("bicarbonate", FieldValue::from("abc"), &Stub::default());
        assert_eq!(messages(&outcome), vec!["Bicarbonate, if provided, must be a number."]);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Parse);
    }

    #[test]
    fn truncating_field_drops_fraction() {
        let fixture = Fixture::new();
        let outcome = fixture.run("urineKetones", FieldValue::from("3.9"), &Stub::default());
        assert_eq!(outcome.normalized, Some(FieldValue::Number(3.0)));
        assert!(outcome.is_valid(), "{:?}", messages(&outcome));
    }

    #[test]
    fn text_length_reports_minimum() {
        let fixture = Fixture::new();
        let outcome = fixture.run("patientName", FieldValue::from("Jo"), &Stub::default());
        assert_eq!(messages(&outcome), vec!["Name must be at least 5 characters."]);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Length);
    }

    #[test]
    fn empty_required_text_reports_presence_only() {
        let fixture = Fixture::new();
        let outcome = fixture.run("patientName", FieldValue::Null, &Stub::default());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Presence);
    }

    #[test]
    fn date_of_birth_derives_age() {
        let fixture = Fixture::new();
        let outcome = fixture.run("patientDOB", FieldValue::from("2019-03-31"), &Stub::default());
        assert!(outcome.is_valid());
        let derived: BTreeMap<_, _> = outcome.derived.into_iter().collect();
        assert_eq!(derived.get(AGE_MONTHS), Some(&FieldValue::Number(60.0)));
    }

    #[test]
    fn date_of_birth_in_future_is_rejected() {
        let fixture = Fixture::new();
        let outcome = fixture.run("patientDOB", FieldValue::from("2024-04-01"), &Stub::default());
        assert_eq!(outcome.errors[0].kind, ErrorKind::Range);
        assert_eq!(outcome.errors[0].code, "date_future");
    }

    #[test]
    fn protocol_window_edges() {
        let fixture = Fixture::new();
        let stub = Stub::default();
        assert!(fixture.run("protocolStartDatetime", FieldValue::from("2024-03-30T12:00"), &stub).is_valid());
        assert!(fixture.run("protocolStartDatetime", FieldValue::from("2024-03-31T13:00"), &stub).is_valid());
        let early = fixture.run("protocolStartDatetime", FieldValue::from("2024-03-30T11:59"), &stub);
        assert_eq!(early.errors[0].code, "window_past");
        let late = fixture.run("protocolStartDatetime", FieldValue::from("2024-03-31T13:01"), &stub);
        assert_eq!(
            messages(&late),
            vec!["Protocol start must be no more than 1 hour ahead of the current date/time."]
        );
    }

    #[test]
    fn select_rejects_unknown_option() {
        let fixture = Fixture::new();
        let outcome = fixture.run("patientSex", FieldValue::from("other"), &Stub::default());
        assert_eq!(outcome.errors[0].code, "option");
        assert!(fixture.run("patientSex", FieldValue::from("female"), &Stub::default()).is_valid());
    }

    #[test]
    fn consent_requires_true() {
        let fixture = Fixture::new();
        assert!(!fixture.run("legalAgreement", FieldValue::from(false), &Stub::default()).is_valid());
        assert!(fixture.run("legalAgreement", FieldValue::from(true), &Stub::default()).is_valid());
    }

    #[test]
    fn weight_waits_for_valid_dob_and_sex() {
        let fixture = Fixture::new();
        let outcome = fixture.run("weight", FieldValue::from(20.0), &Stub::default());
        assert_eq!(outcome.errors[0].kind, ErrorKind::DependencyUnavailable);
    }

    #[test]
    fn weight_outside_band_is_a_safety_error() {
        let fixture = Fixture::new();
        let stub = Stub {
            values: BTreeMap::from([
                ("patientDOB".to_string(), FieldValue::from("2019-03-31")),
                ("patientSex".to_string(), FieldValue::from("male")),
            ]),
            valid: vec!["patientDOB".to_string(), "patientSex".to_string()],
        };
        assert!(fixture.run("weight", FieldValue::from(20.0), &stub).is_valid());
        let outcome = fixture.run("weight", FieldValue::from(60.0), &stub);
        assert_eq!(outcome.errors[0].kind, ErrorKind::SafetyRange);
        assert!(outcome.errors[0].message.starts_with(
            "Weight must be within 2 standard deviations of the mean for age (upper limit 75 kg)"
        ));
        assert!(outcome.safety.is_some_and(|state| state.exceeded));
    }
}
