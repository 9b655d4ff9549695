use std::sync::Arc;

use intake_spec::age::parse_local;
use intake_spec::{
    Config, EngineError, ErrorKind, FieldValue, FixedClock, IntakeSession, SchemaSpec, demo_answers,
};

fn now() -> chrono::NaiveDateTime {
    parse_local("2024-03-31T12:00").expect("now")
}

fn session(schema: &str) -> IntakeSession {
    IntakeSession::with_clock(
        SchemaSpec::builtin(schema).expect("schema"),
        Config::builtin().expect("config"),
        Arc::new(FixedClock(now())),
    )
    .expect("session")
}

fn messages(session: &IntakeSession, path: &str) -> String {
    session.node(path).expect("node").error_text()
}

#[test]
fn repeated_validation_is_stable() {
    let mut session = session("msf");
    session.set_value("pH.available", "true").expect("set");
    session.set_value("pH", "7.35").expect("set");

    let first = session.validate("pH", false).expect("validate");
    let first_errors = session.node("pH").expect("node").errors.clone();
    let second = session.validate("pH", false).expect("validate");
    assert_eq!(first, second);
    assert_eq!(first_errors, session.node("pH").expect("node").errors);
}

#[test]
fn numeric_bounds_are_inclusive() {
    let mut session = session("msf");
    session.set_value("pH.available", "true").expect("set");
    session.set_value("bicarbonate", 10.0).expect("set");

    assert!(session.edit("gcs", 3.0).expect("edit"));
    assert!(session.edit("gcs", 15.0).expect("edit"));
    assert!(!session.edit("gcs", 16.0).expect("edit"));
    assert_eq!(messages(&session, "gcs"), "GCS must be no more than 15.");
    assert!(!session.edit("gcs", 2.0).expect("edit"));
    assert_eq!(messages(&session, "gcs"), "GCS must be at least 3.");

    assert!(session.edit("pH", 6.2).expect("edit"));
    assert!(!session.edit("pH", 6.19).expect("edit"));
    assert_eq!(messages(&session, "pH"), "pH must be at least 6.2.");
    assert!(!session.edit("bicarbonate", 35.1).expect("edit"));
    assert_eq!(
        messages(&session, "bicarbonate"),
        "Bicarbonate must be no more than 35 mmol/L."
    );
}

#[test]
fn unknown_field_is_an_engine_error() {
    let mut session = session("msf");
    assert!(matches!(
        session.set_value("heartRate", 120.0),
        Err(EngineError::UnknownField(path)) if path == "heartRate"
    ));
    assert!(matches!(session.validate("pH.nope", false), Err(EngineError::UnknownField(_))));
}

#[test]
fn missing_availability_blocks_dependent_field() {
    let mut session = session("msf");
    session.set_value("pH", 7.1).expect("set");
    assert!(!session.validate("pH", false).expect("validate"));
    let node = session.node("pH").expect("node");
    assert_eq!(node.errors[0].kind, ErrorKind::DependencyUnavailable);
    assert_eq!(
        messages(&session, "pH.available"),
        "Availability of pH must be selected."
    );
}

#[test]
fn toggling_blood_ketone_availability_swaps_required_field() {
    let mut session = session("msf");
    session.set_value("bloodKetones.available", "true").expect("set");
    session.set_value("bloodKetones", 4.0).expect("set");
    session.set_value("urineKetones", 3.0).expect("set");
    assert!(session.validate("bloodKetones", false).expect("validate"));
    assert_eq!(session.value("urineKetones").expect("value"), &FieldValue::Null);

    session.set_value("bloodKetones.available", "false").expect("set");
    assert!(session.validate("bloodKetones.available", false).expect("validate"));
    assert_eq!(session.value("bloodKetones").expect("value"), &FieldValue::Null);

    // Blood ketones no longer apply; urine ketones are now required.
    assert!(session.validate("bloodKetones", false).expect("validate"));
    assert!(!session.validate("urineKetones", false).expect("validate"));
    assert_eq!(messages(&session, "urineKetones"), "Urine ketones must be provided.");

    assert!(session.edit("urineKetones", "2.7").expect("edit"));
    assert_eq!(session.value("urineKetones").expect("value"), &FieldValue::Number(2.0));

    session.set_value("bloodKetones.available", "true").expect("set");
    assert!(session.validate("urineKetones", false).expect("validate"));
    assert_eq!(session.value("urineKetones").expect("value"), &FieldValue::Null);
}

#[test]
fn ph_unavailable_clears_ph_and_bicarbonate() {
    let mut session = session("msf");
    session.set_value("pH", 7.1).expect("set");
    session.set_value("bicarbonate", 12.0).expect("set");
    session.set_value("pH.available", "false").expect("set");
    assert!(session.validate("pH", false).expect("validate"));
    assert!(session.value("pH").expect("value").is_empty());
    assert!(session.value("bicarbonate").expect("value").is_empty());
}

#[test]
fn ph_without_supporting_bicarbonate_fails_diagnostic() {
    let mut session = session("msf");
    session.set_value("pH.available", "true").expect("set");
    assert!(!session.edit("pH", 7.35).expect("edit"));
    let node = session.node("pH").expect("node");
    assert_eq!(node.errors.len(), 1);
    assert_eq!(node.errors[0].kind, ErrorKind::Diagnostic);
    assert!(node.errors[0].message.contains("below 7.3"));
}

#[test]
fn bicarbonate_edit_revalidates_ph() {
    let mut session = session("msf");
    session.set_value("pH.available", "true").expect("set");
    assert!(!session.edit("pH", 7.35).expect("edit"));

    assert!(session.edit("bicarbonate", 12.0).expect("edit"));
    let ph = session.node("pH").expect("node");
    assert!(ph.is_valid());
    assert!(ph.errors.is_empty());
}

#[test]
fn alternative_criterion_uses_normalized_bicarbonate() {
    let mut session = session("msf");
    session.set_value("pH.available", "true").expect("set");
    session.set_value("bicarbonate", "14.96").expect("set");
    assert!(!session.edit("pH", 7.35).expect("edit"));

    assert!(session.validate("bicarbonate", false).expect("validate"));
    assert_eq!(session.value("bicarbonate").expect("value"), &FieldValue::Number(15.0));
    let ph = session.node("pH").expect("node");
    assert!(!ph.is_valid());
    assert_eq!(ph.errors[0].kind, ErrorKind::Diagnostic);

    session.set_value("bicarbonate", "14.94").expect("set");
    assert!(session.validate("pH", false).expect("validate"));
}

#[test]
fn optional_bicarbonate_may_be_blank() {
    let mut session = session("msf");
    session.set_value("pH.available", "true").expect("set");
    assert!(session.validate("bicarbonate", false).expect("validate"));
    assert!(!session.edit("bicarbonate", "abc").expect("edit"));
    assert_eq!(
        messages(&session, "bicarbonate"),
        "Bicarbonate, if provided, must be a number."
    );
}

#[test]
fn weight_for_five_year_old_is_within_range() {
    let mut session = session("msf");
    session.set_value("patientDOB", "2019-03-31").expect("set");
    session.set_value("patientSex", "male").expect("set");
    assert!(session.edit("weight", 20.0).expect("edit"));

    let derived = &session.node("patientDOB").expect("node").derived;
    assert_eq!(derived.get("ageMonths"), Some(&FieldValue::Number(60.0)));
    let safety = session.safety("weight").expect("safety");
    assert!(!safety.exceeded);
    assert!(safety.range.is_some_and(|range| range.contains(20.0)));
}

#[test]
fn unparseable_dob_makes_weight_unavailable() {
    let mut session = session("msf");
    session.set_value("patientDOB", "31/03/2019").expect("set");
    session.set_value("patientSex", "male").expect("set");
    assert!(!session.edit("weight", 20.0).expect("edit"));
    let node = session.node("weight").expect("node");
    assert_eq!(node.errors[0].kind, ErrorKind::DependencyUnavailable);
    assert!(node.errors[0].message.contains("Date of birth"));
}

#[test]
fn weight_below_band_needs_override() {
    let mut session = session("msf");
    session.set_value("patientDOB", "2005-04-15").expect("set");
    session.set_value("patientSex", "male").expect("set");
    assert!(!session.edit("weight", 40.0).expect("edit"));

    let node = session.node("weight").expect("node");
    assert_eq!(node.errors[0].kind, ErrorKind::SafetyRange);
    let range = session.safety("weight").expect("safety").range.expect("range");
    assert_eq!(range.upper, 75.0);
    assert!(40.0 < range.lower_2dp());

    session.set_override("weight", true).expect("override");
    assert!(session.validate("weight", false).expect("validate"));
    let safety = session.safety("weight").expect("safety");
    assert!(safety.exceeded);
    assert!(safety.overridden);
}

#[test]
fn returning_inside_band_resets_override() {
    let mut session = session("msf");
    session.set_value("patientDOB", "2019-03-31").expect("set");
    session.set_value("patientSex", "female").expect("set");
    session.set_value("weight", 40.0).expect("set");
    session.set_override("weight", true).expect("override");
    assert!(session.validate("weight", false).expect("validate"));

    assert!(session.edit("weight", 19.0).expect("edit"));
    let safety = session.safety("weight").expect("safety");
    assert!(!safety.exceeded);
    assert!(!safety.overridden);
}

#[test]
fn adopting_upper_bound_sets_use_2sd_until_edited() {
    let mut session = session("msf");
    session.set_value("patientDOB", "2019-03-31").expect("set");
    session.set_value("patientSex", "male").expect("set");
    assert!(!session.edit("weight", 40.0).expect("edit"));

    let upper = session.adopt_upper_bound("weight").expect("adopt");
    assert_eq!(session.value("weight").expect("value"), &FieldValue::Number(upper));
    assert!(session.node("weight").expect("node").is_valid());
    assert!(session.safety("weight").expect("safety").use_2sd);

    assert!(session.edit("weight", 21.0).expect("edit"));
    assert!(!session.safety("weight").expect("safety").use_2sd);
}

#[test]
fn adopting_before_any_range_is_an_error() {
    let mut session = session("msf");
    assert!(matches!(
        session.adopt_upper_bound("weight"),
        Err(EngineError::RangeUnavailable(_))
    ));
    assert!(matches!(
        session.set_override("gcs", true),
        Err(EngineError::NoSafetyRange(_))
    ));
}

#[test]
fn confirmation_policy_requires_both_flags() {
    let mut session = session("regional");
    session.set_value("patientDOB", "2019-03-31").expect("set");
    session.set_value("patientSex", "male").expect("set");
    session.set_value("weight", 40.0).expect("set");
    assert!(matches!(
        session.confirm_override("weight", true),
        Err(EngineError::OverrideNotRequested(_))
    ));

    session.set_override("weight", true).expect("override");
    assert!(!session.validate("weight", false).expect("validate"));
    session.confirm_override("weight", true).expect("confirm");
    assert!(session.validate("weight", false).expect("validate"));
}

#[test]
fn operational_centre_populates_projects() {
    let mut session = session("msf");
    assert!(session.edit("operationalCentre", "Paris").expect("edit"));
    let project = session.node("project").expect("project");
    assert!(project.options.iter().any(|option| option == "OCP-12345-ProjectName"));

    assert!(!session.edit("project", "OCA-10001-ProjectName").expect("edit"));
    assert_eq!(
        messages(&session, "project"),
        "Project must be one of the available options."
    );
    assert!(session.edit("project", "OCP-12345-ProjectName").expect("edit"));
}

#[test]
fn project_waits_for_a_known_operational_centre() {
    let mut session = session("msf");
    session.set_value("project", "OCP-12345-ProjectName").expect("set");
    assert!(!session.validate("project", false).expect("validate"));
    let project = session.node("project").expect("project");
    assert_eq!(project.errors[0].kind, ErrorKind::DependencyUnavailable);
    assert_eq!(
        project.error_text(),
        "Project cannot be validated until Operational centre has been selected."
    );

    session.set_value("operationalCentre", "Atlantis").expect("set");
    assert!(!session.validate("project", false).expect("validate"));
    assert!(session.node("project").expect("project").options.is_empty());

    session.set_value("operationalCentre", "Paris").expect("set");
    assert!(session.validate("project", false).expect("validate"));
}

#[test]
fn unknown_glucose_unit_is_reported_on_the_unit_field() {
    let mut session = session("regional");
    session.set_value("glucose.units", "g/L").expect("set");
    session.set_value("glucose", 25.0).expect("set");
    assert!(!session.step_is_valid(1).expect("step"));

    let units = session.node("glucose.units").expect("units");
    assert!(!units.is_valid());
    assert_eq!(units.errors[0].kind, ErrorKind::Selection);
    assert_eq!(session.node("glucose").expect("glucose").errors[0].kind, ErrorKind::Selection);
}

#[test]
fn follow_up_is_required_only_with_pre_existing_diabetes() {
    let mut session = session("msf");
    session.set_value("preExistingDiabetes", "true").expect("set");
    assert!(!session.validate("underFollowUp", false).expect("validate"));
    assert_eq!(
        messages(&session, "underFollowUp"),
        "Under follow up status must be selected."
    );

    session.set_value("underFollowUp", "true").expect("set");
    assert!(session.edit("preExistingDiabetes", "false").expect("edit"));
    assert!(session.value("underFollowUp").expect("value").is_empty());
    assert!(session.validate("underFollowUp", false).expect("validate"));
}

#[test]
fn protocol_start_window_uses_hours_wording() {
    let mut session = session("msf");
    assert!(!session.edit("protocolStartDatetime", "2024-03-30T11:00").expect("edit"));
    assert_eq!(
        messages(&session, "protocolStartDatetime"),
        "Protocol start must be within the past 24 hours of the current date/time."
    );
    assert!(session.edit("protocolStartDatetime", "2024-03-31T12:45").expect("edit"));
}

#[test]
fn date_of_birth_limits() {
    let mut session = session("msf");
    assert!(!session.edit("patientDOB", "2004-01-01").expect("edit"));
    assert_eq!(
        messages(&session, "patientDOB"),
        "Patient age cannot be greater than 19 years."
    );
    assert!(!session.edit("patientDOB", "not a date").expect("edit"));
    assert_eq!(
        messages(&session, "patientDOB"),
        "A valid date must be entered for date of birth."
    );
    assert!(!session.edit("patientDOB", "2024-04-02").expect("edit"));
    assert_eq!(messages(&session, "patientDOB"), "Date of birth cannot be after today.");
}

#[test]
fn input_bounds_follow_config_and_clock() {
    let session = session("msf");
    let ph = session.bounds_for("pH").expect("bounds");
    assert_eq!(ph.min.as_deref(), Some("6.2"));
    assert_eq!(ph.max.as_deref(), Some("7.5"));
    assert_eq!(ph.step, Some(0.01));

    let window = session.bounds_for("protocolStartDatetime").expect("bounds");
    assert_eq!(window.min.as_deref(), Some("2024-03-30T12:00"));
    assert_eq!(window.max.as_deref(), Some("2024-03-31T13:00"));

    let dob = session.bounds_for("patientDOB").expect("bounds");
    assert_eq!(dob.min.as_deref(), Some("2004-03-31"));
    assert_eq!(dob.max.as_deref(), Some("2024-03-31"));
}

#[test]
fn glucose_bounds_follow_selected_unit() {
    let mut session = session("regional");
    assert!(!session.edit("glucose", 300.0).expect("edit"));
    assert_eq!(messages(&session, "glucose"), "Glucose must be no more than 50 mmol/L.");

    session.set_value("glucose.units", "mg/dL").expect("set");
    assert!(session.validate("glucose", false).expect("validate"));
    assert_eq!(session.bounds_for("glucose").expect("bounds").max.as_deref(), Some("900"));

    session.set_value("glucose.units", "g/L").expect("set");
    assert!(!session.validate("glucose", false).expect("validate"));
    assert_eq!(session.node("glucose").expect("node").errors[0].kind, ErrorKind::Selection);
}

#[test]
fn glucose_below_diagnostic_minimum() {
    let mut session = session("regional");
    assert!(!session.edit("glucose", 8.0).expect("edit"));
    assert_eq!(
        messages(&session, "glucose"),
        "Glucose must be at least 11 mmol/L to meet the diagnostic threshold for DKA."
    );
}

#[test]
fn follow_up_glucose_is_only_range_checked() {
    let mut session = session("msf");
    assert!(session.edit("glucose", 8.0).expect("edit"));
    assert!(session.step_is_valid(5).expect("step"));

    assert!(!session.edit("glucose", 60.0).expect("edit"));
    assert_eq!(messages(&session, "glucose"), "Glucose must be no more than 50 mmol/L.");
}

#[test]
fn preventable_factors_respect_selection_limits() {
    let mut session = session("regional");
    session.set_value("preExistingDiabetes", "true").expect("set");
    assert!(!session.validate("preventableFactors", false).expect("validate"));

    let too_many = vec![
        "Missed insulin doses".to_string(),
        "Intercurrent illness".to_string(),
        "Insulin pump failure".to_string(),
        "Delayed diagnosis".to_string(),
    ];
    assert!(!session.edit("preventableFactors", too_many).expect("edit"));
    assert_eq!(
        messages(&session, "preventableFactors"),
        "No more than 3 options can be selected for preventable factors."
    );
    assert!(session
        .edit("preventableFactors", vec!["Intercurrent illness".to_string()])
        .expect("edit"));
}

#[test]
fn nhs_number_pattern_uses_field_message() {
    let mut session = session("regional");
    assert!(session.validate("nhsNumber", false).expect("validate"));
    assert!(!session.edit("nhsNumber", "12345").expect("edit"));
    assert_eq!(messages(&session, "nhsNumber"), "NHS number must be 10 digits.");
    assert!(session.edit("nhsNumber", "9434765919").expect("edit"));
}

#[test]
fn update_step_requires_glucose() {
    let mut session = session("msf");
    assert!(!session.step_is_valid(5).expect("step"));
    assert!(matches!(session.step_is_valid(9), Err(EngineError::UnknownStep(9))));
}

#[test]
fn reset_returns_to_defaults() {
    let mut session = session("regional");
    session.apply(&demo_answers("regional", now())).expect("apply");
    assert!(session.record().is_ok());

    session.reset();
    assert!(session.value("patientName").expect("value").is_empty());
    assert_eq!(
        session.value("glucose.units").expect("value"),
        &FieldValue::from("mmol/L")
    );
    assert!(session.node("centre").expect("node").options.is_empty());
    assert!(matches!(session.record(), Err(EngineError::Incomplete { .. })));
}
