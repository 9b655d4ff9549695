use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::age::format_local;
use crate::value::FieldValue;

/// Safety-override flags supplied with an answer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideInput {
    #[serde(default, rename = "override")]
    pub overridden: bool,
    #[serde(default)]
    pub override_confirm: bool,
    #[serde(default, rename = "use2SD")]
    pub use_2sd: bool,
}

/// Values keyed by field path, as entered by a clinician or loaded from a file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSet {
    #[serde(default)]
    pub values: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, OverrideInput>,
}

impl AnswerSet {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with(mut self, path: &str, value: impl Into<FieldValue>) -> Self {
        self.values.insert(path.to_string(), value.into());
        self
    }
}

/// The "Joe Bloggs" test patient used for demos and smoke tests. The
/// protocol starts at `now`, so the answers validate against the same clock.
pub fn demo_answers(schema_id: &str, now: NaiveDateTime) -> AnswerSet {
    let answers = AnswerSet::default()
        .with("patientName", "Joe Bloggs")
        .with("patientDOB", "2019-03-31")
        .with("patientSex", "male")
        .with("protocolStartDatetime", format_local(now))
        .with("pH.available", "false")
        .with("bloodKetones.available", "false")
        .with("urineKetones", 3.0)
        .with("weight", 20.0)
        .with("shockPresent", "false")
        .with("gcs", 14.0)
        .with("insulinRate", "0.05")
        .with("episodeType", "test")
        .with("preExistingDiabetes", "false");
    match schema_id {
        "regional" => answers
            .with("glucose.units", "mmol/L")
            .with("glucose", 25.0)
            .with("region", "North")
            .with("centre", "North General"),
        _ => answers
            .with("legalAgreement", true)
            .with("glucose", 25.0)
            .with("operationalCentre", "Paris")
            .with("project", "OCP-12345-ProjectName"),
    }
}
