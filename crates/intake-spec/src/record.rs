use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry::Registry;
use crate::safety::SafetyState;
use crate::spec::schema::SchemaSpec;
use crate::value::FieldValue;

/// Safety flags as stored for audit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafetyAudit {
    pub exceeded: bool,
    #[serde(rename = "override")]
    pub overridden: bool,
    pub override_confirm: bool,
    #[serde(rename = "use2SD")]
    pub use_2sd: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl From<&SafetyState> for SafetyAudit {
    fn from(state: &SafetyState) -> Self {
        Self {
            exceeded: state.exceeded,
            overridden: state.overridden,
            override_confirm: state.override_confirm,
            use_2sd: state.use_2sd,
            lower: state.range.map(|range| range.lower_2dp()),
            upper: state.range.map(|range| range.upper_2dp()),
        }
    }
}

/// Normalized output of a completed intake, ready for the calculation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRecord {
    pub schema_id: String,
    pub schema_version: String,
    pub values: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub derived: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub gates: BTreeMap<String, bool>,
    #[serde(default)]
    pub safety: BTreeMap<String, SafetyAudit>,
}

impl IntakeRecord {
    pub(crate) fn from_registry(schema: &SchemaSpec, registry: &Registry) -> Self {
        let mut record = Self {
            schema_id: schema.id.clone(),
            schema_version: schema.version.clone(),
            values: BTreeMap::new(),
            derived: BTreeMap::new(),
            gates: BTreeMap::new(),
            safety: BTreeMap::new(),
        };
        for node in registry.walk() {
            record.values.insert(node.path.clone(), node.value.clone());
            for (key, value) in &node.derived {
                record.derived.insert(format!("{}.{key}", node.path), value.clone());
            }
            if node.gate {
                record
                    .gates
                    .insert(node.path.clone(), node.value.as_flag().unwrap_or(false));
            }
            if let Some(state) = &node.safety {
                record.safety.insert(node.path.clone(), SafetyAudit::from(state));
            }
        }
        record
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        serde_cbor::to_vec(self)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, serde_cbor::Error> {
        serde_cbor::from_slice(bytes)
    }
}
