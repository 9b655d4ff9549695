//! Injected, read-only configuration: numeric ranges, diagnostic thresholds,
//! the weight-for-age table and organisational hierarchies.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::safety::SafetyRange;
use crate::spec::field::{Effect, FieldKind, FieldSpec};
use crate::spec::schema::SchemaSpec;

const DEFAULT_CONFIG: &str = include_str!("../config/default.json");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config has no validation entry '{0}'")]
    MissingRange(String),
    #[error("validation entry '{key}' is not a {expected}")]
    WrongShape { key: String, expected: &'static str },
    #[error("validation entry '{key}' has no bounds for unit '{unit}'")]
    UnknownUnit { key: String, unit: String },
    #[error("config has no threshold '{0}'")]
    MissingThreshold(String),
    #[error("threshold '{key}' has no value for unit '{unit}'")]
    ThresholdUnit { key: String, unit: String },
    #[error("config has no hierarchy '{0}'")]
    MissingHierarchy(String),
    #[error("config has no option list '{0}'")]
    MissingList(String),
    #[error("field '{0}' uses a safety range but no weight limits are configured")]
    MissingWeightLimits(String),
}

/// Min/max pair, optionally overriding the field's decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnitRanges {
    pub default_unit: String,
    pub units: BTreeMap<String, Bounds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WindowRange {
    pub within_past_hours: i64,
    pub within_future_hours: i64,
}

/// One entry of `validation`. The shape decides which field kinds may use it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RangeConfig {
    Window(WindowRange),
    PerUnit(UnitRanges),
    Bounds(Bounds),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Threshold {
    Scalar(f64),
    PerUnit(BTreeMap<String, f64>),
}

/// Bounds after the measurement unit has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBounds {
    pub min: f64,
    pub max: f64,
    pub precision: Option<u32>,
    pub unit: Option<String>,
}

/// Expected weight band per month of age for one sex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SexTable {
    pub lower: BTreeMap<u32, f64>,
    pub upper: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeightLimits {
    /// Absolute cap applied to every upper bound.
    pub max: f64,
    #[serde(default)]
    pub sexes: BTreeMap<String, SexTable>,
}

impl WeightLimits {
    pub fn range(&self, sex: &str, age_months: u32) -> Option<SafetyRange> {
        let table = self.sexes.get(sex)?;
        let lower = *table.lower.get(&age_months)?;
        let upper = *table.upper.get(&age_months)?;
        Some(SafetyRange {
            lower,
            upper: upper.min(self.max),
            cap: self.max,
        })
    }
}

/// Parent entry of a two-level selection hierarchy (centre → projects).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HierarchyNode {
    pub name: String,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub validation: BTreeMap<String, RangeConfig>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_limits: Option<WeightLimits>,
    #[serde(default)]
    pub hierarchies: BTreeMap<String, Vec<HierarchyNode>>,
    #[serde(default)]
    pub lists: BTreeMap<String, Vec<String>>,
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// The configuration shipped with the crate.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json(DEFAULT_CONFIG)
    }

    fn entry(&self, key: &str) -> Result<&RangeConfig, ConfigError> {
        self.validation
            .get(key)
            .ok_or_else(|| ConfigError::MissingRange(key.to_string()))
    }

    /// Resolves `{min, max}` for `key`; per-unit entries fall back to their default unit.
    pub fn bounds(&self, key: &str, unit: Option<&str>) -> Result<ResolvedBounds, ConfigError> {
        match self.entry(key)? {
            RangeConfig::Bounds(bounds) => Ok(ResolvedBounds {
                min: bounds.min,
                max: bounds.max,
                precision: bounds.precision,
                unit: None,
            }),
            RangeConfig::PerUnit(ranges) => {
                let unit = unit.unwrap_or(&ranges.default_unit);
                let bounds = ranges
                    .units
                    .get(unit)
                    .ok_or_else(|| ConfigError::UnknownUnit {
                        key: key.to_string(),
                        unit: unit.to_string(),
                    })?;
                Ok(ResolvedBounds {
                    min: bounds.min,
                    max: bounds.max,
                    precision: bounds.precision,
                    unit: Some(unit.to_string()),
                })
            }
            RangeConfig::Window(_) => Err(ConfigError::WrongShape {
                key: key.to_string(),
                expected: "numeric range",
            }),
        }
    }

    pub fn window(&self, key: &str) -> Result<WindowRange, ConfigError> {
        match self.entry(key)? {
            RangeConfig::Window(window) => Ok(*window),
            _ => Err(ConfigError::WrongShape {
                key: key.to_string(),
                expected: "date/time window",
            }),
        }
    }

    pub fn threshold(&self, key: &str, unit: Option<&str>) -> Result<f64, ConfigError> {
        match self.thresholds.get(key) {
            None => Err(ConfigError::MissingThreshold(key.to_string())),
            Some(Threshold::Scalar(value)) => Ok(*value),
            Some(Threshold::PerUnit(values)) => {
                let unit = unit.unwrap_or_default();
                values
                    .get(unit)
                    .copied()
                    .ok_or_else(|| ConfigError::ThresholdUnit {
                        key: key.to_string(),
                        unit: unit.to_string(),
                    })
            }
        }
    }

    pub fn list(&self, name: &str) -> Result<&[String], ConfigError> {
        self.lists
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::MissingList(name.to_string()))
    }

    /// Children of `parent` in `hierarchy`, if that parent exists.
    pub fn children_of(&self, hierarchy: &str, parent: &str) -> Option<&[String]> {
        self.hierarchies
            .get(hierarchy)?
            .iter()
            .find(|node| node.name == parent)
            .map(|node| node.children.as_slice())
    }

    pub fn hierarchy_roots(&self, hierarchy: &str) -> Result<Vec<String>, ConfigError> {
        self.hierarchies
            .get(hierarchy)
            .map(|nodes| nodes.iter().map(|node| node.name.clone()).collect())
            .ok_or_else(|| ConfigError::MissingHierarchy(hierarchy.to_string()))
    }

    /// Verifies every config entry the schema names exists with the right shape.
    pub fn check_against(&self, schema: &SchemaSpec) -> Result<(), ConfigError> {
        for field in &schema.fields {
            self.check_field(schema, field)?;
        }
        Ok(())
    }

    fn check_field(&self, schema: &SchemaSpec, field: &FieldSpec) -> Result<(), ConfigError> {
        match &field.kind {
            FieldKind::Number(number) => {
                let key = number.range.as_deref().unwrap_or(&field.id);
                let units = match &number.unit_field {
                    Some(path) => schema
                        .field(path)
                        .map(|unit_field| unit_field.kind.static_options().to_vec())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                if units.is_empty() {
                    self.bounds(key, None)?;
                } else {
                    for unit in &units {
                        self.bounds(key, Some(unit))?;
                    }
                }
                if let Some(rule) = &number.diagnostic {
                    if units.is_empty() {
                        let unit = self.bounds(key, None)?.unit;
                        self.threshold(&rule.threshold, unit.as_deref())?;
                    } else {
                        for unit in &units {
                            self.threshold(&rule.threshold, Some(unit))?;
                        }
                    }
                    if let Some(alternative) = &rule.alternative {
                        self.threshold(&alternative.threshold, None)?;
                    }
                }
                if number.safety.is_some() {
                    let limits = self
                        .weight_limits
                        .as_ref()
                        .filter(|limits| !limits.sexes.is_empty());
                    if limits.is_none() {
                        return Err(ConfigError::MissingWeightLimits(field.id.clone()));
                    }
                }
            }
            FieldKind::DateOfBirth(dob) => {
                if let RangeConfig::Window(_) = self.entry(&dob.age_range)? {
                    return Err(ConfigError::WrongShape {
                        key: dob.age_range.clone(),
                        expected: "numeric range",
                    });
                }
            }
            FieldKind::DateWindow(window) => {
                self.window(&window.window)?;
            }
            FieldKind::Select(select) | FieldKind::MultiSelect(select) => {
                if let Some(list) = &select.options_list {
                    self.list(list)?;
                }
                if let Some(hierarchy) = &select.options_hierarchy {
                    self.hierarchy_roots(hierarchy)?;
                }
            }
            FieldKind::Text(_) | FieldKind::Consent => {}
        }
        for effect in &field.effects {
            if let Effect::PopulateOptions { hierarchy, .. } = effect {
                self.hierarchy_roots(hierarchy)?;
            }
        }
        for child in &field.children {
            self.check_field(schema, child)?;
        }
        Ok(())
    }
}
