//! The eight-field patient record accepted by the prediction endpoints.

use crate::error::PredictionError;
use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::HashMap;

/// Field names in canonical column order.
pub const FEATURE_NAMES: [&str; 8] = [
    "age",
    "hypertension",
    "heart_disease",
    "bmi",
    "HbA1c_level",
    "blood_glucose_level",
    "gender_encoded",
    "smoking_history_encoded",
];

/// A validated feature record. Every field is required and finite; no range
/// checks are applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub age: f64,
    pub hypertension: f64,
    pub heart_disease: f64,
    pub bmi: f64,
    #[serde(rename = "HbA1c_level")]
    pub hba1c_level: f64,
    pub blood_glucose_level: f64,
    pub gender_encoded: f64,
    pub smoking_history_encoded: f64,
}

impl FeatureRecord {
    /// Parse a raw request body.
    ///
    /// All missing fields are reported together, before any type check.
    /// Field values are decoded one at a time, so a number that does not fit
    /// an `f64` is reported against its field.
    pub fn from_slice(body: &[u8]) -> Result<Self, PredictionError> {
        let raw: &RawValue = serde_json::from_slice(body)
            .map_err(|e| PredictionError::MalformedBody(e.to_string()))?;

        let fields: HashMap<String, &RawValue> = serde_json::from_str(raw.get()).map_err(|_| {
            PredictionError::MalformedBody(format!("expected a JSON object, got {}", raw_type(raw)))
        })?;

        Self::from_fields(&fields)
    }

    fn from_fields(fields: &HashMap<String, &RawValue>) -> Result<Self, PredictionError> {
        let missing: Vec<String> = FEATURE_NAMES
            .iter()
            .filter(|name| !fields.contains_key(**name))
            .map(|name| name.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(PredictionError::MissingFields(missing));
        }

        let mut values = [0.0f64; 8];
        for (slot, name) in values.iter_mut().zip(FEATURE_NAMES) {
            *slot = numeric_field(fields, name)?;
        }

        Ok(Self::from_values(values))
    }

    fn from_values(values: [f64; 8]) -> Self {
        let [
            age,
            hypertension,
            heart_disease,
            bmi,
            hba1c_level,
            blood_glucose_level,
            gender_encoded,
            smoking_history_encoded,
        ] = values;

        Self {
            age,
            hypertension,
            heart_disease,
            bmi,
            hba1c_level,
            blood_glucose_level,
            gender_encoded,
            smoking_history_encoded,
        }
    }

    /// Values in canonical order.
    pub fn values(&self) -> [f64; 8] {
        [
            self.age,
            self.hypertension,
            self.heart_disease,
            self.bmi,
            self.hba1c_level,
            self.blood_glucose_level,
            self.gender_encoded,
            self.smoking_history_encoded,
        ]
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.values()[idx])
    }

    /// Values arranged in the given column order.
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<f64>, String> {
        columns
            .iter()
            .map(|column| {
                let column = column.as_ref();
                self.get(column)
                    .ok_or_else(|| format!("unknown feature column '{}'", column))
            })
            .collect()
    }
}

fn numeric_field(
    fields: &HashMap<String, &RawValue>,
    name: &str,
) -> Result<f64, PredictionError> {
    let invalid = |reason: String| PredictionError::InvalidField {
        field: name.to_string(),
        reason,
    };

    let raw = fields
        .get(name)
        .ok_or_else(|| PredictionError::MissingFields(vec![name.to_string()]))?;
    let value: Value = serde_json::from_str(raw.get())
        .map_err(|_| invalid("must be a finite number".to_string()))?;

    match value {
        Value::Number(n) => match n.as_f64() {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(invalid("must be a finite number".to_string())),
        },
        other => Err(invalid(format!(
            "must be a number, got {}",
            json_type(&other)
        ))),
    }
}

/// JSON type of an undecoded value, from its first character.
fn raw_type(raw: &RawValue) -> &'static str {
    match raw.get().trim_start().chars().next() {
        Some('{') => "object",
        Some('[') => "array",
        Some('"') => "string",
        Some('t') | Some('f') => "boolean",
        Some('n') => "null",
        _ => "number",
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
