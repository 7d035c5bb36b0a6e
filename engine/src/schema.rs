//! Schema definition and validation.
//!
//! A [`Schema`] describes one logical collection: its fields, which of them
//! are required or unique, and at most one primary key. Validation never
//! mutates the record under test and always reports every violation it finds
//! instead of stopping at the first one.

use crate::{error::Result, CollectionName, Error};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Field types supported in schemas.
///
/// Any type name outside the recognized set is kept as [`FieldType::Other`]
/// and compared against the JSON kind of the value (`"object"`, `"string"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Timestamp,
    Date,
    Time,
    DateTimeLocal,
    Other(String),
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "boolean" => FieldType::Boolean,
            "timestamp" => FieldType::Timestamp,
            "date" => FieldType::Date,
            "time" => FieldType::Time,
            "datetime-local" => FieldType::DateTimeLocal,
            _ => FieldType::Other(name),
        }
    }
}

impl From<&str> for FieldType {
    fn from(name: &str) -> Self {
        FieldType::from(name.to_string())
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.to_string()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Timestamp => write!(f, "timestamp"),
            FieldType::Date => write!(f, "date"),
            FieldType::Time => write!(f, "time"),
            FieldType::DateTimeLocal => write!(f, "datetime-local"),
            FieldType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name (the key of the field map, not part of the serialized definition)
    #[serde(skip)]
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Let the backend assign increasing integer keys
    #[serde(default)]
    pub auto_increment: bool,
    /// Request a secondary index on backends that support one
    #[serde(default)]
    pub index: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<f64>,
}

impl FieldDef {
    fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            primary_key: false,
            auto_increment: false,
            index: false,
            min_length: None,
            pattern: None,
            minimum: None,
            maximum: None,
            exclusive_minimum: None,
            exclusive_maximum: None,
        }
    }

    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: true,
            ..Self::new(name, field_type)
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type)
    }

    /// Create a primary key field definition.
    pub fn primary_key(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, field_type)
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn exclusive_minimum(mut self, bound: f64) -> Self {
        self.exclusive_minimum = Some(bound);
        self
    }

    pub fn exclusive_maximum(mut self, bound: f64) -> Self {
        self.exclusive_maximum = Some(bound);
        self
    }

    /// Check a present, non-null value against the declared type and bounds.
    fn check_type(&self, value: &Value, errors: &mut Vec<FieldError>) {
        let format_error = |errors: &mut Vec<FieldError>| {
            errors.push(FieldError::new(
                &self.name,
                format!("Invalid {} format", self.field_type),
            ))
        };

        match &self.field_type {
            FieldType::Timestamp | FieldType::DateTimeLocal => {
                if !is_datetime(value) {
                    format_error(errors);
                }
            }
            FieldType::Date => {
                if !is_date(value) {
                    format_error(errors);
                }
            }
            FieldType::Time => {
                if !value.as_str().is_some_and(|s| time_re().is_match(s)) {
                    format_error(errors);
                }
            }
            FieldType::Number => match value.as_f64() {
                Some(n) => self.check_bounds(n, errors),
                None => errors.push(FieldError::new(&self.name, "Expected type number")),
            },
            other => {
                let expected = other.to_string();
                if json_kind(value) != expected {
                    errors.push(FieldError::new(
                        &self.name,
                        format!("Expected type {}", expected),
                    ));
                }
            }
        }
    }

    fn check_bounds(&self, n: f64, errors: &mut Vec<FieldError>) {
        if let Some(min) = self.minimum {
            if n < min {
                errors.push(FieldError::new(
                    &self.name,
                    format!("Value must be at least {}", min),
                ));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                errors.push(FieldError::new(
                    &self.name,
                    format!("Value must be at most {}", max),
                ));
            }
        }
        if let Some(bound) = self.exclusive_minimum {
            if n <= bound {
                errors.push(FieldError::new(
                    &self.name,
                    format!("Value must be greater than {}", bound),
                ));
            }
        }
        if let Some(bound) = self.exclusive_maximum {
            if n >= bound {
                errors.push(FieldError::new(
                    &self.name,
                    format!("Value must be less than {}", bound),
                ));
            }
        }
    }
}

/// The JSON counterpart of a run-time `typeof` check.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
    }
}

fn datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{3})?Z?$").expect("valid regex")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"))
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d:[0-5]\d$").expect("valid regex"))
}

/// Serialized date values (chrono's RFC 3339 output) count as native dates.
fn is_serialized_date(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
}

fn is_datetime(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| datetime_re().is_match(s) || is_serialized_date(s))
}

fn is_date(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| date_re().is_match(s) || is_serialized_date(s))
}

/// A single validation failure. `field` is `None` for record-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: Option<String>,
    pub error: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            error: error.into(),
        }
    }

    pub fn record(error: impl Into<String>) -> Self {
        Self {
            field: None,
            error: error.into(),
        }
    }
}

/// Outcome of validating a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
}

/// Schema for a collection.
///
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Schema {
    name: CollectionName,
    fields: Vec<FieldDef>,
    patterns: HashMap<String, Regex>,
}

impl Schema {
    /// Create a schema from typed field definitions.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidSchema(
                "schema name must be a non-empty string".into(),
            ));
        }

        let mut patterns = HashMap::new();
        let mut primary_key: Option<&str> = None;
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::InvalidSchema(format!(
                    "field '{}' is defined more than once",
                    field.name
                )));
            }
            if field.primary_key {
                if let Some(existing) = primary_key {
                    return Err(Error::InvalidSchema(format!(
                        "multiple primary keys: '{}' and '{}'",
                        existing, field.name
                    )));
                }
                primary_key = Some(&field.name);
            }
            if let Some(pattern) = &field.pattern {
                let re = Regex::new(pattern).map_err(|e| {
                    Error::InvalidSchema(format!("invalid pattern for '{}': {}", field.name, e))
                })?;
                patterns.insert(field.name.clone(), re);
            }
        }

        Ok(Self {
            name,
            fields,
            patterns,
        })
    }

    /// Parse a `{ "name": ..., "fields": { field: { "type": ..., ... } } }` definition.
    ///
    /// Field order follows the order of the `fields` object.
    pub fn from_json(definition: &Value) -> Result<Self> {
        let name = definition
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidSchema("schema name must be a non-empty string".into()))?;
        let field_map = definition
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::InvalidSchema(format!("fields of '{}' must be an object", name)))?;

        let mut fields = Vec::with_capacity(field_map.len());
        for (field_name, raw) in field_map {
            if raw.get("type").is_none() {
                return Err(Error::InvalidSchema(format!(
                    "field '{}' is missing a type",
                    field_name
                )));
            }
            let mut field: FieldDef = serde_json::from_value(raw.clone()).map_err(|e| {
                Error::InvalidSchema(format!("field '{}' is malformed: {}", field_name, e))
            })?;
            field.name = field_name.clone();
            fields.push(field);
        }

        Self::new(name, fields)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field definitions in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Names of required fields, in declaration order.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    /// Fields whose values must be unique across the collection.
    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Validate a record, collecting every violation.
    ///
    /// Fields present in the record but absent from the schema are ignored.
    pub fn validate(&self, record: &Value) -> ValidationReport {
        let Some(obj) = record.as_object() else {
            return ValidationReport {
                is_valid: false,
                errors: vec![FieldError::record("Record must be an object")],
            };
        };

        let mut errors = Vec::new();
        for field in &self.fields {
            let value = match obj.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(FieldError::new(&field.name, "Field is required"));
                    }
                    continue;
                }
                Some(v) => v,
            };

            field.check_type(value, &mut errors);

            if let Value::String(s) = value {
                if let Some(min) = field.min_length {
                    if s.chars().count() < min {
                        errors.push(FieldError::new(
                            &field.name,
                            format!("Must be at least {} characters", min),
                        ));
                    }
                }
                if let Some(re) = self.patterns.get(&field.name) {
                    if !re.is_match(s) {
                        errors.push(FieldError::new(
                            &field.name,
                            "Does not match required pattern",
                        ));
                    }
                }
            }
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Validate a record, turning any violation into [`Error::Validation`].
    pub fn validate_strict(&self, record: &Value) -> Result<()> {
        let report = self.validate(record);
        if report.is_valid {
            Ok(())
        } else {
            Err(Error::Validation {
                collection: self.name.clone(),
                errors: report.errors,
            })
        }
    }
}
