//! Per-signal payload shapes.
//!
//! A schema lists the keys a signal's payload must carry and their JSON
//! kind. Payloads are checked before any handler sees them.

use super::signal::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// JSON kind expected for a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// Why a payload was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("Missing required field {field:?}")]
    MissingField { field: String },

    #[error("Field {field:?} must be of kind {expected:?}")]
    WrongKind { field: String, expected: FieldKind },
}

/// Required fields of one signal's payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadSchema {
    required: Vec<(String, FieldKind)>,
}

impl PayloadSchema {
    /// Schema with no requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to be present with the given kind.
    #[must_use]
    pub fn require(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.required.push((field.into(), kind));
        self
    }

    /// Check a payload against this schema.
    pub fn validate(&self, payload: &Payload) -> Result<(), SchemaViolation> {
        for (field, kind) in &self.required {
            let Some(value) = payload.get(field) else {
                return Err(SchemaViolation::MissingField {
                    field: field.clone(),
                });
            };
            if !kind.matches(value) {
                return Err(SchemaViolation::WrongKind {
                    field: field.clone(),
                    expected: *kind,
                });
            }
        }
        Ok(())
    }
}

/// Schemas keyed by signal name. Signals without an entry are unchecked.
#[derive(Debug, Clone, Default)]
pub struct SchemaTable {
    schemas: HashMap<String, PayloadSchema>,
}

impl SchemaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the schema for a signal.
    pub fn insert(&mut self, signal: impl Into<String>, schema: PayloadSchema) {
        self.schemas.insert(signal.into(), schema);
    }

    pub fn get(&self, signal: &str) -> Option<&PayloadSchema> {
        self.schemas.get(signal)
    }

    /// Validate a payload for `signal`.
    pub fn validate(&self, signal: &str, payload: &Payload) -> Result<(), SchemaViolation> {
        match self.schemas.get(signal) {
            Some(schema) => schema.validate(payload),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
