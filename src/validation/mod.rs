//! Typed request contracts.
//!
//! Bodies arrive as untrusted JSON. Each parser walks the object, records a
//! [FieldError] for every offending field and only returns a value when the
//! whole body is acceptable, so handlers never see a half-valid request.

pub mod auth;
pub mod report;
pub mod transaction;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::FieldError;

/// Cursor over one JSON object that accumulates field errors.
pub struct Fields<'a> {
    object: Option<&'a Map<String, Value>>,
    prefix: String,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self::nested(value, "")
    }

    /// Reports errors as `<prefix>.<field>`.
    pub fn nested(value: &'a Value, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let object = value.as_object();
        let mut errors = Vec::new();
        if object.is_none() {
            let field = if prefix.is_empty() { "body".to_string() } else { prefix.clone() };
            errors.push(FieldError::new(field, "Expected an object"));
        }

        Self {
            object,
            prefix,
            errors,
        }
    }

    pub fn path(&self, field: &str) -> String {
        if self.prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{field}", self.prefix)
        }
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        let path = self.path(field);
        self.errors.push(FieldError::new(path, message));
    }

    /// The raw value, `None` when absent or explicitly null.
    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.object
            .and_then(|object| object.get(field))
            .filter(|value| !value.is_null())
    }

    pub fn is_null(&self, field: &str) -> bool {
        self.object
            .and_then(|object| object.get(field))
            .is_some_and(Value::is_null)
    }

    /// A string field. When `required` is set, a missing value is reported
    /// with that message.
    pub fn str(&mut self, field: &str, required: Option<&str>) -> Option<&'a str> {
        match self.get(field) {
            Some(Value::String(value)) => Some(value.as_str()),
            Some(_) => {
                self.error(field, "Expected string");
                None
            }
            None => {
                if let Some(message) = required {
                    self.error(field, message);
                }
                None
            }
        }
    }

    pub fn number(&mut self, field: &str, required: Option<&str>) -> Option<f64> {
        match self.get(field) {
            Some(Value::Number(value)) => value.as_f64(),
            Some(_) => {
                self.error(field, "Expected number");
                None
            }
            None => {
                if let Some(message) = required {
                    self.error(field, message);
                }
                None
            }
        }
    }

    pub fn boolean(&mut self, field: &str) -> Option<bool> {
        match self.get(field) {
            Some(Value::Bool(value)) => Some(*value),
            Some(_) => {
                self.error(field, "Expected boolean");
                None
            }
            None => None,
        }
    }

    /// A string enumeration, decoded through the type's serde representation.
    pub fn choice<T: DeserializeOwned>(&mut self, field: &str, message: &str, required: bool) -> Option<T> {
        match self.get(field) {
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(choice) => Some(choice),
                Err(_) => {
                    self.error(field, message);
                    None
                }
            },
            None => {
                if required {
                    self.error(field, message);
                }
                None
            }
        }
    }

    pub fn array(&mut self, field: &str, required: &str) -> Option<&'a Vec<Value>> {
        match self.get(field) {
            Some(Value::Array(items)) => Some(items),
            Some(_) => {
                self.error(field, "Expected array");
                None
            }
            None => {
                self.error(field, required);
                None
            }
        }
    }

    pub fn absorb(&mut self, errors: Vec<FieldError>) {
        self.errors.extend(errors);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.errors
    }

    /// `Ok(value)` when no error was recorded; `build` only runs in that case.
    pub fn finish<T>(self, build: impl FnOnce() -> Option<T>) -> Result<T, Vec<FieldError>> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        build().ok_or_else(|| vec![FieldError::new("body", "Invalid request body")])
    }
}

/// Length check in characters rather than bytes.
pub fn check_length(fields: &mut Fields<'_>, field: &str, value: &str, min: usize, max: usize) -> bool {
    let len = value.chars().count();
    if len < min {
        fields.error(field, format!("{field} must contain at least {min} character(s)"));
        false
    } else if len > max {
        fields.error(field, format!("{field} must contain at most {max} character(s)"));
        false
    } else {
        true
    }
}
