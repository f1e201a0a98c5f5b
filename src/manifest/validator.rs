//! Recursive value validation against a manifest.
//!
//! Pure and deterministic: the same manifest and arguments always produce
//! the same verdict. Timing and field counts ride along as metadata.

use crate::manifest::{ArgumentManifest, ArgumentType, Manifest, RequestManifest};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// What went wrong with one field. `UnresolvedModelRef` is distinct from
/// value-shape mismatches so callers can tell a broken manifest from bad
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    MissingRequired,
    UnknownArgument,
    UnexpectedArguments,
    TypeMismatch,
    ConstraintViolation,
    UnresolvedModelRef,
}

/// One field-level failure, with a dotted/bracketed path to the value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFieldError {
    pub kind: ValidationErrorKind,
    pub field: String,
    pub message: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of a validation pass.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationFieldError>,
    pub validation_time_ms: f64,
    pub fields_validated: usize,
}

impl ValidationResult {
    /// Join all error messages for a one-line diagnostic.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Whether any failure is about argument presence (missing, unknown,
    /// unexpected) rather than value shape.
    pub fn has_presence_errors(&self) -> bool {
        self.errors.iter().any(|e| {
            matches!(
                e.kind,
                ValidationErrorKind::MissingRequired
                    | ValidationErrorKind::UnknownArgument
                    | ValidationErrorKind::UnexpectedArguments
            )
        })
    }
}

/// Validator bound to one manifest (for `model_ref` resolution).
pub struct ManifestValidator<'a> {
    manifest: &'a Manifest,
}

impl<'a> ManifestValidator<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self { manifest }
    }

    /// Validate the argument map of a request against its declared shapes.
    pub fn validate_request_args(
        &self,
        request: &RequestManifest,
        args: Option<&HashMap<String, Value>>,
    ) -> ValidationResult {
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut fields = 0usize;

        let empty = HashMap::new();
        let supplied = args.unwrap_or(&empty);

        if request.args.is_empty() {
            if !supplied.is_empty() {
                errors.push(ValidationFieldError {
                    kind: ValidationErrorKind::UnexpectedArguments,
                    field: "args".to_string(),
                    message: format!(
                        "request declares no arguments but {} were supplied",
                        supplied.len()
                    ),
                    expected: "no arguments".to_string(),
                    actual: format!("{} arguments", supplied.len()),
                });
            }
            return finish(started, errors, fields);
        }

        // Required args present and non-null.
        for (name, shape) in &request.args {
            if !shape.required {
                continue;
            }
            match supplied.get(name) {
                None | Some(Value::Null) => errors.push(ValidationFieldError {
                    kind: ValidationErrorKind::MissingRequired,
                    field: format!("args.{name}"),
                    message: format!("required argument '{name}' is missing"),
                    expected: shape.arg_type.name().to_string(),
                    actual: "absent".to_string(),
                }),
                Some(_) => {}
            }
        }

        // Every supplied arg must be declared, and each declared one is
        // validated recursively.
        for (name, value) in supplied {
            match request.args.get(name) {
                Some(shape) => {
                    self.validate_value(&format!("args.{name}"), value, shape, &mut errors, &mut fields)
                }
                None => errors.push(ValidationFieldError {
                    kind: ValidationErrorKind::UnknownArgument,
                    field: format!("args.{name}"),
                    message: format!("argument '{name}' is not declared for this request"),
                    expected: "a declared argument".to_string(),
                    actual: name.clone(),
                }),
            }
        }

        finish(started, errors, fields)
    }

    /// Validate a handler's response value against the declared response
    /// shape. Same recursive rules as arguments.
    pub fn validate_response(
        &self,
        value: &Value,
        shape: &ArgumentManifest,
    ) -> ValidationResult {
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut fields = 0usize;
        self.validate_value("response", value, shape, &mut errors, &mut fields);
        finish(started, errors, fields)
    }

    fn validate_value(
        &self,
        path: &str,
        value: &Value,
        shape: &ArgumentManifest,
        errors: &mut Vec<ValidationFieldError>,
        fields: &mut usize,
    ) {
        *fields += 1;

        match shape.arg_type {
            ArgumentType::String => self.validate_string(path, value, shape, errors),
            ArgumentType::Number => self.validate_number(path, value, shape, errors, false),
            ArgumentType::Integer => self.validate_number(path, value, shape, errors, true),
            ArgumentType::Boolean => {
                if !value.is_boolean() {
                    errors.push(type_mismatch(path, "boolean", value));
                }
            }
            ArgumentType::Array => self.validate_array(path, value, shape, errors, fields),
            ArgumentType::Object => self.validate_object(path, value, shape, errors, fields),
        }
    }

    fn validate_string(
        &self,
        path: &str,
        value: &Value,
        shape: &ArgumentManifest,
        errors: &mut Vec<ValidationFieldError>,
    ) {
        let Some(s) = value.as_str() else {
            errors.push(type_mismatch(path, "string", value));
            return;
        };

        let length = s.chars().count();
        if let Some(min) = shape.min_length {
            if length < min {
                errors.push(constraint(
                    path,
                    format!("string of {length} characters is shorter than {min}"),
                    format!("length >= {min}"),
                    length.to_string(),
                ));
            }
        }
        if let Some(max) = shape.max_length {
            if length > max {
                errors.push(constraint(
                    path,
                    format!("string of {length} characters is longer than {max}"),
                    format!("length <= {max}"),
                    length.to_string(),
                ));
            }
        }
        if let Some(pattern) = &shape.pattern {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        errors.push(constraint(
                            path,
                            format!("value does not match pattern '{pattern}'"),
                            pattern.clone(),
                            s.to_string(),
                        ));
                    }
                }
                Err(e) => errors.push(constraint(
                    path,
                    format!("declared pattern '{pattern}' does not compile: {e}"),
                    "a valid regex".to_string(),
                    pattern.clone(),
                )),
            }
        }
        if let Some(allowed) = &shape.enum_values {
            if !allowed.iter().any(|v| v == s) {
                errors.push(constraint(
                    path,
                    format!("value '{s}' is not one of the allowed set"),
                    format!("{allowed:?}"),
                    s.to_string(),
                ));
            }
        }
    }

    fn validate_number(
        &self,
        path: &str,
        value: &Value,
        shape: &ArgumentManifest,
        errors: &mut Vec<ValidationFieldError>,
        integral: bool,
    ) {
        let Some(n) = value.as_f64().filter(|_| value.is_number()) else {
            errors.push(type_mismatch(
                path,
                if integral { "integer" } else { "number" },
                value,
            ));
            return;
        };

        if integral && n.fract() != 0.0 {
            errors.push(type_mismatch(path, "integer", value));
            return;
        }
        if let Some(min) = shape.minimum {
            if n < min {
                errors.push(constraint(
                    path,
                    format!("{n} is below the minimum {min}"),
                    format!(">= {min}"),
                    n.to_string(),
                ));
            }
        }
        if let Some(max) = shape.maximum {
            if n > max {
                errors.push(constraint(
                    path,
                    format!("{n} is above the maximum {max}"),
                    format!("<= {max}"),
                    n.to_string(),
                ));
            }
        }
    }

    fn validate_array(
        &self,
        path: &str,
        value: &Value,
        shape: &ArgumentManifest,
        errors: &mut Vec<ValidationFieldError>,
        fields: &mut usize,
    ) {
        let Some(items) = value.as_array() else {
            errors.push(type_mismatch(path, "array", value));
            return;
        };
        if let Some(item_shape) = &shape.items {
            for (i, item) in items.iter().enumerate() {
                self.validate_value(&format!("{path}[{i}]"), item, item_shape, errors, fields);
            }
        }
    }

    fn validate_object(
        &self,
        path: &str,
        value: &Value,
        shape: &ArgumentManifest,
        errors: &mut Vec<ValidationFieldError>,
        fields: &mut usize,
    ) {
        let Some(map) = value.as_object() else {
            errors.push(type_mismatch(path, "object", value));
            return;
        };

        if let Some(model_ref) = &shape.model_ref {
            let Some(model) = self.manifest.resolve_model(model_ref) else {
                errors.push(ValidationFieldError {
                    kind: ValidationErrorKind::UnresolvedModelRef,
                    field: path.to_string(),
                    message: format!("unresolved model reference '{model_ref}'"),
                    expected: "a model declared in the manifest".to_string(),
                    actual: model_ref.clone(),
                });
                return;
            };
            self.validate_properties(path, map, &model.properties, &model.required, errors, fields);
            return;
        }

        if let Some(properties) = &shape.properties {
            let required: Vec<String> = properties
                .iter()
                .filter(|(_, p)| p.required)
                .map(|(name, _)| name.clone())
                .collect();
            self.validate_properties(path, map, properties, &required, errors, fields);
        }
    }

    fn validate_properties(
        &self,
        path: &str,
        map: &serde_json::Map<String, Value>,
        properties: &HashMap<String, ArgumentManifest>,
        required: &[String],
        errors: &mut Vec<ValidationFieldError>,
        fields: &mut usize,
    ) {
        for name in required {
            match map.get(name) {
                None | Some(Value::Null) => errors.push(ValidationFieldError {
                    kind: ValidationErrorKind::MissingRequired,
                    field: format!("{path}.{name}"),
                    message: format!("required property '{name}' is missing"),
                    expected: properties
                        .get(name)
                        .map(|p| p.arg_type.name().to_string())
                        .unwrap_or_else(|| "present".to_string()),
                    actual: "absent".to_string(),
                }),
                Some(_) => {}
            }
        }
        for (name, prop_shape) in properties {
            if let Some(prop_value) = map.get(name) {
                if !prop_value.is_null() {
                    self.validate_value(
                        &format!("{path}.{name}"),
                        prop_value,
                        prop_shape,
                        errors,
                        fields,
                    );
                }
            }
        }
    }
}

fn finish(
    started: Instant,
    errors: Vec<ValidationFieldError>,
    fields_validated: usize,
) -> ValidationResult {
    ValidationResult {
        valid: errors.is_empty(),
        validation_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        errors,
        fields_validated,
    }
}

fn type_mismatch(path: &str, expected: &str, value: &Value) -> ValidationFieldError {
    ValidationFieldError {
        kind: ValidationErrorKind::TypeMismatch,
        field: path.to_string(),
        message: format!("expected {expected}, got {}", value_type_name(value)),
        expected: expected.to_string(),
        actual: value_type_name(value).to_string(),
    }
}

fn constraint(
    path: &str,
    message: String,
    expected: String,
    actual: String,
) -> ValidationFieldError {
    ValidationFieldError {
        kind: ValidationErrorKind::ConstraintViolation,
        field: path.to_string(),
        message,
        expected,
        actual,
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
