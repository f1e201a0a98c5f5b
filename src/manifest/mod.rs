//! Manifest — the declarative contract a server exposes.
//!
//! A manifest names the recognized requests, the shape of their arguments
//! and responses, and reusable models referenced by name. The same parsed
//! structure drives client-side argument validation before a send and
//! server-side validation before dispatch.
//!
//! Built-in requests exist irrespective of manifest contents; the manifest
//! only describes what the application adds on top.

pub mod validator;

pub use validator::{
    ManifestValidator, ValidationErrorKind, ValidationFieldError, ValidationResult,
};

use crate::error::JanusError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Value type of a manifest argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ArgumentType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Shape of one argument (or response) value. Nested `items`/`properties`
/// describe arrays and objects; `model_ref` points into `Manifest::models`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArgumentManifest {
    #[serde(rename = "type")]
    pub arg_type: ArgumentType,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Regex the full string value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Closed set of accepted string values.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,

    /// Name of a `ModelDefinition` supplying properties for this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,

    /// Element shape for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ArgumentManifest>>,

    /// Property shapes for objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, ArgumentManifest>>,
}

impl ArgumentManifest {
    /// Minimal shape of the given type; callers fill in constraints.
    pub fn of_type(arg_type: ArgumentType) -> Self {
        Self {
            arg_type,
            required: false,
            description: None,
            pattern: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            enum_values: None,
            model_ref: None,
            items: None,
            properties: None,
        }
    }

    pub fn required_of_type(arg_type: ArgumentType) -> Self {
        Self {
            required: true,
            ..Self::of_type(arg_type)
        }
    }
}

/// Reusable named structure referenced via `model_ref`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelDefinition {
    #[serde(rename = "type", default)]
    pub model_type: String,

    #[serde(default)]
    pub properties: HashMap<String, ArgumentManifest>,

    #[serde(default)]
    pub required: Vec<String>,
}

/// One declared request: argument shapes and (optionally) the response
/// shape handlers are held to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestManifest {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub args: HashMap<String, ArgumentManifest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ArgumentManifest>,
}

/// The parsed contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub models: HashMap<String, ModelDefinition>,

    #[serde(default)]
    pub requests: HashMap<String, RequestManifest>,
}

impl Manifest {
    /// Parse a manifest from JSON bytes.
    pub fn parse_json(data: &[u8]) -> Result<Self, JanusError> {
        serde_json::from_slice(data)
            .map_err(|e| JanusError::Manifest(format!("failed to parse manifest: {e}")))
    }

    /// Reconstruct a manifest from an already-decoded JSON value (e.g. the
    /// result of the `manifest` built-in).
    pub fn from_value(value: Value) -> Result<Self, JanusError> {
        serde_json::from_value(value)
            .map_err(|e| JanusError::Manifest(format!("failed to decode manifest: {e}")))
    }

    pub fn has_request(&self, name: &str) -> bool {
        self.requests.contains_key(name)
    }

    pub fn get_request(&self, name: &str) -> Result<&RequestManifest, JanusError> {
        self.requests
            .get(name)
            .ok_or_else(|| JanusError::UnknownRequest(name.to_string()))
    }

    /// Resolve a `model_ref`. Lazy: nothing checks references until a value
    /// is validated against them.
    pub fn resolve_model(&self, model_ref: &str) -> Option<&ModelDefinition> {
        self.models.get(model_ref)
    }
}
