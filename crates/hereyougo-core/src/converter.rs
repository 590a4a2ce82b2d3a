//! Value converters.
//!
//! A converter takes over storage casting for a property declared with
//! `convert=<Name>`. Names resolve first against the [`ConverterRegistry`]
//! and then against the entity class's own factory.

use crate::error::{BadTypeError, Error, Result};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Bidirectional encoding between an entity value and its stored string.
pub trait Converter: Send + Sync {
    /// Name used in `convert=<Name>`.
    fn name(&self) -> &str;

    fn encode(&self, value: &Value) -> Result<String>;

    fn decode(&self, raw: &str) -> Result<Value>;
}

impl fmt::Debug for dyn Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Converter({})", self.name())
    }
}

/// Stores any value as a JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn name(&self) -> &str {
        "JSON"
    }

    fn encode(&self, value: &Value) -> Result<String> {
        serde_json::to_string(&value.to_json()).map_err(|e| {
            Error::BadType(BadTypeError {
                what: "JSON converter".to_string(),
                expected: "encodable value".to_string(),
                actual: Some(e.to_string()),
            })
        })
    }

    fn decode(&self, raw: &str) -> Result<Value> {
        serde_json::from_str(raw).map(Value::Json).map_err(|e| {
            Error::BadType(BadTypeError {
                what: "JSON converter".to_string(),
                expected: "valid JSON document".to_string(),
                actual: Some(e.to_string()),
            })
        })
    }
}

/// Converters available to every entity class by name.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the standard converters (`JSON`).
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonConverter));
        registry
    }

    /// Register a converter under its own name, replacing any previous one.
    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        tracing::debug!(converter = converter.name(), "Registering converter");
        self.converters
            .insert(converter.name().to_string(), converter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Converter>> {
        self.converters.get(name).cloned()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.converters.keys().collect();
        names.sort();
        f.debug_struct("ConverterRegistry")
            .field("converters", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_converter_round_trip() {
        let converter = JsonConverter;
        let encoded = converter
            .encode(&Value::Json(json!({"backend": "embedded"})))
            .unwrap();
        assert_eq!(encoded, r#"{"backend":"embedded"}"#);
        assert_eq!(
            converter.decode(&encoded).unwrap(),
            Value::Json(json!({"backend": "embedded"}))
        );
    }

    #[test]
    fn json_converter_rejects_garbage() {
        let err = JsonConverter.decode("{not json").unwrap_err();
        assert_eq!(err.code(), "bad_type");
    }

    #[test]
    fn standard_registry_has_json() {
        let registry = ConverterRegistry::standard();
        assert!(registry.get("JSON").is_some());
        assert!(registry.get("XML").is_none());
    }
}
