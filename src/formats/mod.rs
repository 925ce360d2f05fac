//! Alternate output formats.
//!
//! A converter is a pure function from a kind's native read representation to
//! another wire shape. Converters are registered per kind under a selector;
//! `native` is always available and returns the read shape unchanged.

pub mod dcat_ap;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};

pub const NATIVE: &str = "native";

pub type Converter = fn(&Map<String, Value>) -> Value;

#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    converters: BTreeMap<(&'static str, &'static str), Converter>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: &'static str, selector: &'static str, converter: Converter) -> Self {
        self.converters.insert((kind, selector), converter);
        self
    }

    /// Recognized selectors of `kind`, `native` first.
    pub fn selectors(&self, kind: &str) -> Vec<String> {
        std::iter::once(NATIVE.to_string())
            .chain(
                self.converters
                    .keys()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, selector)| selector.to_string()),
            )
            .collect()
    }

    /// Converter for `requested`; `None` means the native shape.
    pub fn resolve(&self, kind: &str, requested: Option<&str>) -> ApiResult<Option<Converter>> {
        match requested {
            None | Some(NATIVE) => Ok(None),
            Some(selector) => self
                .converters
                .iter()
                .find(|((k, s), _)| *k == kind && *s == selector)
                .map(|(_, converter)| Some(*converter))
                .ok_or_else(|| ApiError::UnsupportedSchema {
                    requested: selector.to_string(),
                    supported: self.selectors(kind),
                }),
        }
    }
}

/// Apply an optional converter to a native representation.
pub fn render(converter: Option<Converter>, native: Map<String, Value>) -> Value {
    match converter {
        Some(convert) => convert(&native),
        None => Value::Object(native),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upper(native: &Map<String, Value>) -> Value {
        json!({ "NAME": native.get("name") })
    }

    #[test]
    fn test_unknown_selector_lists_recognized_ones() {
        let formats = FormatRegistry::new().register("dataset", "upper", upper);
        match formats.resolve("dataset", Some("unknown-format")) {
            Err(ApiError::UnsupportedSchema { supported, .. }) => {
                assert_eq!(supported, vec!["native", "upper"])
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(formats.resolve("publication", Some("upper")).is_err());
    }

    #[test]
    fn test_render_native_and_converted() {
        let formats = FormatRegistry::new().register("dataset", "upper", upper);
        let mut native = Map::new();
        native.insert("name".to_string(), json!("iris"));

        assert!(formats.resolve("dataset", Some("native")).unwrap().is_none());
        let converter = formats.resolve("dataset", Some("upper")).unwrap();
        assert_eq!(render(converter, native.clone()), json!({"NAME": "iris"}));
        assert_eq!(render(None, native), json!({"name": "iris"}));
    }
}
