//! Payload normalization into JSON documents.
//!
//! Request bodies, response bodies and error messages arrive as arbitrary
//! strings. Audit rows store them as JSON documents, so every string goes
//! through [`normalize`] first. Normalization never fails: text that is not
//! valid JSON is wrapped as `{"raw": "<text>"}` and kept verbatim.

use serde_json::{Map, Value};
use tracing::debug;

/// Field name used to wrap text that did not parse as JSON.
pub const RAW_FIELD: &str = "raw";

/// Outcome of normalizing one string.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Input was absent; stored as an empty document.
    Empty,

    /// Input parsed as JSON.
    Document(Value),

    /// Input did not parse and was wrapped under [`RAW_FIELD`].
    Fallback(Value),
}

impl Normalized {
    /// Classifies and converts `raw`.
    pub fn from_raw(raw: Option<&str>) -> Self {
        let Some(text) = raw else {
            return Self::Empty;
        };

        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::Document(value),
            Err(e) => {
                debug!(error = %e, len = text.len(), "payload is not JSON, storing raw text");
                let mut wrapper = Map::with_capacity(1);
                wrapper.insert(RAW_FIELD.to_string(), Value::String(text.to_string()));
                Self::Fallback(Value::Object(wrapper))
            },
        }
    }

    /// Whether the input had to be wrapped.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// The document to persist.
    pub fn into_value(self) -> Value {
        match self {
            Self::Empty => Value::Object(Map::new()),
            Self::Document(value) | Self::Fallback(value) => value,
        }
    }
}

/// Converts an optional string into a JSON document.
///
/// - `None` becomes `{}`.
/// - Valid JSON becomes the parsed document with structure and types intact.
/// - Anything else becomes `{"raw": <input>}`.
///
/// # Example
///
/// ```
/// use callaudit_core::normalize;
/// use serde_json::json;
///
/// assert_eq!(normalize(None), json!({}));
/// assert_eq!(normalize(Some(r#"{"id":1}"#)), json!({"id": 1}));
/// assert_eq!(normalize(Some("oops")), json!({"raw": "oops"}));
/// ```
pub fn normalize(raw: Option<&str>) -> Value {
    Normalized::from_raw(raw).into_value()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn absent_payload_is_empty_document() {
        assert_eq!(normalize(None), json!({}));
        assert_eq!(Normalized::from_raw(None), Normalized::Empty);
    }

    #[test]
    fn valid_json_keeps_types() {
        let text = r#"{"n":1.5,"flag":true,"list":[1,"two",null],"nested":{"a":{}}}"#;
        let doc = normalize(Some(text));

        assert_eq!(doc["n"], json!(1.5));
        assert_eq!(doc["flag"], json!(true));
        assert_eq!(doc["list"], json!([1, "two", null]));
        assert_eq!(doc["nested"], json!({"a": {}}));
    }

    #[test]
    fn scalar_json_is_a_document_too() {
        assert_eq!(normalize(Some("42")), json!(42));
        assert_eq!(normalize(Some("\"text\"")), json!("text"));
        assert_eq!(normalize(Some("null")), Value::Null);
    }

    #[test]
    fn invalid_json_is_wrapped_verbatim() {
        let outcome = Normalized::from_raw(Some("Connection refused: /flaky"));

        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_value(), json!({"raw": "Connection refused: /flaky"}));
    }

    #[test]
    fn empty_string_falls_back() {
        assert_eq!(normalize(Some("")), json!({"raw": ""}));
    }

    #[test]
    fn truncated_json_falls_back() {
        let text = r#"{"item": "x""#;
        assert_eq!(normalize(Some(text)), json!({"raw": text}));
    }

    proptest! {
        #[test]
        fn normalize_matches_direct_parse(value in json_value()) {
            let text = value.to_string();
            prop_assert_eq!(normalize(Some(text.as_str())), value);
        }

        #[test]
        fn unparseable_text_is_wrapped_exactly(text in "[a-zA-Z ]{1,40}") {
            prop_assume!(serde_json::from_str::<Value>(&text).is_err());
            prop_assert_eq!(normalize(Some(text.as_str())), json!({ "raw": text.clone() }));
        }

        #[test]
        fn normalize_never_panics(text in any::<String>()) {
            let _ = normalize(Some(text.as_str()));
        }
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }
}
