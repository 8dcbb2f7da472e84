//! Wire Values
//!
//! The closed set of shapes a tool argument or result can take on the wire,
//! and the kinds that describe them in the catalog.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single tagged value.
///
/// Serialized externally tagged: `{"text": "hi"}`, `{"list": [{"int": 1}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WireValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    File(FileRef),
}

/// Path and display name of a file whose bytes travel out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileRef {
    pub path: String,
    pub name: String,
}

impl WireValue {
    pub fn text(s: impl Into<String>) -> Self {
        WireValue::Text(s.into())
    }

    /// Short name of the shape, used in error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            WireValue::Bool(_) => "bool",
            WireValue::Int(_) => "int",
            WireValue::Float(_) => "float",
            WireValue::Text(_) => "text",
            WireValue::List(_) => "list",
            WireValue::Map(_) => "map",
            WireValue::File(_) => "file",
        }
    }

    /// File references in document order. Map entries are visited in key order.
    pub fn files(&self) -> Vec<&FileRef> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a FileRef>) {
        match self {
            WireValue::File(f) => out.push(f),
            WireValue::List(items) => items.iter().for_each(|v| v.collect_files(out)),
            WireValue::Map(entries) => entries.values().for_each(|v| v.collect_files(out)),
            _ => {}
        }
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        WireValue::Bool(b)
    }
}

impl From<i64> for WireValue {
    fn from(n: i64) -> Self {
        WireValue::Int(n)
    }
}

impl From<f64> for WireValue {
    fn from(x: f64) -> Self {
        WireValue::Float(x)
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::Text(s.to_string())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::Text(s)
    }
}

/// The declared shape of a parameter or return value.
///
/// Serialized adjacently tagged: `{"type": "list", "of": {"type": "text"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Integer,
    Float,
    Text,
    File,
    List(Box<ValueKind>),
    Map(Box<ValueKind>),
    /// Nothing. Only meaningful as a return kind.
    Unit,
}

impl ValueKind {
    pub fn list_of(inner: ValueKind) -> Self {
        ValueKind::List(Box::new(inner))
    }

    pub fn map_of(inner: ValueKind) -> Self {
        ValueKind::Map(Box::new(inner))
    }

    /// Whether `value` has exactly this shape. No coercion: an int is not a float.
    pub fn admits(&self, value: &WireValue) -> bool {
        match (self, value) {
            (ValueKind::Bool, WireValue::Bool(_)) => true,
            (ValueKind::Integer, WireValue::Int(_)) => true,
            (ValueKind::Float, WireValue::Float(x)) => x.is_finite(),
            (ValueKind::Text, WireValue::Text(_)) => true,
            (ValueKind::File, WireValue::File(_)) => true,
            (ValueKind::List(inner), WireValue::List(items)) => {
                items.iter().all(|v| inner.admits(v))
            }
            (ValueKind::Map(inner), WireValue::Map(entries)) => {
                entries.values().all(|v| inner.admits(v))
            }
            _ => false,
        }
    }

    /// True if `Unit` appears anywhere in this kind.
    pub fn contains_unit(&self) -> bool {
        match self {
            ValueKind::Unit => true,
            ValueKind::List(inner) | ValueKind::Map(inner) => inner.contains_unit(),
            _ => false,
        }
    }

    /// JSON Schema for the wire form of this kind.
    pub fn json_schema(&self) -> Value {
        fn tagged(tag: &str, inner: Value) -> Value {
            json!({
                "type": "object",
                "properties": { tag: inner },
                "required": [tag],
                "additionalProperties": false
            })
        }

        match self {
            ValueKind::Bool => tagged("bool", json!({"type": "boolean"})),
            ValueKind::Integer => tagged("int", json!({"type": "integer"})),
            ValueKind::Float => tagged("float", json!({"type": "number"})),
            ValueKind::Text => tagged("text", json!({"type": "string"})),
            ValueKind::File => tagged(
                "file",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "name": {"type": "string"}
                    },
                    "required": ["path", "name"]
                }),
            ),
            ValueKind::List(inner) => tagged(
                "list",
                json!({"type": "array", "items": inner.json_schema()}),
            ),
            ValueKind::Map(inner) => tagged(
                "map",
                json!({"type": "object", "additionalProperties": inner.json_schema()}),
            ),
            ValueKind::Unit => json!({"type": "null"}),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::Integer => f.write_str("int"),
            ValueKind::Float => f.write_str("float"),
            ValueKind::Text => f.write_str("text"),
            ValueKind::File => f.write_str("file"),
            ValueKind::List(inner) => write!(f, "list<{}>", inner),
            ValueKind::Map(inner) => write!(f, "map<text, {}>", inner),
            ValueKind::Unit => f.write_str("unit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_form_is_externally_tagged() {
        let v = WireValue::List(vec![WireValue::Int(1), WireValue::text("two")]);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, json!({"list": [{"int": 1}, {"text": "two"}]}));
    }

    #[test]
    fn file_ref_wire_form() {
        let v = WireValue::File(FileRef {
            path: "/tmp/out.csv".into(),
            name: "out.csv".into(),
        });
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, json!({"file": {"path": "/tmp/out.csv", "name": "out.csv"}}));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let res = serde_json::from_value::<WireValue>(json!({"bytes": "AAAA"}));
        assert!(res.is_err());
    }

    #[test]
    fn floats_survive_json_exactly() {
        for x in [0.1_f64, 1.0 / 3.0, f64::MAX, f64::MIN_POSITIVE, -2.5e-300] {
            let text = serde_json::to_string(&WireValue::Float(x)).unwrap();
            let back: WireValue = serde_json::from_str(&text).unwrap();
            assert_eq!(back, WireValue::Float(x));
        }
    }

    #[test]
    fn admits_is_strict_about_numbers() {
        assert!(ValueKind::Integer.admits(&WireValue::Int(3)));
        assert!(!ValueKind::Float.admits(&WireValue::Int(3)));
        assert!(!ValueKind::Integer.admits(&WireValue::Float(3.0)));
        assert!(!ValueKind::Float.admits(&WireValue::Float(f64::NAN)));
    }

    #[test]
    fn admits_checks_nested_elements() {
        let kind = ValueKind::map_of(ValueKind::list_of(ValueKind::Text));
        let mut good = BTreeMap::new();
        good.insert("a".to_string(), WireValue::List(vec![WireValue::text("x")]));
        assert!(kind.admits(&WireValue::Map(good)));

        let mut bad = BTreeMap::new();
        bad.insert("a".to_string(), WireValue::List(vec![WireValue::Bool(true)]));
        assert!(!kind.admits(&WireValue::Map(bad)));
    }

    #[test]
    fn unit_admits_nothing() {
        assert!(!ValueKind::Unit.admits(&WireValue::List(vec![])));
        assert!(ValueKind::list_of(ValueKind::Unit).contains_unit());
        assert!(!ValueKind::list_of(ValueKind::Text).contains_unit());
    }

    #[test]
    fn files_are_listed_in_document_order() {
        let f = |n: &str| {
            WireValue::File(FileRef {
                path: format!("/data/{}", n),
                name: n.to_string(),
            })
        };
        let mut m = BTreeMap::new();
        m.insert("b".to_string(), f("second"));
        m.insert("a".to_string(), f("first"));
        let v = WireValue::List(vec![WireValue::Map(m), f("third")]);

        let names: Vec<&str> = v.files().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn kind_display_and_wire_form() {
        let k = ValueKind::list_of(ValueKind::map_of(ValueKind::Float));
        assert_eq!(k.to_string(), "list<map<text, float>>");
        let json = serde_json::to_value(&k).unwrap();
        assert_eq!(
            json,
            json!({"type": "list", "of": {"type": "map", "of": {"type": "float"}}})
        );
        let back: ValueKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, k);
    }

    #[test]
    fn kind_schema_describes_the_tag() {
        let schema = ValueKind::list_of(ValueKind::Text).json_schema();
        assert_eq!(schema["required"], json!(["list"]));
        assert_eq!(schema["properties"]["list"]["type"], "array");
        assert_eq!(
            schema["properties"]["list"]["items"]["properties"]["text"]["type"],
            "string"
        );
    }
}
