//! Decoded metric points and their lazily typed field values.
//!
//! The wire format does not say whether `21.5` is a float, whether `t` is a
//! boolean or whether `"on"` is a string. Field values therefore keep the raw
//! wire text and resolve a [`TypedValue`] on first use.

use serde::de::{MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;
use std::sync::OnceLock;

/// Tag pairs in wire order, keys unique
pub type TagSet = SmallVec<[(String, String); 4]>;

/// Field pairs in wire order, keys unique
pub type FieldSet = SmallVec<[(String, FieldValue); 4]>;

/// A typed interpretation of a raw field value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// Float, or integer with an `i`/`u` suffix
    Number(f64),
    /// `t`, `true`, `f`, `false` in any of the accepted spellings
    Bool(bool),
    /// Quoted string (quotes stripped) or anything unparseable
    String(String),
}

impl TypedValue {
    /// Interpret raw wire text using line-protocol literal rules.
    pub fn parse(raw: &str) -> Self {
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return TypedValue::String(raw[1..raw.len() - 1].to_string());
        }

        match raw {
            "t" | "T" | "true" | "True" | "TRUE" => return TypedValue::Bool(true),
            "f" | "F" | "false" | "False" | "FALSE" => return TypedValue::Bool(false),
            _ => {},
        }

        if let Some(int) = raw.strip_suffix('i') {
            if let Ok(n) = int.parse::<i64>() {
                return TypedValue::Number(n as f64);
            }
        }
        if let Some(uint) = raw.strip_suffix('u') {
            if let Ok(n) = uint.parse::<u64>() {
                return TypedValue::Number(n as f64);
            }
        }

        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => TypedValue::Number(n),
            _ => TypedValue::String(raw.to_string()),
        }
    }
}

/// Raw field value with a lazily resolved type.
#[derive(Debug, Clone, Default)]
pub struct FieldValue {
    raw: String,
    typed: OnceLock<TypedValue>,
}

impl FieldValue {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        Self {
            raw: raw.into(),
            typed: OnceLock::new(),
        }
    }

    /// The value exactly as it appeared on the wire.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Resolve (once) and return the typed interpretation.
    pub fn typed(&self) -> &TypedValue {
        self.typed.get_or_init(|| TypedValue::parse(&self.raw))
    }

    /// Numeric view: numbers as-is, booleans as 1.0 / 0.0, strings as `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self.typed() {
            TypedValue::Number(n) => Some(*n),
            TypedValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            TypedValue::String(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.typed() {
            TypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl From<&str> for FieldValue {
    fn from(raw: &str) -> Self {
        FieldValue::new(raw)
    }
}

impl From<String> for FieldValue {
    fn from(raw: String) -> Self {
        FieldValue::new(raw)
    }
}

/// One decoded metric observation.
///
/// `measurement` is empty when the wire line did not carry one. Points are
/// immutable once decoded; the `with_*` helpers exist for producers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WirePoint")]
pub struct Point {
    pub measurement: String,
    pub tags: TagSet,
    pub fields: FieldSet,
    pub timestamp: Option<String>,
}

impl Point {
    pub fn new<S: Into<String>>(measurement: S) -> Self {
        Self {
            measurement: measurement.into(),
            ..Self::default()
        }
    }

    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.insert_tag(key.into(), value.into());
        self
    }

    pub fn with_field<K: Into<String>, V: Into<FieldValue>>(mut self, key: K, value: V) -> Self {
        self.insert_field(key.into(), value.into());
        self
    }

    pub fn with_timestamp<S: Into<String>>(mut self, timestamp: S) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Insert a tag, replacing an earlier value for the same key.
    pub fn insert_tag(&mut self, key: String, value: String) {
        match self.tags.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.tags.push((key, value)),
        }
    }

    /// Insert a field, replacing an earlier value for the same key.
    pub fn insert_field(&mut self, key: String, value: FieldValue) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// True when one of the tags renders exactly as `pair` (`key=value`).
    pub fn has_tag_pair(&self, pair: &str) -> bool {
        self.tags.iter().any(|(key, value)| {
            pair.len() == key.len() + 1 + value.len()
                && pair.starts_with(key.as_str())
                && pair.as_bytes()[key.len()] == b'='
                && pair.ends_with(value.as_str())
        })
    }

    /// Tags rendered as `key=value` strings.
    pub fn tag_pairs(&self) -> impl Iterator<Item = String> + '_ {
        self.tags.iter().map(|(k, v)| format!("{}={}", k, v))
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Point", 4)?;
        state.serialize_field("measurement", &self.measurement)?;
        state.serialize_field("tagPairs", &TagPairs(&self.tags))?;
        state.serialize_field("fields", &RawFields(&self.fields))?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.end()
    }
}

struct TagPairs<'a>(&'a TagSet);

impl Serialize for TagPairs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (key, value) in self.0.iter() {
            seq.serialize_element(&format_args!("{}={}", key, value))?;
        }
        seq.end()
    }
}

struct RawFields<'a>(&'a FieldSet);

impl Serialize for RawFields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0.iter() {
            map.serialize_entry(key, value.raw())?;
        }
        map.end()
    }
}

/// Delivery shape as other producers may send it: field values and
/// timestamps can be JSON strings, numbers or booleans.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePoint {
    #[serde(default)]
    measurement: String,
    #[serde(default)]
    tag_pairs: Vec<String>,
    #[serde(default)]
    fields: WireFields,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

/// Field map kept in document order.
#[derive(Default)]
struct WireFields(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for WireFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = WireFields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<WireFields, A::Error> {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                    fields.push(entry);
                }
                Ok(WireFields(fields))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

fn json_scalar_to_raw(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl From<WirePoint> for Point {
    fn from(wire: WirePoint) -> Self {
        let mut point = Point::new(wire.measurement);
        for pair in wire.tag_pairs {
            if let Some((key, value)) = pair.split_once('=') {
                point.insert_tag(key.to_string(), value.to_string());
            }
        }
        for (key, value) in wire.fields.0 {
            if let Some(raw) = json_scalar_to_raw(value) {
                point.insert_field(key, FieldValue::new(raw));
            }
        }
        point.timestamp = wire.timestamp.and_then(json_scalar_to_raw);
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_value_rules() {
        assert_eq!(TypedValue::parse("21.5"), TypedValue::Number(21.5));
        assert_eq!(TypedValue::parse("-3i"), TypedValue::Number(-3.0));
        assert_eq!(TypedValue::parse("7u"), TypedValue::Number(7.0));
        assert_eq!(TypedValue::parse("T"), TypedValue::Bool(true));
        assert_eq!(TypedValue::parse("false"), TypedValue::Bool(false));
        assert_eq!(TypedValue::parse("\"on\""), TypedValue::String("on".to_string()));
        assert_eq!(TypedValue::parse("abc"), TypedValue::String("abc".to_string()));
        assert_eq!(TypedValue::parse("NaN"), TypedValue::String("NaN".to_string()));
    }

    #[test]
    fn test_field_value_resolves_once() {
        let value = FieldValue::new("1e3");
        assert_eq!(value.as_f64(), Some(1000.0));
        assert_eq!(value.raw(), "1e3");
        assert!(value.as_bool().is_none());
        assert_eq!(FieldValue::new("true").as_f64(), Some(1.0));
        assert_eq!(FieldValue::new("\"x\"").as_f64(), None);
    }

    #[test]
    fn test_duplicate_keys_replace() {
        let point = Point::new("m")
            .with_tag("room", "1")
            .with_tag("room", "2")
            .with_field("t", "1")
            .with_field("t", "2");
        assert_eq!(point.tags.len(), 1);
        assert_eq!(point.tag("room"), Some("2"));
        assert_eq!(point.field("t").map(FieldValue::raw), Some("2"));
    }

    #[test]
    fn test_has_tag_pair_is_exact() {
        let point = Point::new("m").with_tag("clientId", "A");
        assert!(point.has_tag_pair("clientId=A"));
        assert!(!point.has_tag_pair("clientId=AB"));
        assert!(!point.has_tag_pair("clientIdA"));
        assert!(!point.has_tag_pair("client=A"));
    }

    #[test]
    fn test_serialize_wire_shape() {
        let point = Point::new("environment")
            .with_tag("clientId", "A")
            .with_field("Temperature", "21.5")
            .with_timestamp("1700000000000");
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "measurement": "environment",
                "tagPairs": ["clientId=A"],
                "fields": {"Temperature": "21.5"},
                "timestamp": "1700000000000"
            })
        );
    }

    #[test]
    fn test_deserialize_mixed_scalars() {
        let json = r#"{"measurement":"env","tagPairs":["a=1","broken"],
            "fields":{"n":2.5,"b":true,"s":"x"},"timestamp":1700000000000}"#;
        let point: Point = serde_json::from_str(json).unwrap();
        assert_eq!(point.tag("a"), Some("1"));
        assert_eq!(point.tags.len(), 1);
        assert_eq!(point.field("n").and_then(FieldValue::as_f64), Some(2.5));
        assert_eq!(point.field("b").and_then(FieldValue::as_bool), Some(true));
        assert_eq!(point.timestamp.as_deref(), Some("1700000000000"));
    }

    #[test]
    fn test_json_round_trip_keeps_field_order() {
        let point = Point::new("environment")
            .with_field("Temperature", "21.5")
            .with_field("Humidity", "40")
            .with_field("CO2", "400");
        let json = serde_json::to_string(&point).unwrap();
        let back: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }
}
