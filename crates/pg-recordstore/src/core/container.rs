//! Typed list and map containers stored in a single JSONB column.
//!
//! A container carries its element (or key/value) type alongside the data so
//! that a JSONB value can be decoded back into typed elements:
//!
//! ```text
//! {"type": "long", "list": [1, 2, 3]}
//! {"keyType": "string", "valueType": "double", "map": {"a": 1.5}}
//! ```
//!
//! Decoding accepts a handful of aliases for each type tag (`Long`,
//! `java.lang.Long`, `bigint`) so containers written by older producers stay
//! readable. Encoding always writes the canonical lower-case name.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde_json::{Map, Number, Value};

use crate::error::{RecordStoreError, Result};

/// Timestamp text format used for JSON elements and TEXT columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Element, key or value type of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    Text,
    Int,
    BigInt,
    Real,
    Double,
    Boolean,
    Timestamp,
}

impl ElementType {
    /// Canonical wire name.
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Text => "string",
            ElementType::Int => "integer",
            ElementType::BigInt => "long",
            ElementType::Real => "float",
            ElementType::Double => "double",
            ElementType::Boolean => "boolean",
            ElementType::Timestamp => "timestamp",
        }
    }

    /// Resolve a wire type tag, case-insensitively, with or without a
    /// `java.lang.` / `java.time.` package prefix.
    pub fn from_name(tag: &str) -> Option<Self> {
        let lower = tag.trim().to_lowercase();
        let bare = lower
            .strip_prefix("java.lang.")
            .or_else(|| lower.strip_prefix("java.time."))
            .unwrap_or(&lower);
        match bare {
            "string" | "text" => Some(ElementType::Text),
            "integer" | "int" => Some(ElementType::Int),
            "long" | "bigint" => Some(ElementType::BigInt),
            "float" | "real" => Some(ElementType::Real),
            "double" => Some(ElementType::Double),
            "boolean" | "bool" => Some(ElementType::Boolean),
            "timestamp" | "localdatetime" => Some(ElementType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed container element.
#[derive(Debug, Clone)]
pub enum Element {
    Text(String),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::Text(_) => ElementType::Text,
            Element::Int(_) => ElementType::Int,
            Element::BigInt(_) => ElementType::BigInt,
            Element::Real(_) => ElementType::Real,
            Element::Double(_) => ElementType::Double,
            Element::Boolean(_) => ElementType::Boolean,
            Element::Timestamp(_) => ElementType::Timestamp,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Element::Text(s) => Value::String(s.clone()),
            Element::Int(v) => Value::from(*v),
            Element::BigInt(v) => Value::from(*v),
            Element::Real(v) => Number::from_f64(f64::from(*v))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Element::Double(v) => Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Element::Boolean(v) => Value::Bool(*v),
            Element::Timestamp(ts) => Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    /// Text form used as a JSON object key.
    fn to_key(&self) -> String {
        match self {
            Element::Text(s) => s.clone(),
            Element::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
            other => other.to_json().to_string(),
        }
    }

    /// Decode a JSON value as `ty`, widening integers and accepting numeric
    /// strings the way lenient producers write them.
    fn from_json(ty: ElementType, value: &Value) -> Result<Self> {
        let mismatch = || {
            RecordStoreError::conversion(
                ty.name(),
                format!("container element {} is not a {}", value, ty),
            )
        };
        let element = match (ty, value) {
            (ElementType::Text, Value::String(s)) => Element::Text(s.clone()),
            (ElementType::Int, Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Element::Int)
                .ok_or_else(mismatch)?,
            (ElementType::BigInt, Value::Number(n)) => {
                n.as_i64().map(Element::BigInt).ok_or_else(mismatch)?
            }
            (ElementType::Real, Value::Number(n)) => {
                n.as_f64().map(|v| Element::Real(v as f32)).ok_or_else(mismatch)?
            }
            (ElementType::Double, Value::Number(n)) => {
                n.as_f64().map(Element::Double).ok_or_else(mismatch)?
            }
            (ElementType::Boolean, Value::Bool(b)) => Element::Boolean(*b),
            (_, Value::String(s)) => Self::parse_key(ty, s).ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        };
        Ok(element)
    }

    fn parse_key(ty: ElementType, key: &str) -> Option<Self> {
        match ty {
            ElementType::Text => Some(Element::Text(key.to_string())),
            ElementType::Int => key.parse().ok().map(Element::Int),
            ElementType::BigInt => key.parse().ok().map(Element::BigInt),
            ElementType::Real => key.parse().ok().map(Element::Real),
            ElementType::Double => key.parse().ok().map(Element::Double),
            ElementType::Boolean => key.parse().ok().map(Element::Boolean),
            ElementType::Timestamp => parse_timestamp(key).map(Element::Timestamp),
        }
    }

    fn rank(&self) -> u8 {
        self.element_type() as u8
    }
}

/// Parse the ISO-8601 local timestamp forms accepted in TEXT columns.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

// Floats compare by total order so elements can key a BTreeMap.
impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Element::Text(a), Element::Text(b)) => a.cmp(b),
            (Element::Int(a), Element::Int(b)) => a.cmp(b),
            (Element::BigInt(a), Element::BigInt(b)) => a.cmp(b),
            (Element::Real(a), Element::Real(b)) => a.total_cmp(b),
            (Element::Double(a), Element::Double(b)) => a.total_cmp(b),
            (Element::Boolean(a), Element::Boolean(b)) => a.cmp(b),
            (Element::Timestamp(a), Element::Timestamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Element {}

macro_rules! element_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Element {
            fn from(v: $ty) -> Self {
                Element::$variant(v)
            }
        })*
    };
}

element_from!(
    String => Text,
    i32 => Int,
    i64 => BigInt,
    f32 => Real,
    f64 => Double,
    bool => Boolean,
    NaiveDateTime => Timestamp,
);

impl From<&str> for Element {
    fn from(v: &str) -> Self {
        Element::Text(v.to_string())
    }
}

/// Ordered list of elements of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct ListContainer {
    element_type: ElementType,
    items: Vec<Element>,
}

impl ListContainer {
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            items: Vec::new(),
        }
    }

    /// Build a list, rejecting items of the wrong type.
    pub fn from_items<I, E>(element_type: ElementType, items: I) -> Result<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<Element>,
    {
        let mut list = Self::new(element_type);
        for item in items {
            list.push(item)?;
        }
        Ok(list)
    }

    pub fn push(&mut self, item: impl Into<Element>) -> Result<()> {
        let item = item.into();
        check_type(self.element_type, &item)?;
        self.items.push(item);
        Ok(())
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn items(&self) -> &[Element] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Element> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::String(self.element_type.name().into()));
        obj.insert(
            "list".into(),
            Value::Array(self.items.iter().map(Element::to_json).collect()),
        );
        Value::Object(obj)
    }

    /// Whether every element of `other` appears in this list, mirroring
    /// JSONB `@>` containment for arrays.
    pub fn contains_all(&self, other: &ListContainer) -> bool {
        other.items.iter().all(|item| self.items.contains(item))
    }
}

/// Map from typed keys to typed values, ordered by key.
#[derive(Debug, Clone, PartialEq)]
pub struct MapContainer {
    key_type: ElementType,
    value_type: ElementType,
    entries: BTreeMap<Element, Element>,
}

impl MapContainer {
    pub fn new(key_type: ElementType, value_type: ElementType) -> Self {
        Self {
            key_type,
            value_type,
            entries: BTreeMap::new(),
        }
    }

    /// Insert an entry, returning the previous value for the key.
    pub fn insert(
        &mut self,
        key: impl Into<Element>,
        value: impl Into<Element>,
    ) -> Result<Option<Element>> {
        let key = key.into();
        let value = value.into();
        check_type(self.key_type, &key)?;
        check_type(self.value_type, &value)?;
        Ok(self.entries.insert(key, value))
    }

    pub fn get(&self, key: &Element) -> Option<&Element> {
        self.entries.get(key)
    }

    pub fn key_type(&self) -> ElementType {
        self.key_type
    }

    pub fn value_type(&self) -> ElementType {
        self.value_type
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Element, &Element)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let payload: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.to_key(), v.to_json()))
            .collect();
        let mut obj = Map::new();
        obj.insert("keyType".into(), Value::String(self.key_type.name().into()));
        obj.insert(
            "valueType".into(),
            Value::String(self.value_type.name().into()),
        );
        obj.insert("map".into(), Value::Object(payload));
        Value::Object(obj)
    }
}

/// Either container shape, as decoded from a JSONB column.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    List(ListContainer),
    Map(MapContainer),
}

impl Container {
    pub fn to_json(&self) -> Value {
        match self {
            Container::List(list) => list.to_json(),
            Container::Map(map) => map.to_json(),
        }
    }
}

fn check_type(expected: ElementType, element: &Element) -> Result<()> {
    if element.element_type() == expected {
        Ok(())
    } else {
        Err(RecordStoreError::conversion(
            expected.name(),
            format!(
                "expected {} element, got {}",
                expected,
                element.element_type()
            ),
        ))
    }
}

fn type_tag(obj: &Map<String, Value>, key: &str) -> Result<ElementType> {
    let tag = obj.get(key).and_then(Value::as_str).ok_or_else(|| {
        RecordStoreError::UnknownContainerShape(format!("missing \"{}\" type tag", key))
    })?;
    ElementType::from_name(tag).ok_or_else(|| {
        RecordStoreError::UnknownContainerShape(format!("unresolvable type tag {:?}", tag))
    })
}

/// Decode a JSONB value into a list or map container.
///
/// A `list` payload with a `type` tag is a list, a `map` payload with
/// `keyType`/`valueType` tags is a map. Any other shape, or a tag that does
/// not resolve, is [`RecordStoreError::UnknownContainerShape`]. A `null`
/// payload decodes to an empty container.
pub fn decode_container(value: &Value) -> Result<Container> {
    let obj = value.as_object().ok_or_else(|| {
        RecordStoreError::UnknownContainerShape(format!("expected JSON object, got {}", value))
    })?;

    if let Some(payload) = obj.get("list") {
        let element_type = type_tag(obj, "type")?;
        let mut list = ListContainer::new(element_type);
        match payload {
            Value::Array(items) => {
                for item in items {
                    list.items.push(Element::from_json(element_type, item)?);
                }
            }
            Value::Null => {}
            other => {
                return Err(RecordStoreError::UnknownContainerShape(format!(
                    "list payload must be an array, got {}",
                    other
                )))
            }
        }
        return Ok(Container::List(list));
    }

    if let Some(payload) = obj.get("map") {
        let key_type = type_tag(obj, "keyType")?;
        let value_type = type_tag(obj, "valueType")?;
        let mut map = MapContainer::new(key_type, value_type);
        match payload {
            Value::Object(entries) => {
                for (k, v) in entries {
                    let key = Element::parse_key(key_type, k).ok_or_else(|| {
                        RecordStoreError::conversion(
                            key_type.name(),
                            format!("map key {:?} is not a {}", k, key_type),
                        )
                    })?;
                    map.entries.insert(key, Element::from_json(value_type, v)?);
                }
            }
            Value::Null => {}
            other => {
                return Err(RecordStoreError::UnknownContainerShape(format!(
                    "map payload must be an object, got {}",
                    other
                )))
            }
        }
        return Ok(Container::Map(map));
    }

    Err(RecordStoreError::UnknownContainerShape(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_round_trip_keeps_order_and_tag() {
        let list = ListContainer::from_items(ElementType::BigInt, [3i64, 1, 2]).unwrap();
        let decoded = decode_container(&list.to_json()).unwrap();
        assert_eq!(decoded, Container::List(list));
    }

    #[test]
    fn test_map_round_trip() {
        let mut map = MapContainer::new(ElementType::Int, ElementType::Text);
        map.insert(10, "ten").unwrap();
        map.insert(2, "two").unwrap();
        let json = map.to_json();
        assert_eq!(json["map"]["10"], json!("ten"));
        let decoded = decode_container(&json).unwrap();
        assert_eq!(decoded, Container::Map(map));
    }

    #[test]
    fn test_timestamp_elements_encode_as_iso_text() {
        let ts = NaiveDateTime::parse_from_str("2024-03-01T10:30:00", TIMESTAMP_FORMAT).unwrap();
        let list = ListContainer::from_items(ElementType::Timestamp, [ts]).unwrap();
        assert_eq!(list.to_json()["list"][0], json!("2024-03-01T10:30:00"));
        assert_eq!(
            decode_container(&list.to_json()).unwrap(),
            Container::List(list)
        );
    }

    #[test]
    fn test_wire_shape() {
        let list = ListContainer::from_items(ElementType::Text, ["a"]).unwrap();
        assert_eq!(list.to_json(), json!({"type": "string", "list": ["a"]}));
    }

    #[test]
    fn test_legacy_tags_and_integer_widening() {
        let decoded =
            decode_container(&json!({"type": "java.lang.Long", "list": [1, 2]})).unwrap();
        match decoded {
            Container::List(list) => {
                assert_eq!(list.element_type(), ElementType::BigInt);
                assert_eq!(list.get(1), Some(&Element::BigInt(2)));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_shape() {
        let err = decode_container(&json!({"a": 1})).unwrap_err();
        assert!(matches!(err, RecordStoreError::UnknownContainerShape(_)));
        let err = decode_container(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, RecordStoreError::UnknownContainerShape(_)));
    }

    #[test]
    fn test_missing_or_unknown_tag() {
        let err = decode_container(&json!({"list": [1]})).unwrap_err();
        assert!(matches!(err, RecordStoreError::UnknownContainerShape(_)));
        let err = decode_container(&json!({"type": "Widget", "list": []})).unwrap_err();
        assert!(matches!(err, RecordStoreError::UnknownContainerShape(_)));
    }

    #[test]
    fn test_null_payload_is_empty() {
        let decoded = decode_container(&json!({"type": "string", "list": null})).unwrap();
        assert_eq!(decoded, Container::List(ListContainer::new(ElementType::Text)));
    }

    #[test]
    fn test_push_rejects_wrong_type() {
        let mut list = ListContainer::new(ElementType::Int);
        assert!(list.push("nope").is_err());
        assert!(list.push(5).is_ok());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_element_mismatch_is_conversion_error() {
        let err = decode_container(&json!({"type": "boolean", "list": [1]})).unwrap_err();
        assert!(matches!(err, RecordStoreError::Conversion { .. }));
    }

    #[test]
    fn test_contains_all() {
        let full = ListContainer::from_items(ElementType::Int, [1, 2, 3]).unwrap();
        let part = ListContainer::from_items(ElementType::Int, [3, 1]).unwrap();
        assert!(full.contains_all(&part));
        assert!(!part.contains_all(&full));
    }
}
