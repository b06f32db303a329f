//! Field values, parameter binding and row decoding.
//!
//! [`FieldValue`] is the single value type flowing between records and SQL.
//! It binds as a statement parameter through [`ToSql`] and is decoded from a
//! result row column by column into a [`FieldMap`], the case-insensitive
//! name-to-value map records are constructed from.

use std::collections::BTreeMap;
use std::error::Error;

use bytes::BytesMut;
use chrono::NaiveDateTime;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::Row;
use tracing::warn;

use crate::core::container::{
    decode_container, parse_timestamp, Container, ListContainer, MapContainer, TIMESTAMP_FORMAT,
};
use crate::error::{RecordStoreError, Result};

/// A nullable, typed field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Text(String),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    TextArray(Vec<String>),
    IntArray(Vec<i32>),
    BigIntArray(Vec<i64>),
    RealArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    BooleanArray(Vec<bool>),
    TimestampArray(Vec<NaiveDateTime>),
    List(ListContainer),
    Map(MapContainer),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Short name of the variant for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Text(_) => "text",
            FieldValue::Int(_) => "integer",
            FieldValue::BigInt(_) => "long",
            FieldValue::Real(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::TextArray(_) => "text[]",
            FieldValue::IntArray(_) => "integer[]",
            FieldValue::BigIntArray(_) => "long[]",
            FieldValue::RealArray(_) => "float[]",
            FieldValue::DoubleArray(_) => "double[]",
            FieldValue::BooleanArray(_) => "boolean[]",
            FieldValue::TimestampArray(_) => "timestamp[]",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
        }
    }

    /// Decode column `idx` of `row` by its PostgreSQL type.
    ///
    /// JSONB columns are decoded as containers. A JSONB value that is not a
    /// container is logged and decoded as `Null` so the rest of the row survives.
    pub fn from_column(row: &Row, idx: usize) -> Result<Self> {
        let column = &row.columns()[idx];
        let name = column.name();

        let value = match column.type_().name() {
            "text" | "varchar" | "bpchar" | "name" => {
                row.try_get::<_, Option<String>>(idx)?.map(FieldValue::Text)
            }
            "int2" => row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| FieldValue::Int(i32::from(v))),
            "int4" => row.try_get::<_, Option<i32>>(idx)?.map(FieldValue::Int),
            "int8" => row.try_get::<_, Option<i64>>(idx)?.map(FieldValue::BigInt),
            "float4" => row.try_get::<_, Option<f32>>(idx)?.map(FieldValue::Real),
            "float8" => row.try_get::<_, Option<f64>>(idx)?.map(FieldValue::Double),
            "bool" => row.try_get::<_, Option<bool>>(idx)?.map(FieldValue::Boolean),
            "timestamp" => row
                .try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(FieldValue::Timestamp),
            "json" | "jsonb" => match row.try_get::<_, Option<serde_json::Value>>(idx)? {
                Some(json) => Some(decode_json_column(name, &json)),
                None => None,
            },
            "_text" | "_varchar" => row
                .try_get::<_, Option<Vec<String>>>(idx)?
                .map(FieldValue::TextArray),
            "_int4" => row
                .try_get::<_, Option<Vec<i32>>>(idx)?
                .map(FieldValue::IntArray),
            "_int8" => row
                .try_get::<_, Option<Vec<i64>>>(idx)?
                .map(FieldValue::BigIntArray),
            "_float4" => row
                .try_get::<_, Option<Vec<f32>>>(idx)?
                .map(FieldValue::RealArray),
            "_float8" => row
                .try_get::<_, Option<Vec<f64>>>(idx)?
                .map(FieldValue::DoubleArray),
            "_bool" => row
                .try_get::<_, Option<Vec<bool>>>(idx)?
                .map(FieldValue::BooleanArray),
            other => {
                return Err(RecordStoreError::conversion(
                    name,
                    format!("unsupported column type {}", other),
                ))
            }
        };

        Ok(value.unwrap_or(FieldValue::Null))
    }
}

fn decode_json_column(column: &str, json: &serde_json::Value) -> FieldValue {
    match decode_container(json) {
        Ok(Container::List(list)) => FieldValue::List(list),
        Ok(Container::Map(map)) => FieldValue::Map(map),
        Err(e) => {
            warn!("Column {} holds an undecodable container, reading as null: {}", column, e);
            FieldValue::Null
        }
    }
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// Integer and float widths follow the parameter type PostgreSQL inferred,
// so a record holding an i32 can still bind against a BIGINT column. Every
// arm goes through `to_sql_checked`, so a value of the wrong kind is a
// `WrongType` error instead of raw bytes.
impl ToSql for FieldValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            FieldValue::Null => Ok(IsNull::Yes),
            FieldValue::Text(v) => v.to_sql_checked(ty, out),
            FieldValue::Int(v) => match *ty {
                Type::INT8 => i64::from(*v).to_sql_checked(ty, out),
                Type::INT2 => i16::try_from(*v)?.to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            FieldValue::BigInt(v) => match *ty {
                Type::INT4 => i32::try_from(*v)?.to_sql_checked(ty, out),
                Type::INT2 => i16::try_from(*v)?.to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            FieldValue::Real(v) => match *ty {
                Type::FLOAT8 => f64::from(*v).to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            FieldValue::Double(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            FieldValue::Boolean(v) => v.to_sql_checked(ty, out),
            FieldValue::Timestamp(v) => format_timestamp(v).to_sql_checked(ty, out),
            FieldValue::TextArray(v) => v.to_sql_checked(ty, out),
            FieldValue::IntArray(v) => v.to_sql_checked(ty, out),
            FieldValue::BigIntArray(v) => v.to_sql_checked(ty, out),
            FieldValue::RealArray(v) => v.to_sql_checked(ty, out),
            FieldValue::DoubleArray(v) => v.to_sql_checked(ty, out),
            FieldValue::BooleanArray(v) => v.to_sql_checked(ty, out),
            FieldValue::TimestampArray(v) => v
                .iter()
                .map(format_timestamp)
                .collect::<Vec<_>>()
                .to_sql_checked(ty, out),
            FieldValue::List(v) => v.to_json().to_sql_checked(ty, out),
            FieldValue::Map(v) => v.to_json().to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for FieldValue {
            fn from(v: $ty) -> Self {
                FieldValue::$variant(v)
            }
        })*
    };
}

field_value_from!(
    String => Text,
    i32 => Int,
    i64 => BigInt,
    f32 => Real,
    f64 => Double,
    bool => Boolean,
    NaiveDateTime => Timestamp,
    Vec<String> => TextArray,
    Vec<i32> => IntArray,
    Vec<i64> => BigIntArray,
    Vec<f32> => RealArray,
    Vec<f64> => DoubleArray,
    Vec<bool> => BooleanArray,
    Vec<NaiveDateTime> => TimestampArray,
    ListContainer => List,
    MapContainer => Map,
);

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Case-insensitive map from column name to value.
///
/// Names are lower-cased on insert and lookup, matching how PostgreSQL folds
/// unquoted identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    fields: BTreeMap<String, FieldValue>,
}

macro_rules! typed_getter {
    ($(#[$doc:meta])* $name:ident -> $ty:ty, $convert:expr) => {
        $(#[$doc])*
        pub fn $name(&self, field: &str) -> Result<Option<$ty>> {
            match self.get(field) {
                None | Some(FieldValue::Null) => Ok(None),
                Some(value) => {
                    let convert: fn(&FieldValue) -> Option<$ty> = $convert;
                    convert(value).map(Some).ok_or_else(|| {
                        RecordStoreError::conversion(
                            field,
                            format!("cannot read {} as {}", value.kind(), stringify!($ty)),
                        )
                    })
                }
            }
        }
    };
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every column of a result row.
    pub fn from_row(row: &Row) -> Result<Self> {
        let mut map = FieldMap::new();
        for (idx, column) in row.columns().iter().enumerate() {
            map.insert(column.name(), FieldValue::from_column(row, idx)?);
        }
        Ok(map)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(name.to_lowercase(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(&name.to_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(&name.to_lowercase())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.contains_key(&name.to_lowercase())
    }

    /// Move the value under `from` to `to`. Returns false when `from` is absent.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.remove(from) {
            Some(value) => {
                self.insert(to, value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    typed_getter!(get_text -> String, |v| match v {
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Timestamp(ts) => Some(format_timestamp(ts)),
        FieldValue::Int(i) => Some(i.to_string()),
        FieldValue::BigInt(i) => Some(i.to_string()),
        FieldValue::Real(f) => Some(f.to_string()),
        FieldValue::Double(f) => Some(f.to_string()),
        FieldValue::Boolean(b) => Some(b.to_string()),
        _ => None,
    });

    typed_getter!(get_i32 -> i32, |v| match v {
        FieldValue::Int(i) => Some(*i),
        FieldValue::BigInt(i) => i32::try_from(*i).ok(),
        FieldValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    });

    typed_getter!(get_i64 -> i64, |v| match v {
        FieldValue::Int(i) => Some(i64::from(*i)),
        FieldValue::BigInt(i) => Some(*i),
        FieldValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    });

    typed_getter!(get_f32 -> f32, |v| match v {
        FieldValue::Real(f) => Some(*f),
        FieldValue::Double(f) => Some(*f as f32),
        FieldValue::Int(i) => Some(*i as f32),
        FieldValue::BigInt(i) => Some(*i as f32),
        FieldValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    });

    typed_getter!(get_f64 -> f64, |v| match v {
        FieldValue::Real(f) => Some(f64::from(*f)),
        FieldValue::Double(f) => Some(*f),
        FieldValue::Int(i) => Some(f64::from(*i)),
        FieldValue::BigInt(i) => Some(*i as f64),
        FieldValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    });

    typed_getter!(get_bool -> bool, |v| match v {
        FieldValue::Boolean(b) => Some(*b),
        FieldValue::Int(0) => Some(false),
        FieldValue::Int(1) => Some(true),
        FieldValue::Text(s) => s.trim().to_lowercase().parse().ok(),
        _ => None,
    });

    typed_getter!(
        /// Timestamps are stored as text; both `T` and space separators parse.
        get_timestamp -> NaiveDateTime, |v| match v {
        FieldValue::Timestamp(ts) => Some(*ts),
        FieldValue::Text(s) => parse_timestamp(s.trim()),
        _ => None,
    });

    typed_getter!(get_list -> ListContainer, |v| match v {
        FieldValue::List(l) => Some(l.clone()),
        _ => None,
    });

    typed_getter!(get_map -> MapContainer, |v| match v {
        FieldValue::Map(m) => Some(m.clone()),
        _ => None,
    });

    typed_getter!(get_text_array -> Vec<String>, |v| match v {
        FieldValue::TextArray(a) => Some(a.clone()),
        _ => None,
    });

    typed_getter!(get_i32_array -> Vec<i32>, |v| match v {
        FieldValue::IntArray(a) => Some(a.clone()),
        _ => None,
    });

    typed_getter!(get_i64_array -> Vec<i64>, |v| match v {
        FieldValue::BigIntArray(a) => Some(a.clone()),
        FieldValue::IntArray(a) => Some(a.iter().map(|i| i64::from(*i)).collect()),
        _ => None,
    });

    typed_getter!(get_f32_array -> Vec<f32>, |v| match v {
        FieldValue::RealArray(a) => Some(a.clone()),
        _ => None,
    });

    typed_getter!(get_f64_array -> Vec<f64>, |v| match v {
        FieldValue::DoubleArray(a) => Some(a.clone()),
        FieldValue::RealArray(a) => Some(a.iter().map(|f| f64::from(*f)).collect()),
        _ => None,
    });

    typed_getter!(get_bool_array -> Vec<bool>, |v| match v {
        FieldValue::BooleanArray(a) => Some(a.clone()),
        _ => None,
    });

    typed_getter!(get_timestamp_array -> Vec<NaiveDateTime>, |v| match v {
        FieldValue::TimestampArray(a) => Some(a.clone()),
        FieldValue::TextArray(a) => a.iter().map(|s| parse_timestamp(s)).collect(),
        _ => None,
    });

    /// Read a field that must be present and non-null.
    pub fn require<T>(
        &self,
        field: &str,
        getter: impl FnOnce(&Self, &str) -> Result<Option<T>>,
    ) -> Result<T> {
        getter(self, field)?
            .ok_or_else(|| RecordStoreError::conversion(field, "required field is missing or null"))
    }
}

impl FromIterator<(String, FieldValue)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (name, value) in iter {
            map.insert(&name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::ElementType;

    #[test]
    fn test_field_map_is_case_insensitive() {
        let map = FieldMap::new().with("UserName", "ada");
        assert_eq!(map.get_text("username").unwrap(), Some("ada".to_string()));
        assert!(map.contains_key("USERNAME"));
    }

    #[test]
    fn test_rename() {
        let mut map = FieldMap::new().with("old_col", 5);
        assert!(map.rename("old_col", "new_col"));
        assert!(!map.contains_key("old_col"));
        assert_eq!(map.get_i32("new_col").unwrap(), Some(5));
        assert!(!map.rename("missing", "x"));
    }

    #[test]
    fn test_lenient_numeric_getters() {
        let map = FieldMap::new()
            .with("a", 7i32)
            .with("b", "42")
            .with("c", 3.5f32)
            .with("d", i64::MAX);
        assert_eq!(map.get_i64("a").unwrap(), Some(7));
        assert_eq!(map.get_i64("b").unwrap(), Some(42));
        assert_eq!(map.get_f64("c").unwrap(), Some(3.5));
        assert!(map.get_i32("d").is_err());
    }

    #[test]
    fn test_null_and_missing_read_as_none() {
        let map = FieldMap::new().with("a", FieldValue::Null);
        assert_eq!(map.get_text("a").unwrap(), None);
        assert_eq!(map.get_text("b").unwrap(), None);
        assert!(map.require("a", FieldMap::get_text).is_err());
    }

    #[test]
    fn test_timestamp_from_text() {
        let map = FieldMap::new()
            .with("t1", "2024-01-02T03:04:05")
            .with("t2", "2024-01-02 03:04:05.250");
        let t1 = map.get_timestamp("t1").unwrap().unwrap();
        let t2 = map.get_timestamp("t2").unwrap().unwrap();
        assert_eq!(t1.format(TIMESTAMP_FORMAT).to_string(), "2024-01-02T03:04:05");
        assert!(t2 > t1);
    }

    #[test]
    fn test_wrong_kind_is_conversion_error() {
        let list = ListContainer::new(ElementType::Text);
        let map = FieldMap::new().with("tags", list);
        let err = map.get_i64("tags").unwrap_err();
        assert!(matches!(err, RecordStoreError::Conversion { .. }));
        assert!(map.get_list("tags").unwrap().is_some());
    }

    #[test]
    fn test_option_into_field_value() {
        assert_eq!(FieldValue::from(None::<i32>), FieldValue::Null);
        assert_eq!(FieldValue::from(Some(3i64)), FieldValue::BigInt(3));
    }

    #[test]
    fn test_int_binds_as_bigint() {
        let mut buf = BytesMut::new();
        let is_null = FieldValue::Int(5).to_sql(&Type::INT8, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_bigint_overflow_into_int_fails() {
        let mut buf = BytesMut::new();
        assert!(FieldValue::BigInt(i64::MAX)
            .to_sql(&Type::INT4, &mut buf)
            .is_err());
    }

    #[test]
    fn test_timestamp_binds_as_text() {
        let ts = parse_timestamp("2024-01-02T03:04:05").unwrap();
        let mut buf = BytesMut::new();
        FieldValue::Timestamp(ts)
            .to_sql(&Type::TEXT, &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"2024-01-02T03:04:05");
    }

    #[test]
    fn test_null_binds_as_null() {
        let mut buf = BytesMut::new();
        let is_null = FieldValue::Null.to_sql(&Type::JSONB, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[test]
    fn test_text_refuses_integer_column() {
        let mut buf = BytesMut::new();
        let err = FieldValue::Text("1234".into())
            .to_sql(&Type::INT4, &mut buf)
            .err()
            .unwrap();
        assert!(err.is::<tokio_postgres::types::WrongType>());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_int_refuses_text_column() {
        let mut buf = BytesMut::new();
        assert!(FieldValue::Int(7).to_sql(&Type::TEXT, &mut buf).is_err());
        assert!(FieldValue::TextArray(vec!["a".into()])
            .to_sql(&Type::INT4_ARRAY, &mut buf)
            .is_err());
    }

    #[test]
    fn test_unknown_container_shape_reads_as_null() {
        let value = decode_json_column("tags", &serde_json::json!({"weird": 1}));
        assert_eq!(value, FieldValue::Null);
    }

    #[test]
    fn test_known_container_shape_decodes() {
        let json = serde_json::json!({"type": "string", "list": ["a", "b"]});
        assert!(matches!(
            decode_json_column("tags", &json),
            FieldValue::List(_)
        ));
    }
}
