//! Mapping between record field types and PostgreSQL column types.

use std::fmt;

use crate::core::container::ElementType;

/// Semantic type of a record field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Int,
    BigInt,
    Real,
    Double,
    Boolean,
    /// Stored as ISO-8601 text.
    Timestamp,
    /// Stored as the variant ordinal.
    Enum,
    /// Array of a primitive type.
    Array(Box<FieldType>),
    /// [`ListContainer`](crate::core::container::ListContainer) stored as JSONB.
    List,
    /// [`MapContainer`](crate::core::container::MapContainer) stored as JSONB.
    Map,
}

/// PostgreSQL column type used in DDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    Text,
    Int,
    BigInt,
    Real,
    DoublePrecision,
    Boolean,
    Jsonb,
    Array(Box<SqlType>),
}

/// How a field value is bound as a statement parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStrategy {
    /// Bound with its native PostgreSQL type.
    Native,
    /// Formatted to text before binding (timestamps).
    Text,
    /// Encoded as JSON and cast to JSONB in the statement.
    Json,
}

impl FieldType {
    /// Column type for this field, or `None` when there is no mapping
    /// (arrays of enums or containers, nested arrays).
    pub fn sql_type(&self) -> Option<SqlType> {
        let mapped = match self {
            FieldType::Text | FieldType::Timestamp => SqlType::Text,
            FieldType::Int | FieldType::Enum => SqlType::Int,
            FieldType::BigInt => SqlType::BigInt,
            FieldType::Real => SqlType::Real,
            FieldType::Double => SqlType::DoublePrecision,
            FieldType::Boolean => SqlType::Boolean,
            FieldType::List | FieldType::Map => SqlType::Jsonb,
            FieldType::Array(inner) => match inner.as_ref() {
                FieldType::Array(_) | FieldType::List | FieldType::Map | FieldType::Enum => {
                    return None
                }
                primitive => SqlType::Array(Box::new(primitive.sql_type()?)),
            },
        };
        Some(mapped)
    }

    pub fn bind_strategy(&self) -> BindStrategy {
        match self {
            FieldType::List | FieldType::Map => BindStrategy::Json,
            FieldType::Timestamp => BindStrategy::Text,
            FieldType::Array(inner) if **inner == FieldType::Timestamp => BindStrategy::Text,
            _ => BindStrategy::Native,
        }
    }

    pub fn is_json(&self) -> bool {
        self.bind_strategy() == BindStrategy::Json
    }

    pub fn array_of(inner: FieldType) -> Self {
        FieldType::Array(Box::new(inner))
    }

    /// Container element type for a primitive field type.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            FieldType::Text => Some(ElementType::Text),
            FieldType::Int | FieldType::Enum => Some(ElementType::Int),
            FieldType::BigInt => Some(ElementType::BigInt),
            FieldType::Real => Some(ElementType::Real),
            FieldType::Double => Some(ElementType::Double),
            FieldType::Boolean => Some(ElementType::Boolean),
            FieldType::Timestamp => Some(ElementType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => f.write_str("string"),
            FieldType::Int => f.write_str("integer"),
            FieldType::BigInt => f.write_str("long"),
            FieldType::Real => f.write_str("float"),
            FieldType::Double => f.write_str("double"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Timestamp => f.write_str("timestamp"),
            FieldType::Enum => f.write_str("enum"),
            FieldType::Array(inner) => write!(f, "{}[]", inner),
            FieldType::List => f.write_str("list"),
            FieldType::Map => f.write_str("map"),
        }
    }
}

impl SqlType {
    /// Reverse lookup from `information_schema.columns`.
    ///
    /// `data_type` is the SQL-standard name (`integer`, `ARRAY`, ...) and
    /// `udt_name` the internal name (`int4`, `_text`, ...), which is the only
    /// place array element types appear.
    pub fn from_catalog(data_type: &str, udt_name: &str) -> Option<Self> {
        if data_type.eq_ignore_ascii_case("ARRAY") {
            let element = udt_name.strip_prefix('_')?;
            return match Self::from_udt(element)? {
                SqlType::Jsonb | SqlType::Array(_) => None,
                inner => Some(SqlType::Array(Box::new(inner))),
            };
        }
        Self::from_udt(udt_name).or_else(|| Self::from_udt(data_type))
    }

    fn from_udt(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "text" | "varchar" | "character varying" | "bpchar" | "character" => {
                Some(SqlType::Text)
            }
            "int4" | "integer" | "int" => Some(SqlType::Int),
            "int8" | "bigint" => Some(SqlType::BigInt),
            "float4" | "real" => Some(SqlType::Real),
            "float8" | "double precision" => Some(SqlType::DoublePrecision),
            "bool" | "boolean" => Some(SqlType::Boolean),
            "jsonb" => Some(SqlType::Jsonb),
            _ => None,
        }
    }

    /// Field type that maps back to this column type.
    pub fn field_type(&self) -> FieldType {
        match self {
            SqlType::Text => FieldType::Text,
            SqlType::Int => FieldType::Int,
            SqlType::BigInt => FieldType::BigInt,
            SqlType::Real => FieldType::Real,
            SqlType::DoublePrecision => FieldType::Double,
            SqlType::Boolean => FieldType::Boolean,
            SqlType::Jsonb => FieldType::Map,
            SqlType::Array(inner) => FieldType::Array(Box::new(inner.field_type())),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Text => f.write_str("TEXT"),
            SqlType::Int => f.write_str("INT"),
            SqlType::BigInt => f.write_str("BIGINT"),
            SqlType::Real => f.write_str("REAL"),
            SqlType::DoublePrecision => f.write_str("DOUBLE PRECISION"),
            SqlType::Boolean => f.write_str("BOOLEAN"),
            SqlType::Jsonb => f.write_str("JSONB"),
            SqlType::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}
