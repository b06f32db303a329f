//! Record definitions and the traits application record types implement.
//!
//! A record type maps one-to-one to a table. Its [`RecordDefinition`] lists
//! the fields in declaration order, with the generated `pk BIGINT` key always
//! first. Records are built from a [`FieldMap`] through an explicit
//! constructor rather than any runtime introspection.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::identifier::validate_identifier;
use crate::core::types::{FieldType, SqlType};
use crate::core::value::{FieldMap, FieldValue};
use crate::error::{RecordStoreError, Result};

/// Name of the generated primary key column.
pub const KEY_COLUMN: &str = "pk";

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_lowercase(),
            field_type,
        }
    }
}

/// Table name plus ordered field list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDefinition {
    table: String,
    fields: Vec<FieldDef>,
}

impl RecordDefinition {
    /// Start a definition whose first field is the generated key.
    pub fn keyed(table: &str) -> Self {
        Self {
            table: table.to_lowercase(),
            fields: vec![FieldDef::new(KEY_COLUMN, FieldType::BigInt)],
        }
    }

    /// Build a definition from an explicit field list. The key field must be
    /// supplied as field 0; [`validate`](Self::validate) checks it.
    pub fn from_fields(table: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            table: table.to_lowercase(),
            fields,
        }
    }

    /// Append a field.
    pub fn field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FieldDef::new(name, field_type));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// All fields including the key.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Declared fields after the key, in declaration order.
    pub fn data_fields(&self) -> &[FieldDef] {
        self.fields.get(1..).unwrap_or(&[])
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        let name = name.to_lowercase();
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check the key shape and field names.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table)
            .map_err(|e| RecordStoreError::invalid_definition(&self.table, e.to_string()))?;

        match self.fields.first() {
            Some(first) if first.name == KEY_COLUMN && first.field_type == FieldType::BigInt => {}
            Some(first) => {
                return Err(RecordStoreError::invalid_definition(
                    &self.table,
                    format!(
                        "first field must be {} {}, found {} {}",
                        KEY_COLUMN,
                        FieldType::BigInt,
                        first.name,
                        first.field_type
                    ),
                ))
            }
            None => {
                return Err(RecordStoreError::invalid_definition(
                    &self.table,
                    "definition has no fields",
                ))
            }
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            validate_identifier(&field.name)
                .map_err(|e| RecordStoreError::invalid_definition(&self.table, e.to_string()))?;
            if !seen.insert(field.name.as_str()) {
                return Err(RecordStoreError::invalid_definition(
                    &self.table,
                    format!("field {} declared twice", field.name),
                ));
            }
        }
        Ok(())
    }

    /// Column type for a declared field.
    pub fn sql_type(&self, field: &FieldDef) -> Result<SqlType> {
        field
            .field_type
            .sql_type()
            .ok_or_else(|| RecordStoreError::UnsupportedFieldType {
                table: self.table.clone(),
                field: field.name.clone(),
                field_type: field.field_type.to_string(),
            })
    }
}

type Transform = Arc<dyn Fn(FieldValue) -> Result<FieldValue> + Send + Sync>;

/// Rename rule, with an optional value transform, applied to legacy rows
/// during migration.
#[derive(Clone)]
pub struct FieldConverter {
    from: String,
    to: String,
    transform: Option<Transform>,
}

impl FieldConverter {
    pub fn rename(from: &str, to: &str) -> Self {
        Self {
            from: from.to_lowercase(),
            to: to.to_lowercase(),
            transform: None,
        }
    }

    /// Rename and convert the value. Use the same name twice to convert in place.
    pub fn convert<F>(from: &str, to: &str, transform: F) -> Self
    where
        F: Fn(FieldValue) -> Result<FieldValue> + Send + Sync + 'static,
    {
        Self {
            from: from.to_lowercase(),
            to: to.to_lowercase(),
            transform: Some(Arc::new(transform)),
        }
    }

    pub fn from_name(&self) -> &str {
        &self.from
    }

    pub fn to_name(&self) -> &str {
        &self.to
    }

    /// Apply to one row. A missing source column leaves the row unchanged.
    pub fn apply(&self, row: &mut FieldMap) -> Result<()> {
        let Some(value) = row.remove(&self.from) else {
            return Ok(());
        };
        let value = match &self.transform {
            Some(transform) => transform(value).map_err(|e| match e {
                RecordStoreError::Conversion { .. } => e,
                other => RecordStoreError::conversion(&self.from, other.to_string()),
            })?,
            None => value,
        };
        row.insert(&self.to, value);
        Ok(())
    }
}

impl fmt::Debug for FieldConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldConverter")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// An application record type stored in its own table.
pub trait Record: Send + Sync + Sized + 'static {
    /// Table and field layout, built once per type.
    fn definition() -> &'static RecordDefinition;

    /// Generated key, `None` until the record has been inserted.
    fn key(&self) -> Option<i64>;

    /// Value of a declared non-key field. Unknown names return `Null`.
    fn field_value(&self, name: &str) -> FieldValue;

    /// Construct from a row keyed by column name (case-insensitive).
    fn from_fields(fields: &FieldMap) -> Result<Self>;

    /// Whether two records hold the same data, ignoring the key.
    fn eq_ignoring_key(&self, other: &Self) -> bool {
        Self::definition()
            .data_fields()
            .iter()
            .all(|f| self.field_value(&f.name) == other.field_value(&f.name))
    }

    /// Rules reshaping rows of a legacy table into this record.
    fn conversions() -> Vec<FieldConverter> {
        Vec::new()
    }

    /// All fields, key included, as a map.
    fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(KEY_COLUMN, self.key());
        for field in Self::definition().data_fields() {
            map.insert(&field.name, self.field_value(&field.name));
        }
        map
    }
}

/// Object-safe view of a [`Record`], used where tables are chosen at runtime
/// (compound children, migration targets, table-name lookups).
pub trait DynRecord: Send + Sync {
    fn record_definition(&self) -> &'static RecordDefinition;
    fn record_key(&self) -> Option<i64>;
    fn value_of(&self, name: &str) -> FieldValue;
    fn eq_ignoring_key_dyn(&self, other: &dyn DynRecord) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<R: Record> DynRecord for R {
    fn record_definition(&self) -> &'static RecordDefinition {
        R::definition()
    }

    fn record_key(&self) -> Option<i64> {
        self.key()
    }

    fn value_of(&self, name: &str) -> FieldValue {
        self.field_value(name)
    }

    fn eq_ignoring_key_dyn(&self, other: &dyn DynRecord) -> bool {
        other
            .as_any()
            .downcast_ref::<R>()
            .is_some_and(|other| self.eq_ignoring_key(other))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl fmt::Debug for dyn DynRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynRecord")
            .field("table", &self.record_definition().table())
            .field("key", &self.record_key())
            .finish()
    }
}

/// Downcast a boxed record to its concrete type.
pub fn downcast<R: Record>(record: Box<dyn DynRecord>) -> Option<R> {
    record.into_any().downcast::<R>().ok().map(|r| *r)
}

/// Type-erased constructor for one record type.
#[derive(Clone, Copy)]
pub struct RecordKind {
    definition: fn() -> &'static RecordDefinition,
    build: fn(&FieldMap) -> Result<Box<dyn DynRecord>>,
    conversions: fn() -> Vec<FieldConverter>,
}

impl RecordKind {
    pub fn of<R: Record>() -> Self {
        fn build<R: Record>(fields: &FieldMap) -> Result<Box<dyn DynRecord>> {
            Ok(Box::new(R::from_fields(fields)?))
        }
        Self {
            definition: R::definition,
            build: build::<R>,
            conversions: R::conversions,
        }
    }

    pub fn definition(&self) -> &'static RecordDefinition {
        (self.definition)()
    }

    pub fn table(&self) -> &'static str {
        self.definition().table()
    }

    pub fn build(&self, fields: &FieldMap) -> Result<Box<dyn DynRecord>> {
        (self.build)(fields)
    }

    pub fn conversions(&self) -> Vec<FieldConverter> {
        (self.conversions)()
    }
}

impl fmt::Debug for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordKind").field(&self.table()).finish()
    }
}

/// Junction row linking a parent record to an ordered list of children by
/// table and key.
pub trait Junction: Record + Clone {
    fn parent_table(&self) -> &str;
    fn parent_key(&self) -> Option<i64>;
    fn child_tables(&self) -> &[String];
    fn child_keys(&self) -> &[i64];

    /// Point the junction at saved records. Called before the junction itself
    /// is looked up or written.
    fn link(&mut self, parent_table: &str, parent_key: i64, children: Vec<(String, i64)>);

    /// Child lists must be index-aligned.
    fn validate_links(&self) -> Result<()> {
        let tables = self.child_tables().len();
        let keys = self.child_keys().len();
        if tables != keys {
            return Err(RecordStoreError::invalid_compound(
                Self::definition().table(),
                format!("{} child tables but {} child keys", tables, keys),
            ));
        }
        Ok(())
    }
}

/// Assembled parent, children and the junction linking them.
pub struct Compound<J: Junction> {
    pub junction: J,
    pub parent: Box<dyn DynRecord>,
    pub children: Vec<Box<dyn DynRecord>>,
}

impl<J: Junction> Compound<J> {
    pub fn new(junction: J, parent: Box<dyn DynRecord>, children: Vec<Box<dyn DynRecord>>) -> Self {
        Self {
            junction,
            parent,
            children,
        }
    }

    /// Parent downcast to its concrete type.
    pub fn parent_as<R: Record>(&self) -> Option<&R> {
        self.parent.as_any().downcast_ref::<R>()
    }

    /// Children of one concrete type, in junction order.
    pub fn children_of<R: Record>(&self) -> Vec<&R> {
        self.children
            .iter()
            .filter_map(|c| c.as_any().downcast_ref::<R>())
            .collect()
    }
}

impl<J: Junction + fmt::Debug> fmt::Debug for Compound<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compound")
            .field("junction", &self.junction)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{Person, Visit};

    #[test]
    fn test_keyed_definition_is_valid() {
        let def = Person::definition();
        assert!(def.validate().is_ok());
        assert_eq!(def.table(), "person");
        assert_eq!(def.fields()[0].name, KEY_COLUMN);
        assert_eq!(def.data_fields().len(), def.fields().len() - 1);
    }

    #[test]
    fn test_key_must_be_first_bigint() {
        let def = RecordDefinition::from_fields(
            "Broken",
            vec![
                FieldDef::new("name", FieldType::Text),
                FieldDef::new("pk", FieldType::BigInt),
            ],
        );
        let err = def.validate().unwrap_err();
        assert!(matches!(err, RecordStoreError::InvalidRecordDefinition { .. }));

        let def = RecordDefinition::from_fields("Broken", vec![FieldDef::new("pk", FieldType::Int)]);
        assert!(def.validate().is_err());
        assert!(RecordDefinition::from_fields("Empty", vec![]).validate().is_err());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let def = RecordDefinition::keyed("dup")
            .field("a", FieldType::Text)
            .field("A", FieldType::Int);
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_unsupported_field_type_names_field() {
        let def = RecordDefinition::keyed("bad")
            .field("nested", FieldType::array_of(FieldType::array_of(FieldType::Int)));
        match def.sql_type(&def.fields()[1]).unwrap_err() {
            RecordStoreError::UnsupportedFieldType { table, field, .. } => {
                assert_eq!(table, "bad");
                assert_eq!(field, "nested");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_converter_rename_and_transform() {
        let mut row = FieldMap::new().with("old_col", 5);
        FieldConverter::rename("old_col", "new_col").apply(&mut row).unwrap();
        assert_eq!(row.get_i32("new_col").unwrap(), Some(5));
        assert!(!row.contains_key("old_col"));

        let double = FieldConverter::convert("new_col", "new_col", |v| match v {
            FieldValue::Int(i) => Ok(FieldValue::Int(i * 2)),
            other => Err(RecordStoreError::conversion("new_col", other.kind())),
        });
        double.apply(&mut row).unwrap();
        assert_eq!(row.get_i32("new_col").unwrap(), Some(10));
    }

    #[test]
    fn test_converter_missing_column_is_noop() {
        let mut row = FieldMap::new().with("a", 1);
        FieldConverter::rename("b", "c").apply(&mut row).unwrap();
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_eq_ignoring_key() {
        let a = Person::new("ada", 36).with_key(1);
        let b = Person::new("ada", 36).with_key(2);
        let c = Person::new("bob", 36);
        assert!(a.eq_ignoring_key(&b));
        assert!(!a.eq_ignoring_key(&c));
        assert!(a.eq_ignoring_key_dyn(&b));
        assert!(!a.eq_ignoring_key_dyn(&Visit::new(1, vec![])));
    }

    #[test]
    fn test_record_kind_builds_and_downcasts() {
        let kind = RecordKind::of::<Person>();
        assert_eq!(kind.table(), "person");
        let fields = Person::new("ada", 36).with_key(9).to_fields();
        let built = kind.build(&fields).unwrap();
        assert_eq!(built.record_key(), Some(9));
        let person: Person = downcast(built).unwrap();
        assert_eq!(person.name, "ada");
    }

    #[test]
    fn test_junction_validation() {
        use crate::core::fixtures::Link;
        let mut link = Link::default();
        link.link(
            "person",
            1,
            vec![("visit".to_string(), 1), ("visit".to_string(), 2)],
        );
        assert!(link.validate_links().is_ok());
        link.child_tables.pop();
        assert!(matches!(
            link.validate_links().unwrap_err(),
            RecordStoreError::InvalidCompoundRecord { .. }
        ));
    }
}
