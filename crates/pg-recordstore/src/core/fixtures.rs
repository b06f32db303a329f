//! Record types shared by unit tests.

use std::sync::LazyLock;

use crate::core::container::{ElementType, ListContainer};
use crate::core::record::{FieldConverter, Junction, Record, RecordDefinition};
use crate::core::types::FieldType;
use crate::core::value::{FieldMap, FieldValue};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub key: Option<i64>,
    pub name: String,
    pub age: i32,
    pub tags: ListContainer,
}

impl Person {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            key: None,
            name: name.to_string(),
            age,
            tags: ListContainer::new(ElementType::Text),
        }
    }

    pub fn with_key(mut self, key: i64) -> Self {
        self.key = Some(key);
        self
    }
}

static PERSON: LazyLock<RecordDefinition> = LazyLock::new(|| {
    RecordDefinition::keyed("Person")
        .field("name", FieldType::Text)
        .field("age", FieldType::Int)
        .field("tags", FieldType::List)
});

impl Record for Person {
    fn definition() -> &'static RecordDefinition {
        &PERSON
    }

    fn key(&self) -> Option<i64> {
        self.key
    }

    fn field_value(&self, name: &str) -> FieldValue {
        match name {
            "name" => self.name.clone().into(),
            "age" => self.age.into(),
            "tags" => self.tags.clone().into(),
            _ => FieldValue::Null,
        }
    }

    fn from_fields(fields: &FieldMap) -> Result<Self> {
        Ok(Self {
            key: fields.get_i64("pk")?,
            name: fields.require("name", FieldMap::get_text)?,
            age: fields.get_i32("age")?.unwrap_or_default(),
            tags: fields
                .get_list("tags")?
                .unwrap_or_else(|| ListContainer::new(ElementType::Text)),
        })
    }

    fn conversions() -> Vec<FieldConverter> {
        vec![FieldConverter::rename("full_name", "name")]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub key: Option<i64>,
    pub person: i64,
    pub notes: Vec<String>,
}

impl Visit {
    pub fn new(person: i64, notes: Vec<String>) -> Self {
        Self {
            key: None,
            person,
            notes,
        }
    }
}

static VISIT: LazyLock<RecordDefinition> = LazyLock::new(|| {
    RecordDefinition::keyed("visit")
        .field("person", FieldType::BigInt)
        .field("notes", FieldType::array_of(FieldType::Text))
});

impl Record for Visit {
    fn definition() -> &'static RecordDefinition {
        &VISIT
    }

    fn key(&self) -> Option<i64> {
        self.key
    }

    fn field_value(&self, name: &str) -> FieldValue {
        match name {
            "person" => self.person.into(),
            "notes" => self.notes.clone().into(),
            _ => FieldValue::Null,
        }
    }

    fn from_fields(fields: &FieldMap) -> Result<Self> {
        Ok(Self {
            key: fields.get_i64("pk")?,
            person: fields.require("person", FieldMap::get_i64)?,
            notes: fields.get_text_array("notes")?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Link {
    pub key: Option<i64>,
    pub parent_table: String,
    pub parent_key: Option<i64>,
    pub child_tables: Vec<String>,
    pub child_keys: Vec<i64>,
}

static LINK: LazyLock<RecordDefinition> = LazyLock::new(|| {
    RecordDefinition::keyed("link")
        .field("parent_table", FieldType::Text)
        .field("parent_key", FieldType::BigInt)
        .field("child_tables", FieldType::array_of(FieldType::Text))
        .field("child_keys", FieldType::array_of(FieldType::BigInt))
});

impl Record for Link {
    fn definition() -> &'static RecordDefinition {
        &LINK
    }

    fn key(&self) -> Option<i64> {
        self.key
    }

    fn field_value(&self, name: &str) -> FieldValue {
        match name {
            "parent_table" => self.parent_table.clone().into(),
            "parent_key" => self.parent_key.into(),
            "child_tables" => self.child_tables.clone().into(),
            "child_keys" => self.child_keys.clone().into(),
            _ => FieldValue::Null,
        }
    }

    fn from_fields(fields: &FieldMap) -> Result<Self> {
        Ok(Self {
            key: fields.get_i64("pk")?,
            parent_table: fields.get_text("parent_table")?.unwrap_or_default(),
            parent_key: fields.get_i64("parent_key")?,
            child_tables: fields.get_text_array("child_tables")?.unwrap_or_default(),
            child_keys: fields.get_i64_array("child_keys")?.unwrap_or_default(),
        })
    }
}

impl Junction for Link {
    fn parent_table(&self) -> &str {
        &self.parent_table
    }

    fn parent_key(&self) -> Option<i64> {
        self.parent_key
    }

    fn child_tables(&self) -> &[String] {
        &self.child_tables
    }

    fn child_keys(&self) -> &[i64] {
        &self.child_keys
    }

    fn link(&mut self, parent_table: &str, parent_key: i64, children: Vec<(String, i64)>) {
        self.parent_table = parent_table.to_string();
        self.parent_key = Some(parent_key);
        (self.child_tables, self.child_keys) = children.into_iter().unzip();
    }
}
