//! Record types and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::LazyLock;

use pg_recordstore::{
    Config, FieldConverter, FieldMap, FieldType, FieldValue, Junction, Record, RecordDefinition,
    Result,
};

/// Environment variable naming a YAML config with superuser credentials.
pub const CONFIG_ENV: &str = "RECORDSTORE_TEST_CONFIG";

/// Load the live-database config, or `None` when the variable is unset.
pub fn live_config(database: &str) -> Option<Config> {
    let path = std::env::var(CONFIG_ENV).ok()?;
    let config = Config::load(&path).expect("failed to load test config");
    Some(config.with_database(database).expect("invalid test database name"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub key: Option<i64>,
    pub title: String,
    pub pages: i32,
    pub authors: Vec<String>,
}

impl Book {
    pub fn new(title: &str, pages: i32) -> Self {
        Self {
            key: None,
            title: title.to_string(),
            pages,
            authors: Vec::new(),
        }
    }
}

static BOOK: LazyLock<RecordDefinition> = LazyLock::new(|| {
    RecordDefinition::keyed("book")
        .field("title", FieldType::Text)
        .field("pages", FieldType::Int)
        .field("authors", FieldType::array_of(FieldType::Text))
});

impl Record for Book {
    fn definition() -> &'static RecordDefinition {
        &BOOK
    }

    fn key(&self) -> Option<i64> {
        self.key
    }

    fn field_value(&self, name: &str) -> FieldValue {
        match name {
            "title" => self.title.clone().into(),
            "pages" => self.pages.into(),
            "authors" => self.authors.clone().into(),
            _ => FieldValue::Null,
        }
    }

    fn from_fields(fields: &FieldMap) -> Result<Self> {
        Ok(Self {
            key: fields.get_i64("pk")?,
            title: fields.require("title", FieldMap::get_text)?,
            pages: fields.get_i32("pages")?.unwrap_or_default(),
            authors: fields.get_text_array("authors")?.unwrap_or_default(),
        })
    }

    fn conversions() -> Vec<FieldConverter> {
        vec![FieldConverter::rename("book_title", "title")]
    }
}

/// Shape of `book` before `title` was renamed.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyBook {
    pub key: Option<i64>,
    pub book_title: String,
    pub pages: i32,
}

static LEGACY_BOOK: LazyLock<RecordDefinition> = LazyLock::new(|| {
    RecordDefinition::keyed("legacy_book")
        .field("book_title", FieldType::Text)
        .field("pages", FieldType::Int)
});

impl Record for LegacyBook {
    fn definition() -> &'static RecordDefinition {
        &LEGACY_BOOK
    }

    fn key(&self) -> Option<i64> {
        self.key
    }

    fn field_value(&self, name: &str) -> FieldValue {
        match name {
            "book_title" => self.book_title.clone().into(),
            "pages" => self.pages.into(),
            _ => FieldValue::Null,
        }
    }

    fn from_fields(fields: &FieldMap) -> Result<Self> {
        Ok(Self {
            key: fields.get_i64("pk")?,
            book_title: fields.require("book_title", FieldMap::get_text)?,
            pages: fields.get_i32("pages")?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shelf {
    pub key: Option<i64>,
    pub label: String,
}

static SHELF: LazyLock<RecordDefinition> =
    LazyLock::new(|| RecordDefinition::keyed("shelf").field("label", FieldType::Text));

impl Record for Shelf {
    fn definition() -> &'static RecordDefinition {
        &SHELF
    }

    fn key(&self) -> Option<i64> {
        self.key
    }

    fn field_value(&self, name: &str) -> FieldValue {
        match name {
            "label" => self.label.clone().into(),
            _ => FieldValue::Null,
        }
    }

    fn from_fields(fields: &FieldMap) -> Result<Self> {
        Ok(Self {
            key: fields.get_i64("pk")?,
            label: fields.require("label", FieldMap::get_text)?,
        })
    }
}

/// Junction from a shelf to the books on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shelving {
    pub key: Option<i64>,
    pub parent_table: String,
    pub parent_key: Option<i64>,
    pub child_tables: Vec<String>,
    pub child_keys: Vec<i64>,
}

static SHELVING: LazyLock<RecordDefinition> = LazyLock::new(|| {
    RecordDefinition::keyed("shelving")
        .field("parent_table", FieldType::Text)
        .field("parent_key", FieldType::BigInt)
        .field("child_tables", FieldType::array_of(FieldType::Text))
        .field("child_keys", FieldType::array_of(FieldType::BigInt))
});

impl Record for Shelving {
    fn definition() -> &'static RecordDefinition {
        &SHELVING
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

impl Junction for Shelving {
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
