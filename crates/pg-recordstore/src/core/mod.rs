//! Core record model shared by every layer of the store.
//!
//! - [`types`]: field type to column type mapping
//! - [`container`]: typed list/map containers and their JSON codec
//! - [`value`]: field values, parameter binding and row decoding
//! - [`record`]: record definitions, the [`Record`] trait and compound records
//! - [`registry`]: explicit registry of record types
//! - [`identifier`]: identifier validation and quoting

pub mod container;
pub mod identifier;
pub mod record;
pub mod registry;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod fixtures;

pub use container::{decode_container, Container, Element, ElementType, ListContainer, MapContainer};
pub use record::{
    downcast, Compound, DynRecord, FieldConverter, FieldDef, Junction, Record, RecordDefinition,
    RecordKind, KEY_COLUMN,
};
pub use registry::RecordRegistry;
pub use types::{BindStrategy, FieldType, SqlType};
pub use value::{FieldMap, FieldValue};
