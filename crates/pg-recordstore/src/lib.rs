//! # pg-recordstore
//!
//! Schema-aware typed record store for PostgreSQL.
//!
//! Application types implement [`Record`] and are listed in a
//! [`RecordRegistry`]. From that registry the store:
//!
//! - **Derives tables** and keeps them in sync with the declared fields
//! - **Creates roles** for a privileged admin tier and an unprivileged user tier
//! - **Migrates data** from an archived copy of the previous database
//! - **Reads and writes records** through prepared statement templates, with
//!   batch writes, matching, paging and verified deletes
//! - **Assembles compound records** from a junction row, a parent and children
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_recordstore::{Config, DatabaseManager, Page, RecordRegistry};
//! # use pg_recordstore::{FieldMap, FieldType, FieldValue, Record, RecordDefinition};
//! # use std::sync::LazyLock;
//! # struct Note { key: Option<i64>, body: String }
//! # static NOTE: LazyLock<RecordDefinition> =
//! #     LazyLock::new(|| RecordDefinition::keyed("note").field("body", FieldType::Text));
//! # impl Record for Note {
//! #     fn definition() -> &'static RecordDefinition { &NOTE }
//! #     fn key(&self) -> Option<i64> { self.key }
//! #     fn field_value(&self, name: &str) -> FieldValue {
//! #         match name { "body" => self.body.clone().into(), _ => FieldValue::Null }
//! #     }
//! #     fn from_fields(f: &FieldMap) -> pg_recordstore::Result<Self> {
//! #         Ok(Self { key: f.get_i64("pk")?, body: f.get_text("body")?.unwrap_or_default() })
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> pg_recordstore::Result<()> {
//!     let config = Config::load("recordstore.yaml")?;
//!     let mut registry = RecordRegistry::new();
//!     registry.register::<Note>()?;
//!
//!     let manager = DatabaseManager::open(config, registry, Vec::new()).await?;
//!     let store = manager.user();
//!     let saved = store.add(&Note { key: None, body: "hello".into() }).await?;
//!     let all: Vec<Note> = store.get_all(&Page::Limit(10)).await?;
//!     println!("saved {:?}, {} notes", saved.and_then(|n| n.key), all.len());
//!     manager.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod manager;
pub mod migration;
pub mod pool;
pub mod statements;
pub mod store;
pub mod sync;

// Re-exports for convenient access
pub use crate::core::{
    Compound, Container, DynRecord, FieldConverter, FieldDef, FieldMap, FieldType, FieldValue,
    Junction, ListContainer, MapContainer, Record, RecordDefinition, RecordKind, RecordRegistry,
};
pub use config::{Config, Credentials, DatabaseConfig, MismatchPolicy, PoolConfig, SyncConfig};
pub use error::{RecordStoreError, Result};
pub use manager::{DatabaseManager, ManagerRegistry, StartupReport};
pub use migration::{MigrationDescriptor, MigrationEngine, TableMoveReport};
pub use pool::{Acquirer, ConnectionSource, DbConn};
pub use statements::{StatementKind, TemplateCatalog};
pub use store::{Page, RecordStore};
pub use sync::{SchemaSynchronizer, SyncReport};
