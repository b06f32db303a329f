//! Registry of record types known to a database.
//!
//! Record types are registered explicitly at startup, in the order their
//! tables should be synchronized. The registry is then shared read-only.
//!
//! ```rust,ignore
//! let mut registry = RecordRegistry::new();
//! registry.register::<Customer>()?;
//! registry.register_with_privileges::<Order>("SELECT, INSERT")?;
//! ```

use std::any::TypeId;
use std::collections::HashMap;

use crate::core::identifier::validate_privileges;
use crate::core::record::{Record, RecordKind};
use crate::error::{RecordStoreError, Result};

#[derive(Debug, Default, Clone)]
pub struct RecordRegistry {
    /// Registered kinds in registration order.
    kinds: Vec<RecordKind>,

    by_table: HashMap<String, usize>,

    by_type: HashMap<TypeId, usize>,

    /// Per-table privileges for the runtime user, overriding the default.
    privileges: HashMap<String, String>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record type. Its definition is validated here, once.
    pub fn register<R: Record>(&mut self) -> Result<()> {
        let kind = RecordKind::of::<R>();
        kind.definition().validate()?;

        let table = kind.table().to_string();
        if self.by_table.contains_key(&table) {
            return Err(RecordStoreError::Config(format!(
                "table {} is registered twice",
                table
            )));
        }

        let idx = self.kinds.len();
        self.kinds.push(kind);
        self.by_table.insert(table, idx);
        self.by_type.insert(TypeId::of::<R>(), idx);
        Ok(())
    }

    /// Register a record type with its own runtime-user privileges.
    pub fn register_with_privileges<R: Record>(&mut self, privileges: &str) -> Result<()> {
        validate_privileges(privileges)?;
        self.register::<R>()?;
        self.privileges
            .insert(R::definition().table().to_string(), privileges.to_string());
        Ok(())
    }

    pub fn kinds(&self) -> &[RecordKind] {
        &self.kinds
    }

    pub fn get(&self, table: &str) -> Option<&RecordKind> {
        self.by_table
            .get(&table.to_lowercase())
            .map(|&idx| &self.kinds[idx])
    }

    /// Look up a table, failing with a config error when it was never registered.
    pub fn require(&self, table: &str) -> Result<&RecordKind> {
        self.get(table).ok_or_else(|| {
            RecordStoreError::Config(format!("table {} is not registered", table))
        })
    }

    pub fn of<R: Record>(&self) -> Option<&RecordKind> {
        self.by_type
            .get(&TypeId::of::<R>())
            .map(|&idx| &self.kinds[idx])
    }

    pub fn privileges_for<'a>(&'a self, table: &str, default: &'a str) -> &'a str {
        self.privileges
            .get(&table.to_lowercase())
            .map(String::as_str)
            .unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
