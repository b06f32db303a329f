//! Schema synchronization: database, roles, tables, columns and grants.
//!
//! Tables are brought in line with their record definitions in registration
//! order. A missing table is created from its `-create` template. An existing
//! table is diffed by column name: missing columns are added in one
//! `ALTER TABLE`, extra columns are dropped in another only when destructive
//! sync is enabled.
//!
//! A table that cannot be synchronized (unmapped field type, failing DDL) is
//! reported in [`SyncReport::failed`] and the remaining tables still run.
//! Connection exhaustion stops the whole run.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use crate::core::identifier::{
    quote_literal, quote_pg, validate_password, validate_privileges, validate_role_name,
};
use crate::core::record::{FieldDef, RecordDefinition};
use crate::core::registry::RecordRegistry;
use crate::core::types::SqlType;
use crate::error::{RecordStoreError, Result};
use crate::pool::Acquirer;
use crate::statements::{
    alter_add_columns, alter_drop_columns, StatementKind, StatementSet, TemplateCatalog,
};

/// Privileges the admin role always receives on every table.
pub const ADMIN_PRIVILEGES: &str = "SELECT, INSERT, UPDATE, DELETE";

/// A column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub udt_name: String,
}

impl LiveColumn {
    pub fn sql_type(&self) -> Option<SqlType> {
        SqlType::from_catalog(&self.data_type, &self.udt_name)
    }
}

/// Name-level difference between a live table and its definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDiff {
    /// Declared but absent, in declaration order.
    pub missing: Vec<String>,
    /// Present but undeclared, in live order.
    pub extra: Vec<String>,
}

impl ColumnDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Compare live column names with declared field names, case-insensitively.
pub fn diff_columns(live: &[String], declared: &[FieldDef]) -> ColumnDiff {
    let live_set: BTreeSet<String> = live.iter().map(|c| c.to_lowercase()).collect();
    let declared_set: BTreeSet<String> = declared.iter().map(|f| f.name.to_lowercase()).collect();

    ColumnDiff {
        missing: declared
            .iter()
            .map(|f| f.name.to_lowercase())
            .filter(|name| !live_set.contains(name))
            .collect(),
        extra: live
            .iter()
            .map(|c| c.to_lowercase())
            .filter(|name| !declared_set.contains(name))
            .collect(),
    }
}

/// Outcome of [`SchemaSynchronizer::sync_tables`].
#[derive(Debug, Default)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub altered: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs DDL through privileged borrows of an [`Acquirer`].
pub struct SchemaSynchronizer {
    acquirer: Acquirer,
    destructive: bool,
}

impl SchemaSynchronizer {
    pub fn new(acquirer: Acquirer, destructive: bool) -> Self {
        Self {
            acquirer,
            destructive,
        }
    }

    /// Create database `name` owned by `owner` unless it already exists.
    /// Must run against a maintenance database. Returns whether it was created.
    pub async fn ensure_database(&self, name: &str, owner: &str) -> Result<bool> {
        let client = self.acquirer.borrow(true).await?;

        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)",
                &[&name],
            )
            .await?;
        if row.get::<_, bool>(0) {
            debug!("Database {} already exists", name);
            return Ok(false);
        }

        let sql = format!("CREATE DATABASE {} OWNER {}", quote_pg(name)?, quote_pg(owner)?);
        client.batch_execute(&sql).await?;
        info!("Created database {} owned by {}", name, owner);
        Ok(true)
    }

    /// Create a login role unless it exists. Name and password are checked
    /// before any statement runs. Returns whether the role was created.
    pub async fn ensure_role(&self, name: &str, password: &str) -> Result<bool> {
        validate_role_name(name)?;
        validate_password(password)?;

        let client = self.acquirer.borrow(true).await?;
        if role_exists(&client, name).await? {
            info!("Role {} already exists", name);
            return Ok(false);
        }

        let sql = format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {}",
            quote_pg(name)?,
            quote_literal(password)
        );
        client.batch_execute(&sql).await?;
        info!("Created role {}", name);
        Ok(true)
    }

    /// Bring every registered table in line with its definition.
    pub async fn sync_tables(
        &self,
        registry: &RecordRegistry,
        catalog: &TemplateCatalog,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for kind in registry.kinds() {
            let table = kind.table();
            match self.sync_table(kind.definition(), catalog).await {
                Ok(TableSync::Created) => report.created.push(table.to_string()),
                Ok(TableSync::Altered) => report.altered.push(table.to_string()),
                Ok(TableSync::Unchanged) => report.unchanged.push(table.to_string()),
                Err(e @ RecordStoreError::PoolExhausted { .. }) => return Err(e),
                Err(e) => {
                    error!("Schema sync failed for table {}: {}", table, e);
                    report.failed.push((table.to_string(), e.to_string()));
                }
            }
        }

        info!(
            "Schema sync: {} created, {} altered, {} unchanged, {} failed",
            report.created.len(),
            report.altered.len(),
            report.unchanged.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn sync_table(
        &self,
        def: &RecordDefinition,
        catalog: &TemplateCatalog,
    ) -> Result<TableSync> {
        let create = match catalog.get(def.table(), StatementKind::Create) {
            Ok(sql) => sql,
            // Left out of the catalog: report the build failure itself.
            Err(missing) => return Err(StatementSet::build(def).err().unwrap_or(missing)),
        };
        let client = self.acquirer.borrow(true).await?;

        let live = live_columns(&client, def.table()).await?;
        if live.is_empty() {
            client.batch_execute(create).await?;
            info!("Created table {}", def.table());
            return Ok(TableSync::Created);
        }

        log_type_drift(def, &live);

        let names: Vec<String> = live.iter().map(|c| c.name.clone()).collect();
        let diff = diff_columns(&names, def.fields());
        if diff.is_empty() {
            debug!("Table {} is up to date", def.table());
            return Ok(TableSync::Unchanged);
        }

        let mut changed = false;
        if !diff.missing.is_empty() {
            let missing: Vec<&FieldDef> = diff
                .missing
                .iter()
                .filter_map(|name| def.get(name))
                .collect();
            let sql = alter_add_columns(def, &missing)?;
            debug!("{}", sql);
            client.batch_execute(&sql).await?;
            info!("Added columns {:?} to {}", diff.missing, def.table());
            changed = true;
        }

        if !diff.extra.is_empty() {
            if self.destructive {
                let sql = alter_drop_columns(def.table(), &diff.extra)?;
                debug!("{}", sql);
                client.batch_execute(&sql).await?;
                warn!("Dropped columns {:?} from {}", diff.extra, def.table());
                changed = true;
            } else {
                info!(
                    "Leaving undeclared columns {:?} on {} (destructive sync disabled)",
                    diff.extra,
                    def.table()
                );
            }
        }

        Ok(if changed {
            TableSync::Altered
        } else {
            TableSync::Unchanged
        })
    }

    /// Grant per-table privileges to the runtime user and the fixed admin set
    /// to the admin role. Tables or roles that do not exist are skipped with a
    /// warning. Returns the number of tables granted.
    pub async fn grant_privileges(
        &self,
        registry: &RecordRegistry,
        default_privileges: &str,
        user: &str,
        admin: &str,
    ) -> Result<usize> {
        validate_privileges(default_privileges)?;
        let client = self.acquirer.borrow(true).await?;

        let mut roles = Vec::new();
        for role in [user, admin] {
            if role_exists(&client, role).await? {
                roles.push(role);
            } else {
                warn!("Role {} does not exist, skipping its grants", role);
            }
        }

        let mut granted = 0;
        for kind in registry.kinds() {
            let table = kind.table();
            if live_columns(&client, table).await?.is_empty() {
                warn!("Table {} does not exist, skipping grants", table);
                continue;
            }

            let user_privileges = registry.privileges_for(table, default_privileges);
            for &role in &roles {
                let privileges = if role == admin {
                    ADMIN_PRIVILEGES
                } else {
                    user_privileges
                };
                let sql = format!(
                    "GRANT {} ON TABLE {} TO {}",
                    privileges,
                    quote_pg(table)?,
                    quote_pg(role)?
                );
                if let Err(e) = client.batch_execute(&sql).await {
                    error!("Failed to grant {} on {} to {}: {}", privileges, table, role, e);
                }
            }
            granted += 1;
        }

        info!("Granted privileges on {} tables", granted);
        Ok(granted)
    }
}

enum TableSync {
    Created,
    Altered,
    Unchanged,
}

async fn role_exists(client: &tokio_postgres::Client, name: &str) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)",
            &[&name],
        )
        .await?;
    Ok(row.get::<_, bool>(0))
}

/// Columns of `table` in the current schema, in ordinal order. Empty when the
/// table does not exist.
async fn live_columns(client: &tokio_postgres::Client, table: &str) -> Result<Vec<LiveColumn>> {
    let sql = r#"
        SELECT column_name::text, data_type::text, udt_name::text
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = $1
        ORDER BY ordinal_position
    "#;
    let rows = client.query(sql, &[&table]).await?;
    Ok(rows
        .iter()
        .map(|row| LiveColumn {
            name: row.get(0),
            data_type: row.get(1),
            udt_name: row.get(2),
        })
        .collect())
}

/// Columns whose live type differs from the declared mapping are never
/// altered; they are only reported.
fn log_type_drift(def: &RecordDefinition, live: &[LiveColumn]) {
    for column in live {
        let Some(field) = def.get(&column.name) else {
            continue;
        };
        let declared = field.field_type.sql_type();
        let actual = column.sql_type();
        if declared.is_some() && declared != actual {
            debug!(
                "Column {}.{} is {} ({}) but declared as {}",
                def.table(),
                column.name,
                column.data_type,
                column.udt_name,
                field.field_type
            );
        }
    }
}
