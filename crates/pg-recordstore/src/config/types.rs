//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database location.
    pub database: DatabaseConfig,

    /// Superuser credentials. Without them the store skips database, role and
    /// schema management and only opens pools against an existing schema.
    #[serde(default)]
    pub superuser: Option<Credentials>,

    /// Owner of the database; used for privileged (admin) operations.
    pub admin: Credentials,

    /// Runtime role used for unprivileged operations.
    pub user: Credentials,

    /// Connection pool sizing.
    #[serde(default)]
    pub pools: PoolConfig,

    /// Schema synchronization and migration behavior.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// PostgreSQL server and database name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Name of the live database.
    pub name: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: disable).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Database the superuser connects to while creating, archiving or
    /// dropping the live database (default: "postgres").
    #[serde(default = "default_maintenance_db")]
    pub maintenance_db: String,
}

/// Role name and password pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub name: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Connection pool sizing for the two privilege tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum pooled connections for the runtime user (default: 10).
    #[serde(default = "default_pool_size")]
    pub user_connections: usize,

    /// Maximum pooled connections for the admin role (default: 10).
    #[serde(default = "default_pool_size")]
    pub admin_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            user_connections: default_pool_size(),
            admin_connections: default_pool_size(),
        }
    }
}

/// What to do when a migrated table's row count does not match the
/// number of rows inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Log a data-integrity warning and continue with the next table.
    #[default]
    Warn,
    /// Abort the migration.
    Fail,
}

/// Schema synchronization and migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Archive the live database and move its data into a fresh schema on startup.
    #[serde(default)]
    pub migrate: bool,

    /// Drop live columns that are no longer declared by the record definition.
    #[serde(default)]
    pub destructive_columns: bool,

    /// Privileges granted to the runtime user on each table (default: "SELECT").
    #[serde(default = "default_privileges")]
    pub default_privileges: String,

    /// Row count verification policy for migrated tables.
    #[serde(default)]
    pub row_count_mismatch: MismatchPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            migrate: false,
            destructive_columns: false,
            default_privileges: default_privileges(),
            row_count_mismatch: MismatchPolicy::default(),
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_maintenance_db() -> String {
    "postgres".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_privileges() -> String {
    "SELECT".to_string()
}
