//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Derive a configuration for another database on the same server,
    /// keeping credentials, pools and sync settings.
    pub fn with_database(&self, name: impl Into<String>) -> Result<Self> {
        let mut derived = self.clone();
        derived.database.name = name.into();
        derived.validate()?;
        Ok(derived)
    }

    /// Whether database, role and schema management can run.
    pub fn can_manage_schema(&self) -> bool {
        self.superuser.is_some()
    }
}

impl DatabaseConfig {
    /// Build a tokio-postgres config for `dbname` with the given role.
    pub fn pg_config(&self, dbname: &str, creds: &Credentials) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(dbname)
            .user(&creds.name)
            .password(&creds.password);
        pg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
database:
  host: localhost
  name: inventory
superuser:
  name: postgres
  password: postgres
admin:
  name: inventory_admin
  password: admin-password
user:
  name: inventory_user
  password: user-password
sync:
  destructive_columns: true
  row_count_mismatch: fail
"#;

    #[test]
    fn test_from_yaml_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.ssl_mode, "disable");
        assert_eq!(config.database.maintenance_db, "postgres");
        assert_eq!(config.pools.user_connections, 10);
        assert_eq!(config.pools.admin_connections, 10);
        assert_eq!(config.sync.default_privileges, "SELECT");
        assert!(config.sync.destructive_columns);
        assert!(!config.sync.migrate);
        assert_eq!(config.sync.row_count_mismatch, MismatchPolicy::Fail);
        assert!(config.can_manage_schema());
    }

    #[test]
    fn test_without_superuser() {
        let yaml = YAML.replace("superuser:\n  name: postgres\n  password: postgres\n", "");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(!config.can_manage_schema());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        std::fs::write(&path, YAML).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.name, "inventory");
    }

    #[test]
    fn test_with_database() {
        let config = Config::from_yaml(YAML).unwrap();
        let other = config.with_database("inventory_archive").unwrap();
        assert_eq!(other.database.name, "inventory_archive");
        assert_eq!(other.admin.name, config.admin.name);
        assert!(config.with_database("").is_err());
    }

    #[test]
    fn test_pg_config_targets_requested_database() {
        let config = Config::from_yaml(YAML).unwrap();
        let pg = config.database.pg_config("postgres", &config.admin);
        assert_eq!(pg.get_dbname(), Some("postgres"));
        assert_eq!(pg.get_user(), Some("inventory_admin"));
        assert_eq!(pg.get_ports(), &[5432]);
    }
}
