//! Configuration validation.

use super::{Config, Credentials};
use crate::core::identifier::{validate_password, validate_privileges, validate_role_name};
use crate::error::{RecordStoreError, Result};
use crate::pool::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.database.host.is_empty() {
        return Err(RecordStoreError::Config("database.host is required".into()));
    }
    if config.database.name.is_empty() {
        return Err(RecordStoreError::Config("database.name is required".into()));
    }
    if config.database.name == config.database.maintenance_db {
        return Err(RecordStoreError::Config(format!(
            "database.name cannot be the maintenance database '{}'",
            config.database.maintenance_db
        )));
    }
    SslMode::parse(&config.database.ssl_mode)?;

    validate_credentials("admin", &config.admin)?;
    validate_credentials("user", &config.user)?;
    if let Some(superuser) = &config.superuser {
        if superuser.name.is_empty() {
            return Err(RecordStoreError::Config("superuser.name is required".into()));
        }
    }

    if config.admin.name.eq_ignore_ascii_case(&config.user.name) {
        return Err(RecordStoreError::Config(
            "admin and user must be different roles".into(),
        ));
    }

    if config.pools.user_connections == 0 {
        return Err(RecordStoreError::Config(
            "pools.user_connections must be at least 1".into(),
        ));
    }
    if config.pools.admin_connections == 0 {
        return Err(RecordStoreError::Config(
            "pools.admin_connections must be at least 1".into(),
        ));
    }

    validate_privileges(&config.sync.default_privileges)
        .map_err(|e| RecordStoreError::Config(format!("sync.default_privileges: {}", e)))?;

    Ok(())
}

fn validate_credentials(section: &str, creds: &Credentials) -> Result<()> {
    validate_role_name(&creds.name)
        .map_err(|e| RecordStoreError::Config(format!("{}.name: {}", section, e)))?;
    validate_password(&creds.password)
        .map_err(|e| RecordStoreError::Config(format!("{}.password: {}", section, e)))?;
    Ok(())
}
