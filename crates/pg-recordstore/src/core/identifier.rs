//! Identifier validation and quoting for dynamically assembled SQL.
//!
//! Table, column, role and database names cannot be bound as statement
//! parameters, so every name that reaches SQL text goes through this module:
//!
//! 1. Validate it for suspicious patterns (null bytes, excessive length)
//! 2. Quote it with PostgreSQL double quotes, doubling embedded quotes
//!
//! Role names, passwords and privilege lists have stricter rules because they
//! are spliced into `CREATE ROLE` and `GRANT` statements.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{RecordStoreError, Result};

/// PostgreSQL truncates identifiers at 63 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

static ROLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_]{1,30}$").expect("role name pattern is valid")
});

static PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S{8,30}$").expect("password pattern is valid"));

static PRIVILEGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(ALL( PRIVILEGES)?|SELECT|INSERT|UPDATE|DELETE|TRUNCATE|REFERENCES|TRIGGER)$")
        .expect("privilege pattern is valid")
});

/// Validate an identifier for security issues.
///
/// Rejects empty names, names containing null bytes and names longer than
/// PostgreSQL keeps.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RecordStoreError::InvalidIdentifier(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(RecordStoreError::InvalidIdentifier(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(RecordStoreError::InvalidIdentifier(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a string literal for statements that cannot take parameters
/// (`CREATE ROLE ... PASSWORD`).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Role names: 1 to 30 ASCII letters, digits or underscores.
pub fn validate_role_name(name: &str) -> Result<()> {
    if ROLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(RecordStoreError::InvalidIdentifier(format!(
            "role name {:?} must be 1-30 characters of [a-zA-Z0-9_]",
            name
        )))
    }
}

/// Passwords: 8 to 30 non-whitespace characters.
pub fn validate_password(password: &str) -> Result<()> {
    if PASSWORD.is_match(password) {
        Ok(())
    } else {
        Err(RecordStoreError::InvalidIdentifier(
            "password must be 8-30 non-whitespace characters".to_string(),
        ))
    }
}

/// Validate a comma separated privilege list such as `SELECT, INSERT`.
///
/// A statement separator anywhere in the string is rejected before any
/// keyword check so that the error names the injection attempt.
pub fn validate_privileges(privileges: &str) -> Result<()> {
    if privileges.contains(';') {
        return Err(RecordStoreError::InvalidIdentifier(format!(
            "SECURITY: Privilege list contains semicolon (possible injection): {:?}",
            privileges
        )));
    }

    let mut seen = 0;
    for part in privileges.split(',') {
        let part = part.split_whitespace().collect::<Vec<_>>().join(" ");
        if !PRIVILEGE.is_match(&part) {
            return Err(RecordStoreError::InvalidIdentifier(format!(
                "unknown table privilege {:?} in {:?}",
                part, privileges
            )));
        }
        seen += 1;
    }

    if seen == 0 {
        return Err(RecordStoreError::InvalidIdentifier(
            "privilege list cannot be empty".to_string(),
        ));
    }
    Ok(())
}
