//! Error types for the record store.

use thiserror::Error;

/// Main error type for record store operations.
#[derive(Error, Debug)]
pub enum RecordStoreError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Every acquisition attempt failed; callers must not retry.
    #[error("Connection pool exhausted after {attempts} attempts (privileged: {privileged})")]
    PoolExhausted { privileged: bool, attempts: u32 },

    /// Record definition does not start with a `pk BIGINT` field
    #[error("Invalid record definition for table {table}: {reason}")]
    InvalidRecordDefinition { table: String, reason: String },

    /// Field type has no SQL column mapping
    #[error("Unsupported field type {field_type} for {table}.{field}")]
    UnsupportedFieldType {
        table: String,
        field: String,
        field_type: String,
    },

    /// Junction row is structurally inconsistent
    #[error("Invalid compound record in {table}: {reason}")]
    InvalidCompoundRecord { table: String, reason: String },

    /// Record key present where it must be absent, or the reverse
    #[error("Invalid key for {table}: {reason}")]
    InvalidKey { table: String, reason: String },

    /// JSON column value is neither a list nor a map container
    #[error("Unknown container shape: {0}")]
    UnknownContainerShape(String),

    /// A field value could not be converted to the declared type
    #[error("Conversion failed for field {field}: {message}")]
    Conversion { field: String, message: String },

    /// Rejected identifier, role name, password or privilege string
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Archive, drop or recreate step failed. The database may need manual recovery.
    #[error("Migration of database {database} failed: {message}")]
    Migration { database: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecordStoreError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        RecordStoreError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Conversion error
    pub fn conversion(field: impl Into<String>, message: impl Into<String>) -> Self {
        RecordStoreError::Conversion {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a fatal Migration error
    pub fn migration(database: impl Into<String>, message: impl Into<String>) -> Self {
        RecordStoreError::Migration {
            database: database.into(),
            message: message.into(),
        }
    }

    pub fn invalid_definition(table: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordStoreError::InvalidRecordDefinition {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_compound(table: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordStoreError::InvalidCompoundRecord {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_key(table: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordStoreError::InvalidKey {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must stop initialization instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecordStoreError::InvalidRecordDefinition { .. }
                | RecordStoreError::InvalidCompoundRecord { .. }
                | RecordStoreError::Migration { .. }
                | RecordStoreError::PoolExhausted { .. }
                | RecordStoreError::Config(_)
        )
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        if let RecordStoreError::Migration { database, .. } = self {
            output.push_str(&format!(
                "\n\nDatabase '{}' may be left without its archive copy or without its live copy. \
                 Inspect both databases before re-running; a second run can drop the only good copy.",
                database
            ));
        }

        output
    }
}

/// Result type alias for record store operations.
pub type Result<T> = std::result::Result<T, RecordStoreError>;
