//! SQL statement templates generated from record definitions.
//!
//! Every registered table gets a fixed [`StatementSet`], addressed by table
//! name plus operation suffix (`person-insert`, `person-all-limit`, ...).
//! The sets are built once into a [`TemplateCatalog`] and only read afterwards.
//!
//! Parameter layout:
//!
//! - INSERT and MATCH bind the declared non-key fields in declaration order.
//! - UPDATE binds the same fields, then the key as the trailing parameter.
//! - Container fields bind JSON text cast to `jsonb`.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::identifier::quote_pg;
use crate::core::record::{FieldDef, RecordDefinition, KEY_COLUMN};
use crate::core::registry::RecordRegistry;
use crate::error::{RecordStoreError, Result};

/// Placeholder replaced by the validated ORDER BY column.
const ORDER_PLACEHOLDER: &str = "{order}";

/// Operation a template implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Create,
    Insert,
    InsertMany,
    Update,
    UpdateMany,
    Match,
    Pk,
    PkMany,
    All,
    AllLimit,
    AllLimitStart,
    AllLimitStartOrderDesc,
    AllLimitStartOrderAsc,
    Delete,
    DeleteMany,
    Count,
}

impl StatementKind {
    pub const ALL: [StatementKind; 16] = [
        StatementKind::Create,
        StatementKind::Insert,
        StatementKind::InsertMany,
        StatementKind::Update,
        StatementKind::UpdateMany,
        StatementKind::Match,
        StatementKind::Pk,
        StatementKind::PkMany,
        StatementKind::All,
        StatementKind::AllLimit,
        StatementKind::AllLimitStart,
        StatementKind::AllLimitStartOrderDesc,
        StatementKind::AllLimitStartOrderAsc,
        StatementKind::Delete,
        StatementKind::DeleteMany,
        StatementKind::Count,
    ];

    /// Stable key suffix.
    pub fn suffix(&self) -> &'static str {
        match self {
            StatementKind::Create => "-create",
            StatementKind::Insert => "-insert",
            StatementKind::InsertMany => "-insert-many",
            StatementKind::Update => "-update",
            StatementKind::UpdateMany => "-update-many",
            StatementKind::Match => "-match",
            StatementKind::Pk => "-pk",
            StatementKind::PkMany => "-pk-many",
            StatementKind::All => "-all",
            StatementKind::AllLimit => "-all-limit",
            StatementKind::AllLimitStart => "-all-limit-start",
            StatementKind::AllLimitStartOrderDesc => "-all-limit-start-order-desc",
            StatementKind::AllLimitStartOrderAsc => "-all-limit-start-order-asc",
            StatementKind::Delete => "-delete",
            StatementKind::DeleteMany => "-delete-many",
            StatementKind::Count => "-count",
        }
    }

    /// Catalog key for `table`.
    pub fn key(&self, table: &str) -> String {
        format!("{}{}", table, self.suffix())
    }
}

/// Parameter placeholder for a field, with a `jsonb` cast for containers.
fn placeholder(field: &FieldDef, n: usize) -> String {
    if field.field_type.is_json() {
        format!("${}::jsonb", n)
    } else {
        format!("${}", n)
    }
}

/// Column definition list for CREATE TABLE, key first.
pub fn column_definitions(def: &RecordDefinition) -> Result<Vec<String>> {
    let mut columns = vec![format!(
        "{} BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY",
        quote_pg(KEY_COLUMN)?
    )];
    for field in def.data_fields() {
        columns.push(format!("{} {}", quote_pg(&field.name)?, def.sql_type(field)?));
    }
    Ok(columns)
}

/// One `ALTER TABLE` adding every missing column. Any unmapped field type
/// fails the whole statement.
pub fn alter_add_columns(def: &RecordDefinition, missing: &[&FieldDef]) -> Result<String> {
    let mut clauses = Vec::with_capacity(missing.len());
    for field in missing {
        clauses.push(format!(
            "ADD COLUMN IF NOT EXISTS {} {}",
            quote_pg(&field.name)?,
            def.sql_type(field)?
        ));
    }
    Ok(format!(
        "ALTER TABLE {} {}",
        quote_pg(def.table())?,
        clauses.join(", ")
    ))
}

/// One `ALTER TABLE` dropping every listed column.
pub fn alter_drop_columns(table: &str, extra: &[String]) -> Result<String> {
    let clauses = extra
        .iter()
        .map(|c| Ok(format!("DROP COLUMN IF EXISTS {}", quote_pg(c)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "ALTER TABLE {} {}",
        quote_pg(table)?,
        clauses.join(", ")
    ))
}

/// Unordered scan of any table, registered or not. Used to read legacy
/// tables whose layout is unknown.
pub fn select_all(table: &str) -> Result<String> {
    Ok(format!("SELECT * FROM {}", quote_pg(&table.to_lowercase())?))
}

/// Row count of any table.
pub fn count_rows(table: &str) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*)::int8 FROM {}",
        quote_pg(&table.to_lowercase())?
    ))
}

/// Strict match on a subset of columns: every listed column must equal the
/// bound value, nulls included.
pub fn match_by_columns(def: &RecordDefinition, columns: &[&str]) -> Result<(String, Vec<FieldDef>)> {
    if columns.is_empty() {
        return Err(RecordStoreError::Config(format!(
            "match on {} needs at least one column",
            def.table()
        )));
    }
    let mut fields = Vec::with_capacity(columns.len());
    let mut predicates = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let field = def
            .data_fields()
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| {
                RecordStoreError::Config(format!("{} has no column {}", def.table(), column))
            })?;
        let col = quote_pg(&field.name)?;
        if field.field_type.is_json() {
            predicates.push(format!("{} = ${}::jsonb", col, i + 1));
        } else {
            predicates.push(format!("{} IS NOT DISTINCT FROM ${}", col, i + 1));
        }
        fields.push(field.clone());
    }
    let sql = format!(
        "SELECT * FROM {} WHERE {} ORDER BY {}",
        quote_pg(def.table())?,
        predicates.join(" AND "),
        quote_pg(KEY_COLUMN)?
    );
    Ok((sql, fields))
}

/// The statements for one table.
#[derive(Debug, Clone)]
pub struct StatementSet {
    table: String,
    statements: HashMap<StatementKind, String>,
    order_columns: Vec<String>,
}

impl StatementSet {
    /// Build every template for `def`. The key shape is validated first, so
    /// no SQL is generated for a malformed definition.
    pub fn build(def: &RecordDefinition) -> Result<Self> {
        def.validate()?;

        let table = quote_pg(def.table())?;
        let pk = quote_pg(KEY_COLUMN)?;
        let fields = def.data_fields();

        let names = fields
            .iter()
            .map(|f| quote_pg(&f.name))
            .collect::<Result<Vec<_>>>()?;
        let values: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| placeholder(f, i + 1))
            .collect();

        let mut statements = HashMap::new();
        let mut put = |kind: StatementKind, sql: String| {
            statements.insert(kind, sql);
        };

        put(
            StatementKind::Create,
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                table,
                column_definitions(def)?.join(", ")
            ),
        );

        let insert_head = if fields.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                values.join(", ")
            )
        };
        put(StatementKind::Insert, format!("{} RETURNING *", insert_head));
        put(
            StatementKind::InsertMany,
            format!("{} RETURNING {}", insert_head, pk),
        );

        let key_param = fields.len() + 1;
        if fields.is_empty() {
            // Nothing to set; an update re-reads the row.
            put(
                StatementKind::Update,
                format!("SELECT * FROM {} WHERE {} = $1", table, pk),
            );
            put(
                StatementKind::UpdateMany,
                format!("SELECT {} FROM {} WHERE {} = $1", pk, table, pk),
            );
        } else {
            let assignments: Vec<String> = names
                .iter()
                .zip(&values)
                .map(|(n, v)| format!("{} = {}", n, v))
                .collect();
            let update_head = format!(
                "UPDATE {} SET {} WHERE {} = ${}",
                table,
                assignments.join(", "),
                pk,
                key_param
            );
            put(StatementKind::Update, format!("{} RETURNING *", update_head));
            put(
                StatementKind::UpdateMany,
                format!("{} RETURNING {}", update_head, pk),
            );
        }

        let predicates: Vec<String> = fields
            .iter()
            .zip(&names)
            .enumerate()
            .map(|(i, (f, n))| {
                if f.field_type.is_json() {
                    format!("({} @> ${p}::jsonb OR ${p}::jsonb IS NULL)", n, p = i + 1)
                } else {
                    format!("({} = ${p} OR ${p} IS NULL)", n, p = i + 1)
                }
            })
            .collect();
        let where_clause = if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        };
        put(
            StatementKind::Match,
            format!("SELECT * FROM {}{} ORDER BY {}", table, where_clause, pk),
        );

        put(
            StatementKind::Pk,
            format!("SELECT * FROM {} WHERE {} = $1", table, pk),
        );
        put(
            StatementKind::PkMany,
            format!(
                "SELECT * FROM {} WHERE {} = ANY($1) ORDER BY {}",
                table, pk, pk
            ),
        );

        let select_all = format!("SELECT * FROM {}", table);
        put(StatementKind::All, format!("{} ORDER BY {}", select_all, pk));
        put(
            StatementKind::AllLimit,
            format!("{} ORDER BY {} LIMIT $1", select_all, pk),
        );
        put(
            StatementKind::AllLimitStart,
            format!("{} ORDER BY {} LIMIT $1 OFFSET $2", select_all, pk),
        );
        put(
            StatementKind::AllLimitStartOrderDesc,
            format!(
                "{} ORDER BY {} DESC, {} LIMIT $1 OFFSET $2",
                select_all, ORDER_PLACEHOLDER, pk
            ),
        );
        put(
            StatementKind::AllLimitStartOrderAsc,
            format!(
                "{} ORDER BY {} ASC, {} LIMIT $1 OFFSET $2",
                select_all, ORDER_PLACEHOLDER, pk
            ),
        );

        put(
            StatementKind::Delete,
            format!("DELETE FROM {} WHERE {} = $1 RETURNING *", table, pk),
        );
        put(
            StatementKind::DeleteMany,
            format!("DELETE FROM {} WHERE {} = ANY($1) RETURNING *", table, pk),
        );
        put(
            StatementKind::Count,
            format!("SELECT COUNT(*)::int8 FROM {}", table),
        );

        Ok(Self {
            table: def.table().to_string(),
            statements,
            order_columns: def.fields().iter().map(|f| f.name.clone()).collect(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, kind: StatementKind) -> &str {
        self.statements
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Ordered scan with the column substituted. Only declared columns are
    /// accepted; anything else is rejected before it reaches SQL.
    pub fn ordered(&self, kind: StatementKind, column: &str) -> Result<String> {
        if !matches!(
            kind,
            StatementKind::AllLimitStartOrderAsc | StatementKind::AllLimitStartOrderDesc
        ) {
            return Err(RecordStoreError::Config(format!(
                "{} is not an ordered statement",
                kind.key(&self.table)
            )));
        }
        let column = column.to_lowercase();
        if !self.order_columns.contains(&column) {
            return Err(RecordStoreError::InvalidIdentifier(format!(
                "{} has no column {:?} to order by",
                self.table, column
            )));
        }
        Ok(self
            .get(kind)
            .replacen(ORDER_PLACEHOLDER, &quote_pg(&column)?, 1))
    }
}

/// Read-only map from table name to its statement set.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    sets: HashMap<String, StatementSet>,
}

impl TemplateCatalog {
    /// Build sets for every registered table. A table whose field types do
    /// not map is left out and reported; other tables are unaffected.
    pub fn build(registry: &RecordRegistry) -> (Self, Vec<(String, RecordStoreError)>) {
        let mut sets = HashMap::new();
        let mut failures = Vec::new();
        for kind in registry.kinds() {
            match StatementSet::build(kind.definition()) {
                Ok(set) => {
                    debug!("Prepared {} statements for {}", StatementKind::ALL.len(), kind.table());
                    sets.insert(kind.table().to_string(), set);
                }
                Err(e) => {
                    warn!("Skipping statements for {}: {}", kind.table(), e);
                    failures.push((kind.table().to_string(), e));
                }
            }
        }
        (Self { sets }, failures)
    }

    pub fn set(&self, table: &str) -> Result<&StatementSet> {
        self.sets.get(&table.to_lowercase()).ok_or_else(|| {
            RecordStoreError::Config(format!("no statements prepared for table {}", table))
        })
    }

    pub fn get(&self, table: &str, kind: StatementKind) -> Result<&str> {
        Ok(self.set(table)?.get(kind))
    }

    /// Look up by catalog key such as `person-all-limit`.
    pub fn by_key(&self, key: &str) -> Option<&str> {
        StatementKind::ALL.iter().find_map(|kind| {
            let table = key.strip_suffix(kind.suffix())?;
            self.sets.get(table).map(|set| set.get(*kind))
        })
    }

    pub fn contains(&self, table: &str) -> bool {
        self.sets.contains_key(&table.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
