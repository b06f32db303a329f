//! Moving data from one database generation to the next.
//!
//! A run has three phases per [`MigrationDescriptor`]:
//!
//! 1. **archive**: disconnect everyone from both databases, drop the old
//!    archive, clone the live database into the archive with
//!    `CREATE DATABASE ... WITH TEMPLATE`, then drop the live database.
//! 2. **recreate**: create the live database again, empty. The caller then
//!    synchronizes its schema.
//! 3. **move**: for each legacy table, read every archived row as a
//!    [`FieldMap`], apply the target's [`FieldConverter`](crate::core::FieldConverter)s,
//!    build target records (rows that fail are dropped), remove rows equal to
//!    ones already stored, batch-insert the rest and check the row count.
//!
//! Archive and recreate failures are returned as
//! [`RecordStoreError::Migration`] and must stop the process: after the drop
//! the archive may hold the only copy of the data, and re-running would
//! drop it.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::config::MismatchPolicy;
use crate::core::identifier::quote_pg;
use crate::core::record::{DynRecord, Record, RecordKind, KEY_COLUMN};
use crate::core::value::FieldMap;
use crate::error::{RecordStoreError, Result};
use crate::pool::Acquirer;
use crate::store::RecordStore;
use crate::sync::SchemaSynchronizer;

/// Archive/live database pair plus the legacy tables to carry over.
#[derive(Debug, Clone)]
pub struct MigrationDescriptor {
    archive_db: String,
    current_db: String,
    /// Legacy table name to the record type its rows become.
    tables: BTreeMap<String, RecordKind>,
}

impl MigrationDescriptor {
    pub fn new(archive_db: impl Into<String>, current_db: impl Into<String>) -> Self {
        Self {
            archive_db: archive_db.into(),
            current_db: current_db.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Builder form of [`add_table`](Self::add_table) for a concrete type.
    pub fn table<R: Record>(mut self, legacy_table: &str) -> Result<Self> {
        self.add_table(legacy_table, RecordKind::of::<R>())?;
        Ok(self)
    }

    /// Map a legacy table onto a target record type. Each legacy table may
    /// appear once.
    pub fn add_table(&mut self, legacy_table: &str, target: RecordKind) -> Result<()> {
        let legacy = legacy_table.to_lowercase();
        if self.tables.contains_key(&legacy) {
            return Err(RecordStoreError::Config(format!(
                "legacy table {} is mapped twice for database {}",
                legacy, self.current_db
            )));
        }
        self.tables.insert(legacy, target);
        Ok(())
    }

    /// Merge descriptors that target the same database pair. Duplicate legacy
    /// tables are an error, never a silent overwrite.
    pub fn combine(descriptors: impl IntoIterator<Item = MigrationDescriptor>) -> Result<Self> {
        let mut iter = descriptors.into_iter();
        let Some(mut combined) = iter.next() else {
            return Err(RecordStoreError::Config(
                "no migration descriptors to combine".into(),
            ));
        };

        for descriptor in iter {
            if descriptor.archive_db != combined.archive_db
                || descriptor.current_db != combined.current_db
            {
                return Err(RecordStoreError::Config(format!(
                    "cannot combine migration {} -> {} with {} -> {}",
                    descriptor.current_db,
                    descriptor.archive_db,
                    combined.current_db,
                    combined.archive_db
                )));
            }
            for (legacy, target) in descriptor.tables {
                combined.add_table(&legacy, target)?;
            }
        }
        Ok(combined)
    }

    pub fn archive_db(&self) -> &str {
        &self.archive_db
    }

    pub fn current_db(&self) -> &str {
        &self.current_db
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &RecordKind)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// What happened to one legacy table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMoveReport {
    pub legacy_table: String,
    pub target_table: String,
    /// Rows read from the archive.
    pub read: usize,
    /// Rows that converted into target records.
    pub converted: usize,
    /// Converted rows that were already stored, or repeated within the batch.
    pub duplicates: usize,
    /// Rows the batch insert reported back.
    pub inserted: usize,
    /// Row count grew by exactly the number of rows written.
    pub verified: bool,
}

/// Apply conversions and build target records. Legacy keys are discarded so
/// every row is inserted with a fresh key. Returns the records and the
/// number of rows dropped.
pub fn convert_rows(rows: Vec<FieldMap>, target: &RecordKind) -> (Vec<Box<dyn DynRecord>>, usize) {
    let converters = target.conversions();
    let mut records = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for mut row in rows {
        let converted = converters
            .iter()
            .try_for_each(|c| c.apply(&mut row))
            .and_then(|_| {
                row.remove(KEY_COLUMN);
                target.build(&row)
            });
        match converted {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Dropping legacy row for {}: {}", target.table(), e);
                dropped += 1;
            }
        }
    }
    (records, dropped)
}

/// Drop records equal, ignoring keys, to a stored record or to an earlier
/// record in the same list.
pub fn dedup(
    converted: Vec<Box<dyn DynRecord>>,
    existing: &[Box<dyn DynRecord>],
) -> Vec<Box<dyn DynRecord>> {
    let mut survivors: Vec<Box<dyn DynRecord>> = Vec::with_capacity(converted.len());
    for record in converted {
        let seen = existing
            .iter()
            .chain(survivors.iter())
            .any(|other| record.eq_ignoring_key_dyn(other.as_ref()));
        if !seen {
            survivors.push(record);
        }
    }
    survivors
}

/// Compare row counts around an insert.
fn verify_count(
    policy: MismatchPolicy,
    database: &str,
    table: &str,
    before: i64,
    after: i64,
    written: usize,
) -> Result<bool> {
    let grown = after - before;
    if grown == written as i64 {
        info!("Row count verified for {}: {} new rows", table, grown);
        return Ok(true);
    }

    let message = format!(
        "row count of {} grew by {} but {} rows were written",
        table, grown, written
    );
    match policy {
        MismatchPolicy::Warn => {
            warn!("Data integrity: {}", message);
            Ok(false)
        }
        MismatchPolicy::Fail => Err(RecordStoreError::migration(database, message)),
    }
}

/// Runs the archive, recreate and move phases.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    owner: String,
    policy: MismatchPolicy,
}

impl MigrationEngine {
    /// `owner` becomes the owner of the archive and the recreated database.
    pub fn new(owner: impl Into<String>, policy: MismatchPolicy) -> Self {
        Self {
            owner: owner.into(),
            policy,
        }
    }

    /// Clone the live database into the archive and drop the live one.
    /// `maintenance` must be a privileged source connected to another
    /// database. Returns `false` when there is no live database to archive.
    pub async fn archive(&self, maintenance: &Acquirer, descriptor: &MigrationDescriptor) -> Result<bool> {
        let current = descriptor.current_db();
        let archive = descriptor.archive_db();
        let fail = |step: &str, e: RecordStoreError| {
            error!("Archive of {} failed while {}: {}", current, step, e);
            RecordStoreError::migration(current, format!("{}: {}", step, e))
        };

        let client = maintenance
            .borrow(true)
            .await
            .map_err(|e| fail("connecting", e))?;

        let exists = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)",
                &[&current],
            )
            .await
            .map_err(|e| fail("checking database", e.into()))?
            .get::<_, bool>(0);
        if !exists {
            warn!("Database {} does not exist, nothing to archive", current);
            return Ok(false);
        }

        let current_q = quote_pg(current)?;
        let archive_q = quote_pg(archive)?;
        let owner_q = quote_pg(&self.owner)?;

        let terminate = "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                         WHERE datname = $1 AND pid <> pg_backend_pid()";
        for db in [archive, current] {
            client
                .execute(terminate, &[&db])
                .await
                .map_err(|e| fail("terminating connections", e.into()))?;
        }

        let steps = [
            ("dropping old archive", format!("DROP DATABASE IF EXISTS {}", archive_q)),
            (
                "copying live database",
                format!(
                    "CREATE DATABASE {} WITH TEMPLATE {} OWNER {}",
                    archive_q, current_q, owner_q
                ),
            ),
            ("dropping live database", format!("DROP DATABASE {}", current_q)),
        ];
        for (step, sql) in &steps {
            client
                .batch_execute(sql)
                .await
                .map_err(|e| fail(step, e.into()))?;
            info!("Migration of {}: {} done", current, step);
        }

        info!("Archived {} into {}", current, archive);
        Ok(true)
    }

    /// Create the live database again, empty and owned by the owner role.
    pub async fn recreate(&self, maintenance: &Acquirer, descriptor: &MigrationDescriptor) -> Result<()> {
        let current = descriptor.current_db();
        SchemaSynchronizer::new(maintenance.clone(), false)
            .ensure_database(current, &self.owner)
            .await
            .map_err(|e| {
                error!("Recreating {} failed: {}", current, e);
                RecordStoreError::migration(current, format!("recreating database: {}", e))
            })?;
        Ok(())
    }

    /// Carry one legacy table from `archive` into `current`.
    pub async fn move_table(
        &self,
        archive: &RecordStore,
        current: &RecordStore,
        legacy_table: &str,
        target: &RecordKind,
    ) -> Result<TableMoveReport> {
        let table = target.table();
        let mut report = TableMoveReport {
            legacy_table: legacy_table.to_string(),
            target_table: table.to_string(),
            ..Default::default()
        };

        let before = current.count(table).await?;
        let rows = archive.get_all_as_maps(legacy_table).await?;
        report.read = rows.len();
        if rows.is_empty() {
            info!("Legacy table {} is empty or missing, nothing to move", legacy_table);
            report.verified = true;
            return Ok(report);
        }

        let (converted, dropped) = convert_rows(rows, target);
        report.converted = converted.len();
        if dropped > 0 {
            warn!("{} of {} rows from {} did not convert", dropped, report.read, legacy_table);
        }

        let existing = current.get_all_dyn(table).await?;
        let survivors = dedup(converted, &existing);
        report.duplicates = report.converted - survivors.len();

        let batch: Vec<&dyn DynRecord> = survivors.iter().map(|r| r.as_ref()).collect();
        report.inserted = current.add_many_dyn(target, &batch).await?.len();

        let after = current.count(table).await?;
        report.verified = verify_count(
            self.policy,
            current.database(),
            table,
            before,
            after,
            survivors.len(),
        )?;

        info!(
            "Moved {} -> {}: read {}, converted {}, duplicates {}, inserted {}",
            legacy_table,
            table,
            report.read,
            report.converted,
            report.duplicates,
            report.inserted
        );
        Ok(report)
    }

    /// Move every table of `descriptor`. Any failure is fatal for the run.
    pub async fn run(
        &self,
        archive: &RecordStore,
        current: &RecordStore,
        descriptor: &MigrationDescriptor,
    ) -> Result<Vec<TableMoveReport>> {
        let mut reports = Vec::with_capacity(descriptor.len());
        for (legacy, target) in descriptor.tables() {
            let report = self
                .move_table(archive, current, legacy, target)
                .await
                .map_err(|e| match e {
                    RecordStoreError::Migration { .. } => e,
                    other => RecordStoreError::migration(
                        descriptor.current_db(),
                        format!("moving {}: {}", legacy, other),
                    ),
                })?;
            reports.push(report);
        }

        let unverified = reports.iter().filter(|r| !r.verified).count();
        if unverified > 0 {
            warn!(
                "Migration of {} finished with {} unverified tables",
                descriptor.current_db(),
                unverified
            );
        }
        Ok(reports)
    }
}
