//! Record CRUD, batched writes, matching, paging and compound records.
//!
//! A [`RecordStore`] runs the cached statement templates through an
//! [`Acquirer`] at one privilege tier. Typed methods take and return concrete
//! [`Record`] types; the `_dyn` methods take a table name and return boxed
//! [`DynRecord`]s built through the registry.
//!
//! Failure policy: a statement that fails at execution time is logged and the
//! call returns `None` or an empty `Vec`. Connection exhaustion, unregistered
//! tables, malformed compound records and key preconditions are returned as
//! errors.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, error, warn};

use crate::core::record::{
    downcast, Compound, DynRecord, Junction, Record, RecordDefinition, RecordKind,
};
use crate::core::registry::RecordRegistry;
use crate::core::value::{FieldMap, FieldValue};
use crate::error::{RecordStoreError, Result};
use crate::pool::Acquirer;
use crate::statements::{self, StatementKind, TemplateCatalog};

type Param<'a> = &'a (dyn ToSql + Sync);

/// Which slice of a table [`RecordStore::get_all`] returns. Rows are ordered
/// by key unless an order column is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    All,
    Limit(i64),
    LimitStart {
        limit: i64,
        start: i64,
    },
    Ordered {
        limit: i64,
        start: i64,
        column: String,
        descending: bool,
    },
}

/// Query executor for one database at one privilege tier.
#[derive(Clone)]
pub struct RecordStore {
    database: String,
    acquirer: Acquirer,
    catalog: Arc<TemplateCatalog>,
    registry: Arc<RecordRegistry>,
    privileged: bool,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("database", &self.database)
            .field("mode", &self.acquirer.mode())
            .field("tables", &self.catalog.len())
            .field("privileged", &self.privileged)
            .finish()
    }
}

fn field_values(def: &RecordDefinition, record: &dyn DynRecord) -> Vec<FieldValue> {
    def.data_fields()
        .iter()
        .map(|f| record.value_of(&f.name))
        .collect()
}

fn params(values: &[FieldValue]) -> Vec<Param<'_>> {
    values.iter().map(|v| v as Param<'_>).collect()
}

/// Build records from rows, skipping rows that do not convert.
fn build_rows(kind: &RecordKind, rows: &[Row]) -> Vec<Box<dyn DynRecord>> {
    rows.iter()
        .filter_map(|row| match FieldMap::from_row(row).and_then(|m| kind.build(&m)) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable {} row: {}", kind.table(), e);
                None
            }
        })
        .collect()
}

fn typed<R: Record>(records: Vec<Box<dyn DynRecord>>) -> Vec<R> {
    records.into_iter().filter_map(downcast::<R>).collect()
}

/// Keep fatal errors, turn everything else into an empty result.
fn recover<T: Default>(op: &str, table: &str, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            error!("{} on {} failed: {}", op, table, e);
            Ok(T::default())
        }
    }
}

impl RecordStore {
    pub fn new(
        database: impl Into<String>,
        acquirer: Acquirer,
        catalog: Arc<TemplateCatalog>,
        registry: Arc<RecordRegistry>,
        privileged: bool,
    ) -> Self {
        Self {
            database: database.into(),
            acquirer,
            catalog,
            registry,
            privileged,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &RecordRegistry {
        &self.registry
    }

    async fn query(&self, sql: &str, params: &[Param<'_>]) -> Result<Vec<Row>> {
        let client = self.acquirer.borrow(self.privileged).await?;
        Ok(client.query(sql, params).await?)
    }

    fn kind_for(&self, table: &str) -> Result<RecordKind> {
        self.registry.require(table).copied()
    }

    // ===== single-record writes =====

    async fn insert_kind(
        &self,
        kind: &RecordKind,
        record: &dyn DynRecord,
    ) -> Result<Option<Box<dyn DynRecord>>> {
        let table = kind.table();
        if let Some(key) = record.record_key() {
            return Err(RecordStoreError::invalid_key(
                table,
                format!("add expects a new record, got key {}", key),
            ));
        }
        let sql = self.catalog.get(table, StatementKind::Insert)?;
        let values = field_values(kind.definition(), record);

        let result = async {
            let rows = self.query(sql, &params(&values)).await?;
            Ok::<_, RecordStoreError>(build_rows(kind, &rows).into_iter().next())
        }
        .await;
        recover("add", table, result)
    }

    async fn update_kind(
        &self,
        kind: &RecordKind,
        record: &dyn DynRecord,
    ) -> Result<Option<Box<dyn DynRecord>>> {
        let table = kind.table();
        let Some(key) = record.record_key() else {
            return Err(RecordStoreError::invalid_key(
                table,
                "update expects a stored record with a key",
            ));
        };
        let sql = self.catalog.get(table, StatementKind::Update)?;
        let mut values = field_values(kind.definition(), record);
        values.push(FieldValue::BigInt(key));

        let result = async {
            let rows = self.query(sql, &params(&values)).await?;
            Ok::<_, RecordStoreError>(build_rows(kind, &rows).into_iter().next())
        }
        .await;
        let updated = recover("update", table, result)?;
        if updated.is_none() {
            warn!("No {} row with key {} was updated", table, key);
        }
        Ok(updated)
    }

    async fn upsert_kind(
        &self,
        kind: &RecordKind,
        record: &dyn DynRecord,
    ) -> Result<Option<Box<dyn DynRecord>>> {
        match record.record_key() {
            Some(_) => self.update_kind(kind, record).await,
            None => self.insert_kind(kind, record).await,
        }
    }

    /// Insert a new record and return it as stored, generated key included.
    pub async fn add<R: Record>(&self, record: &R) -> Result<Option<R>> {
        Ok(self
            .insert_kind(&RecordKind::of::<R>(), record)
            .await?
            .and_then(downcast::<R>))
    }

    /// Overwrite every field of a stored record.
    pub async fn update<R: Record>(&self, record: &R) -> Result<Option<R>> {
        Ok(self
            .update_kind(&RecordKind::of::<R>(), record)
            .await?
            .and_then(downcast::<R>))
    }

    /// Update when the record has a key, insert otherwise.
    pub async fn upsert<R: Record>(&self, record: &R) -> Result<Option<R>> {
        Ok(self
            .upsert_kind(&RecordKind::of::<R>(), record)
            .await?
            .and_then(downcast::<R>))
    }

    /// [`upsert`](Self::upsert) for a record whose type is only known at runtime.
    pub async fn upsert_dyn(&self, record: &dyn DynRecord) -> Result<Option<Box<dyn DynRecord>>> {
        let kind = self.kind_for(record.record_definition().table())?;
        self.upsert_kind(&kind, record).await
    }

    // ===== batched writes =====

    /// Insert or update every record in one transaction, in input order, and
    /// return the keys the statements reported. The transaction rolls back
    /// when it is dropped uncommitted, on error or on cancellation.
    async fn write_batch(&self, kind: &RecordKind, records: &[&dyn DynRecord]) -> Result<Vec<i64>> {
        let def = kind.definition();
        let insert_sql = self.catalog.get(def.table(), StatementKind::InsertMany)?;
        let update_sql = self.catalog.get(def.table(), StatementKind::UpdateMany)?;
        let mut client = self.acquirer.borrow(self.privileged).await?;

        let tx = client.transaction().await?;
        let insert = tx.prepare(insert_sql).await?;
        let update = tx.prepare(update_sql).await?;

        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            let mut values = field_values(def, *record);
            let row = match record.record_key() {
                None => tx.query_opt(&insert, &params(&values)).await?,
                Some(key) => {
                    values.push(FieldValue::BigInt(key));
                    tx.query_opt(&update, &params(&values)).await?
                }
            };
            match row {
                Some(row) => keys.push(row.try_get::<_, i64>(0)?),
                None => warn!(
                    "Batch write to {} matched no row for key {:?}",
                    def.table(),
                    record.record_key()
                ),
            }
        }

        tx.commit().await?;
        Ok(keys)
    }

    /// Write a batch and re-read the written rows by key. A failed batch
    /// yields an empty result, never a partial one.
    async fn batch(
        &self,
        op: &str,
        kind: &RecordKind,
        records: &[&dyn DynRecord],
    ) -> Result<Vec<Box<dyn DynRecord>>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let keys = recover(op, kind.table(), self.write_batch(kind, records).await)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        debug!("{} wrote {} rows to {}", op, keys.len(), kind.table());
        self.fetch_keys(kind, &keys).await
    }

    pub async fn add_many<R: Record>(&self, records: &[R]) -> Result<Vec<R>> {
        let kind = RecordKind::of::<R>();
        if let Some(key) = records.iter().find_map(|r| r.key()) {
            return Err(RecordStoreError::invalid_key(
                kind.table(),
                format!("add_many expects new records, got key {}", key),
            ));
        }
        let dyns: Vec<&dyn DynRecord> = records.iter().map(|r| r as &dyn DynRecord).collect();
        Ok(typed(self.batch("add_many", &kind, &dyns).await?))
    }

    pub async fn update_many<R: Record>(&self, records: &[R]) -> Result<Vec<R>> {
        let kind = RecordKind::of::<R>();
        if records.iter().any(|r| r.key().is_none()) {
            return Err(RecordStoreError::invalid_key(
                kind.table(),
                "update_many expects stored records with keys",
            ));
        }
        let dyns: Vec<&dyn DynRecord> = records.iter().map(|r| r as &dyn DynRecord).collect();
        Ok(typed(self.batch("update_many", &kind, &dyns).await?))
    }

    /// Batch insert of records whose type is only known at runtime.
    pub async fn add_many_dyn(
        &self,
        kind: &RecordKind,
        records: &[&dyn DynRecord],
    ) -> Result<Vec<Box<dyn DynRecord>>> {
        if records.iter().any(|r| r.record_key().is_some()) {
            return Err(RecordStoreError::invalid_key(
                kind.table(),
                "add_many expects new records",
            ));
        }
        self.batch("add_many", kind, records).await
    }

    /// Mixed batch: keyless records are inserted, keyed ones updated.
    pub async fn upsert_many<R: Record>(&self, records: &[R]) -> Result<Vec<R>> {
        let kind = RecordKind::of::<R>();
        let dyns: Vec<&dyn DynRecord> = records.iter().map(|r| r as &dyn DynRecord).collect();
        Ok(typed(self.batch("upsert_many", &kind, &dyns).await?))
    }

    // ===== reads =====

    async fn fetch_keys(&self, kind: &RecordKind, keys: &[i64]) -> Result<Vec<Box<dyn DynRecord>>> {
        let table = kind.table();
        let sql = self.catalog.get(table, StatementKind::PkMany)?;
        let keys = keys.to_vec();
        let result = async {
            let rows = self.query(sql, &[&keys]).await?;
            Ok::<_, RecordStoreError>(build_rows(kind, &rows))
        }
        .await;
        recover("get_by_keys", table, result)
    }

    async fn fetch_key(&self, kind: &RecordKind, key: i64) -> Result<Option<Box<dyn DynRecord>>> {
        let table = kind.table();
        let sql = self.catalog.get(table, StatementKind::Pk)?;
        let result = async {
            let rows = self.query(sql, &[&key]).await?;
            Ok::<_, RecordStoreError>(build_rows(kind, &rows).into_iter().next())
        }
        .await;
        recover("get_by_key", table, result)
    }

    pub async fn get_by_key<R: Record>(&self, key: i64) -> Result<Option<R>> {
        Ok(self
            .fetch_key(&RecordKind::of::<R>(), key)
            .await?
            .and_then(downcast::<R>))
    }

    pub async fn get_by_keys<R: Record>(&self, keys: &[i64]) -> Result<Vec<R>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(typed(self.fetch_keys(&RecordKind::of::<R>(), keys).await?))
    }

    pub async fn get_by_key_dyn(&self, table: &str, key: i64) -> Result<Option<Box<dyn DynRecord>>> {
        let kind = self.kind_for(table)?;
        self.fetch_key(&kind, key).await
    }

    pub async fn get_by_keys_dyn(&self, table: &str, keys: &[i64]) -> Result<Vec<Box<dyn DynRecord>>> {
        let kind = self.kind_for(table)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_keys(&kind, keys).await
    }

    /// Scan a table, whole or one page at a time.
    pub async fn get_all<R: Record>(&self, page: &Page) -> Result<Vec<R>> {
        let kind = RecordKind::of::<R>();
        let table = kind.table();
        let set = self.catalog.set(table)?;

        let (sql, bounds): (String, Vec<i64>) = match page {
            Page::All => (set.get(StatementKind::All).to_string(), vec![]),
            Page::Limit(limit) => (set.get(StatementKind::AllLimit).to_string(), vec![*limit]),
            Page::LimitStart { limit, start } => (
                set.get(StatementKind::AllLimitStart).to_string(),
                vec![*limit, *start],
            ),
            Page::Ordered {
                limit,
                start,
                column,
                descending,
            } => {
                let statement = if *descending {
                    StatementKind::AllLimitStartOrderDesc
                } else {
                    StatementKind::AllLimitStartOrderAsc
                };
                (set.ordered(statement, column)?, vec![*limit, *start])
            }
        };

        let result = async {
            let bound: Vec<Param<'_>> = bounds.iter().map(|b| b as Param<'_>).collect();
            let rows = self.query(&sql, &bound).await?;
            Ok::<_, RecordStoreError>(build_rows(&kind, &rows))
        }
        .await;
        Ok(typed(recover("get_all", table, result)?))
    }

    /// Every row of a registered table, in key order.
    pub async fn get_all_dyn(&self, table: &str) -> Result<Vec<Box<dyn DynRecord>>> {
        let kind = self.kind_for(table)?;
        let sql = self.catalog.get(table, StatementKind::All)?;
        let result = async {
            let rows = self.query(sql, &[]).await?;
            Ok::<_, RecordStoreError>(build_rows(&kind, &rows))
        }
        .await;
        recover("get_all", table, result)
    }

    /// Every row of any table as loosely typed maps. The table does not have
    /// to be registered, which is how legacy tables are read.
    pub async fn get_all_as_maps(&self, table: &str) -> Result<Vec<FieldMap>> {
        let sql = statements::select_all(table)?;
        let result = async {
            let rows = self.query(&sql, &[]).await?;
            Ok::<_, RecordStoreError>(rows
                .iter()
                .filter_map(|row| match FieldMap::from_row(row) {
                    Ok(map) => Some(map),
                    Err(e) => {
                        warn!("Skipping unreadable {} row: {}", table, e);
                        None
                    }
                })
                .collect())
        }
        .await;
        recover("get_all_as_maps", table, result)
    }

    /// Row count of any table. Unlike the other reads, failures are returned.
    pub async fn count(&self, table: &str) -> Result<i64> {
        let sql = statements::count_rows(table)?;
        let client = self.acquirer.borrow(self.privileged).await?;
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.try_get(0)?)
    }

    // ===== matching =====

    async fn match_kind(
        &self,
        kind: &RecordKind,
        probe: &dyn DynRecord,
    ) -> Result<Vec<Box<dyn DynRecord>>> {
        let table = kind.table();
        let sql = self.catalog.get(table, StatementKind::Match)?;
        let values = field_values(kind.definition(), probe);
        let result = async {
            let rows = self.query(sql, &params(&values)).await?;
            Ok::<_, RecordStoreError>(build_rows(kind, &rows))
        }
        .await;
        recover("match", table, result)
    }

    /// Rows whose fields equal (or, for containers, contain) every non-null
    /// field of `probe`. The probe's key is ignored.
    pub async fn find_matches<R: Record>(&self, probe: &R) -> Result<Vec<R>> {
        Ok(typed(self.match_kind(&RecordKind::of::<R>(), probe).await?))
    }

    /// First match by key order.
    pub async fn find_match<R: Record>(&self, probe: &R) -> Result<Option<R>> {
        Ok(self.find_matches(probe).await?.into_iter().next())
    }

    /// Rows equal to `probe` on exactly the listed columns, nulls included.
    pub async fn match_by_columns<R: Record>(&self, probe: &R, columns: &[&str]) -> Result<Vec<R>> {
        let kind = RecordKind::of::<R>();
        let (sql, fields) = statements::match_by_columns(kind.definition(), columns)?;
        let values: Vec<FieldValue> = fields.iter().map(|f| probe.field_value(&f.name)).collect();

        let result = async {
            let rows = self.query(&sql, &params(&values)).await?;
            Ok::<_, RecordStoreError>(build_rows(&kind, &rows))
        }
        .await;
        Ok(typed(recover("match_by_columns", kind.table(), result)?))
    }

    // ===== deletes =====

    async fn delete_key_kind(&self, kind: &RecordKind, key: i64) -> Result<Option<Box<dyn DynRecord>>> {
        let table = kind.table();
        let sql = self.catalog.get(table, StatementKind::Delete)?;
        let result = async {
            let rows = self.query(sql, &[&key]).await?;
            Ok::<_, RecordStoreError>(build_rows(kind, &rows).into_iter().next())
        }
        .await;

        let Some(deleted) = recover("delete", table, result)? else {
            debug!("No {} row with key {} to delete", table, key);
            return Ok(None);
        };
        if self.fetch_key(kind, key).await?.is_some() {
            error!("{} row {} is still present after delete", table, key);
            return Ok(None);
        }
        Ok(Some(deleted))
    }

    async fn delete_keys_kind(
        &self,
        kind: &RecordKind,
        keys: &[i64],
    ) -> Result<Vec<Box<dyn DynRecord>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let table = kind.table();
        let sql = self.catalog.get(table, StatementKind::DeleteMany)?;
        let key_list = keys.to_vec();
        let result = async {
            let rows = self.query(sql, &[&key_list]).await?;
            Ok::<_, RecordStoreError>(build_rows(kind, &rows))
        }
        .await;
        let deleted = recover("delete_many", table, result)?;
        if deleted.is_empty() {
            return Ok(deleted);
        }

        let remaining: HashSet<i64> = self
            .fetch_keys(kind, keys)
            .await?
            .iter()
            .filter_map(|r| r.record_key())
            .collect();
        for key in &remaining {
            error!("{} row {} is still present after delete", table, key);
        }
        Ok(deleted
            .into_iter()
            .filter(|r| r.record_key().is_some_and(|k| !remaining.contains(&k)))
            .collect())
    }

    /// Delete one row and confirm it is gone. Deleting an absent key returns
    /// `None` without error.
    pub async fn delete_by_key<R: Record>(&self, key: i64) -> Result<Option<R>> {
        Ok(self
            .delete_key_kind(&RecordKind::of::<R>(), key)
            .await?
            .and_then(downcast::<R>))
    }

    /// Delete many rows; only rows confirmed gone are returned.
    pub async fn delete_by_keys<R: Record>(&self, keys: &[i64]) -> Result<Vec<R>> {
        Ok(typed(self.delete_keys_kind(&RecordKind::of::<R>(), keys).await?))
    }

    pub async fn delete_by_key_dyn(
        &self,
        table: &str,
        key: i64,
    ) -> Result<Option<Box<dyn DynRecord>>> {
        let kind = self.kind_for(table)?;
        self.delete_key_kind(&kind, key).await
    }

    pub async fn delete_by_keys_dyn(
        &self,
        table: &str,
        keys: &[i64],
    ) -> Result<Vec<Box<dyn DynRecord>>> {
        let kind = self.kind_for(table)?;
        self.delete_keys_kind(&kind, keys).await
    }

    // ===== compound records =====

    /// Resolve a junction's parent and children. Link lists of different
    /// lengths fail before anything is read. A parent or child that no
    /// longer exists yields `None`.
    async fn assemble<J: Junction>(&self, junction: J) -> Result<Option<Compound<J>>> {
        junction.validate_links()?;
        let table = J::definition().table();

        let Some(parent_key) = junction.parent_key() else {
            warn!("{} row {:?} has no parent key", table, junction.key());
            return Ok(None);
        };
        let Some(parent) = self
            .get_by_key_dyn(junction.parent_table(), parent_key)
            .await?
        else {
            warn!(
                "{} row {:?} points at missing parent {}/{}",
                table,
                junction.key(),
                junction.parent_table(),
                parent_key
            );
            return Ok(None);
        };

        let links: Vec<(&String, i64)> = junction
            .child_tables()
            .iter()
            .zip(junction.child_keys().iter().copied())
            .collect();
        let fetched = try_join_all(
            links
                .iter()
                .map(|(child_table, child_key)| self.get_by_key_dyn(child_table, *child_key)),
        )
        .await?;

        let mut children = Vec::with_capacity(fetched.len());
        for ((child_table, child_key), child) in links.iter().zip(fetched) {
            match child {
                Some(child) => children.push(child),
                None => {
                    warn!(
                        "{} row {:?} points at missing child {}/{}",
                        table,
                        junction.key(),
                        child_table,
                        child_key
                    );
                    return Ok(None);
                }
            }
        }

        Ok(Some(Compound::new(junction, parent, children)))
    }

    pub async fn get_compound_by_key<J: Junction>(&self, key: i64) -> Result<Option<Compound<J>>> {
        match self.get_by_key::<J>(key).await? {
            Some(junction) => self.assemble(junction).await,
            None => Ok(None),
        }
    }

    pub async fn get_compound_by_keys<J: Junction>(&self, keys: &[i64]) -> Result<Vec<Compound<J>>> {
        let mut compounds = Vec::new();
        for junction in self.get_by_keys::<J>(keys).await? {
            if let Some(compound) = self.assemble(junction).await? {
                compounds.push(compound);
            }
        }
        Ok(compounds)
    }

    /// Compounds whose junction matches `probe` field by field.
    pub async fn find_compound_match<J: Junction>(&self, probe: &J) -> Result<Vec<Compound<J>>> {
        let mut compounds = Vec::new();
        for junction in self.find_matches(probe).await? {
            if let Some(compound) = self.assemble(junction).await? {
                compounds.push(compound);
            }
        }
        Ok(compounds)
    }

    /// Save parent and children first (insert or update each), point the
    /// junction at their keys, then reuse an identical stored junction or
    /// write a new one.
    pub async fn save_compound<J: Junction>(&self, compound: &Compound<J>) -> Result<Option<Compound<J>>> {
        compound.junction.validate_links()?;
        let table = J::definition().table();

        let Some(parent) = self.upsert_dyn(compound.parent.as_ref()).await? else {
            error!("Could not save parent of {} compound", table);
            return Ok(None);
        };
        let Some(parent_key) = parent.record_key() else {
            return Ok(None);
        };

        let mut children = Vec::with_capacity(compound.children.len());
        let mut links = Vec::with_capacity(compound.children.len());
        for child in &compound.children {
            let saved = self
                .upsert_dyn(child.as_ref())
                .await?
                .filter(|c| c.record_key().is_some());
            let Some(saved) = saved else {
                error!(
                    "Could not save {} child of {} compound",
                    child.record_definition().table(),
                    table
                );
                return Ok(None);
            };
            if let Some(key) = saved.record_key() {
                links.push((saved.record_definition().table().to_string(), key));
            }
            children.push(saved);
        }

        let mut junction = compound.junction.clone();
        junction.link(parent.record_definition().table(), parent_key, links);
        junction.validate_links()?;

        let existing = self
            .find_matches(&junction)
            .await?
            .into_iter()
            .find(|stored| stored.eq_ignoring_key(&junction));

        let stored = match existing {
            Some(stored) => {
                debug!("Reusing {} row {:?}", table, stored.key());
                Some(stored)
            }
            None if junction.key().is_some() => self.update(&junction).await?,
            None => self.add(&junction).await?,
        };

        Ok(stored.map(|junction| Compound::new(junction, parent, children)))
    }

    pub async fn save_compounds<J: Junction>(&self, compounds: &[Compound<J>]) -> Result<Vec<Compound<J>>> {
        let mut saved = Vec::with_capacity(compounds.len());
        for compound in compounds {
            if let Some(stored) = self.save_compound(compound).await? {
                saved.push(stored);
            }
        }
        Ok(saved)
    }
}
