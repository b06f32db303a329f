//! Database lifecycle: initialization, steady-state stores and shutdown.
//!
//! [`DatabaseManager::open`] runs the whole startup sequence for one
//! database, in this order:
//!
//! 1. build statement templates for every registered record type
//! 2. archive the live database when migration is enabled
//! 3. create the admin and user roles, then the database
//! 4. synchronize tables and grant privileges
//! 5. move archived data into the new tables
//! 6. open the steady-state connection pools
//!
//! Steps 2 to 5 run over dedicated superuser connections and only when
//! superuser credentials are configured. Without them the manager assumes the
//! schema already exists and goes straight to step 6.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, Credentials};
use crate::core::registry::RecordRegistry;
use crate::error::{RecordStoreError, Result};
use crate::migration::{MigrationDescriptor, MigrationEngine, TableMoveReport};
use crate::pool::{Acquirer, BootstrapSource, PooledSource};
use crate::statements::TemplateCatalog;
use crate::store::RecordStore;
use crate::sync::{SchemaSynchronizer, SyncReport};

/// What initialization did. Empty when no superuser was configured.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub archived: bool,
    pub sync: Option<SyncReport>,
    pub moved: Vec<TableMoveReport>,
}

/// Owner of everything bound to one database.
pub struct DatabaseManager {
    config: Config,
    registry: Arc<RecordRegistry>,
    catalog: Arc<TemplateCatalog>,
    acquirer: Acquirer,
    startup: StartupReport,
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("database", &self.config.database.name)
            .field("tables", &self.catalog.len())
            .field("acquirer", &self.acquirer)
            .finish()
    }
}

impl DatabaseManager {
    /// Initialize `config.database.name` for `registry` and open its pools.
    /// `migrations` for other databases are ignored.
    pub async fn open(
        config: Config,
        registry: RecordRegistry,
        migrations: Vec<MigrationDescriptor>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(registry);

        let (catalog, failures) = TemplateCatalog::build(&registry);
        for (table, e) in failures {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("Table {} will not be available: {}", table, e);
        }
        let catalog = Arc::new(catalog);

        let startup = match &config.superuser {
            Some(superuser) => {
                let descriptor = select_migration(&config, migrations)?;
                initialize(&config, superuser, &registry, &catalog, descriptor.as_ref()).await?
            }
            None => {
                info!(
                    "No superuser configured; using the existing schema of {}",
                    config.database.name
                );
                StartupReport::default()
            }
        };

        let pools = PooledSource::connect(&config).await?;
        let acquirer = Acquirer::new(Arc::new(pools));

        info!(
            "Database {} ready with {} tables",
            config.database.name,
            catalog.len()
        );
        Ok(Self {
            config,
            registry,
            catalog,
            acquirer,
            startup,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.database.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &RecordRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn startup_report(&self) -> &StartupReport {
        &self.startup
    }

    fn store(&self, privileged: bool) -> RecordStore {
        RecordStore::new(
            self.name(),
            self.acquirer.clone(),
            Arc::clone(&self.catalog),
            Arc::clone(&self.registry),
            privileged,
        )
    }

    /// Store running as the runtime user.
    pub fn user(&self) -> RecordStore {
        self.store(false)
    }

    /// Store running as the admin role.
    pub fn admin(&self) -> RecordStore {
        self.store(true)
    }

    /// Close the pools. Stores handed out earlier fail from now on.
    pub fn close(&self) {
        self.acquirer.close();
        info!("Closed database manager for {}", self.name());
    }
}

/// Combine every descriptor aimed at the configured database, when
/// migration is enabled.
fn select_migration(
    config: &Config,
    migrations: Vec<MigrationDescriptor>,
) -> Result<Option<MigrationDescriptor>> {
    if !config.sync.migrate {
        if !migrations.is_empty() {
            info!("Migration disabled; ignoring {} descriptors", migrations.len());
        }
        return Ok(None);
    }

    let (ours, others): (Vec<_>, Vec<_>) = migrations
        .into_iter()
        .partition(|m| m.current_db() == config.database.name);
    for other in &others {
        warn!(
            "Ignoring migration for {} while opening {}",
            other.current_db(),
            config.database.name
        );
    }
    if ours.is_empty() {
        warn!("Migration enabled but no descriptor targets {}", config.database.name);
        return Ok(None);
    }
    MigrationDescriptor::combine(ours).map(Some)
}

async fn bootstrap(config: &Config, dbname: &str, superuser: &Credentials) -> Result<Acquirer> {
    let source = BootstrapSource::connect(&config.database, dbname, superuser, None).await?;
    Ok(Acquirer::new(Arc::new(source)))
}

async fn initialize(
    config: &Config,
    superuser: &Credentials,
    registry: &Arc<RecordRegistry>,
    catalog: &Arc<TemplateCatalog>,
    migration: Option<&MigrationDescriptor>,
) -> Result<StartupReport> {
    let name = &config.database.name;
    let destructive = config.sync.destructive_columns;
    let engine = MigrationEngine::new(&config.admin.name, config.sync.row_count_mismatch);
    let mut report = StartupReport::default();

    let maintenance = bootstrap(config, &config.database.maintenance_db, superuser).await?;
    if let Some(descriptor) = migration {
        report.archived = engine.archive(&maintenance, descriptor).await?;
    }

    let cluster = SchemaSynchronizer::new(maintenance.clone(), destructive);
    cluster
        .ensure_role(&config.admin.name, &config.admin.password)
        .await?;
    cluster
        .ensure_role(&config.user.name, &config.user.password)
        .await?;
    match migration {
        Some(descriptor) => engine.recreate(&maintenance, descriptor).await?,
        None => {
            cluster.ensure_database(name, &config.admin.name).await?;
        }
    }
    maintenance.close();

    let live = bootstrap(config, name, superuser).await?;
    let schema = SchemaSynchronizer::new(live.clone(), destructive);
    let sync = schema.sync_tables(registry, catalog).await?;
    schema
        .grant_privileges(
            registry,
            &config.sync.default_privileges,
            &config.user.name,
            &config.admin.name,
        )
        .await?;
    report.sync = Some(sync);

    if let (Some(descriptor), true) = (migration, report.archived) {
        let archived = bootstrap(config, descriptor.archive_db(), superuser).await?;
        let from = RecordStore::new(
            descriptor.archive_db(),
            archived,
            Arc::clone(catalog),
            Arc::clone(registry),
            false,
        );
        let into = RecordStore::new(
            name.as_str(),
            live.clone(),
            Arc::clone(catalog),
            Arc::clone(registry),
            true,
        );
        report.moved = engine.run(&from, &into, descriptor).await?;
    }
    live.close();

    Ok(report)
}

/// Explicitly owned set of open managers, keyed by database name.
#[derive(Debug, Default)]
pub struct ManagerRegistry {
    managers: HashMap<String, DatabaseManager>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a manager for `config`, or return the one already open for the
    /// same database.
    pub async fn open(
        &mut self,
        config: Config,
        registry: RecordRegistry,
        migrations: Vec<MigrationDescriptor>,
    ) -> Result<&DatabaseManager> {
        let name = config.database.name.clone();
        if !self.managers.contains_key(&name) {
            let manager = DatabaseManager::open(config, registry, migrations).await?;
            self.managers.insert(name.clone(), manager);
        }
        self.get(&name)
            .ok_or_else(|| RecordStoreError::Config(format!("manager for {} vanished", name)))
    }

    /// Adopt a manager opened elsewhere. Fails when the name is taken.
    pub fn insert(&mut self, manager: DatabaseManager) -> Result<()> {
        let name = manager.name().to_string();
        if self.managers.contains_key(&name) {
            return Err(RecordStoreError::Config(format!(
                "a manager for {} is already open",
                name
            )));
        }
        self.managers.insert(name, manager);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DatabaseManager> {
        self.managers.get(name)
    }

    /// Close and forget the manager for `name`.
    pub fn close(&mut self, name: &str) -> Result<()> {
        let manager = self.managers.remove(name).ok_or_else(|| {
            RecordStoreError::Config(format!("no manager is open for {}", name))
        })?;
        manager.close();
        Ok(())
    }

    pub fn close_all(&mut self) {
        for (_, manager) in self.managers.drain() {
            manager.close();
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{Person, Visit};

    const YAML: &str = r#"
database:
  host: localhost
  name: shop
superuser:
  name: postgres
  password: postgres
admin:
  name: shop_admin
  password: admin-password
user:
  name: shop_user
  password: user-password
sync:
  migrate: true
"#;

    fn config() -> Config {
        Config::from_yaml(YAML).unwrap()
    }

    #[test]
    fn test_select_migration_combines_matching_descriptors() {
        let migrations = vec![
            MigrationDescriptor::new("shop_old", "shop")
                .table::<Person>("people")
                .unwrap(),
            MigrationDescriptor::new("other_old", "other")
                .table::<Person>("people")
                .unwrap(),
            MigrationDescriptor::new("shop_old", "shop")
                .table::<Visit>("visits")
                .unwrap(),
        ];
        let selected = select_migration(&config(), migrations).unwrap().unwrap();
        assert_eq!(selected.current_db(), "shop");
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_select_migration_disabled() {
        let mut config = config();
        config.sync.migrate = false;
        let migrations = vec![MigrationDescriptor::new("shop_old", "shop")];
        assert!(select_migration(&config, migrations).unwrap().is_none());
    }

    #[test]
    fn test_select_migration_duplicate_is_error() {
        let migrations = vec![
            MigrationDescriptor::new("shop_old", "shop")
                .table::<Person>("people")
                .unwrap(),
            MigrationDescriptor::new("shop_old", "shop")
                .table::<Visit>("people")
                .unwrap(),
        ];
        assert!(select_migration(&config(), migrations).is_err());
    }

    #[test]
    fn test_empty_manager_registry() {
        let mut managers = ManagerRegistry::new();
        assert!(managers.is_empty());
        assert!(managers.get("shop").is_none());
        assert!(managers.close("shop").is_err());
        managers.close_all();
        assert_eq!(managers.names().count(), 0);
    }
}
