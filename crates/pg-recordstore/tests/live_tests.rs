//! End-to-end tests against a running PostgreSQL server.
//!
//! Run with:
//! RECORDSTORE_TEST_CONFIG=recordstore-test.yaml cargo test -p pg-recordstore -- --ignored
//!
//! The config needs superuser credentials. Each test works in its own
//! database, which is dropped and recreated on every run.

mod common;

use std::time::Duration;

use common::{live_config, Book, LegacyBook, Shelf, Shelving};
use pg_recordstore::{
    Compound, Config, DatabaseManager, DynRecord, MigrationDescriptor, Page, RecordRegistry,
};

fn library_registry() -> RecordRegistry {
    let mut registry = RecordRegistry::new();
    registry.register::<Book>().unwrap();
    registry.register::<Shelf>().unwrap();
    registry
        .register_with_privileges::<Shelving>("SELECT, INSERT")
        .unwrap();
    registry
}

/// Open `database` with an empty archive migration so every run starts from
/// a fresh schema.
async fn open_fresh(database: &str) -> Option<DatabaseManager> {
    open_fresh_with(database, |_| {}).await
}

async fn open_fresh_with(
    database: &str,
    adjust: impl FnOnce(&mut Config),
) -> Option<DatabaseManager> {
    let mut config = live_config(database)?;
    config.sync.migrate = true;
    adjust(&mut config);
    let reset = MigrationDescriptor::new(format!("{}_archive", database), database);
    Some(
        DatabaseManager::open(config, library_registry(), vec![reset])
            .await
            .expect("failed to open database"),
    )
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_record_lifecycle() {
    let Some(manager) = open_fresh("recordstore_it_crud").await else {
        return;
    };
    let store = manager.admin();

    let mut dune = Book::new("Dune", 412);
    dune.authors = vec!["Frank Herbert".to_string()];
    let saved = store.add(&dune).await.unwrap().unwrap();
    let key = saved.key.unwrap();
    assert_eq!(saved.authors, dune.authors);

    let mut revised = saved.clone();
    revised.pages = 604;
    let updated = store.update(&revised).await.unwrap().unwrap();
    assert_eq!(updated.key, Some(key));
    assert_eq!(updated.pages, 604);

    let fetched = store.get_by_key::<Book>(key).await.unwrap().unwrap();
    assert_eq!(fetched, updated);

    // An empty author list is a value, so the probe must carry the stored one.
    let mut probe = Book::new("Dune", 604);
    assert!(store.find_match(&probe).await.unwrap().is_none());
    probe.authors = dune.authors.clone();
    let found = store.find_match(&probe).await.unwrap().unwrap();
    assert_eq!(found.key, Some(key));

    let by_columns = store
        .match_by_columns(&Book::new("Dune", 604), &["title", "pages"])
        .await
        .unwrap();
    assert_eq!(by_columns.len(), 1);
    assert_eq!(by_columns[0].key, Some(key));

    let deleted = store.delete_by_key::<Book>(key).await.unwrap().unwrap();
    assert_eq!(deleted.key, Some(key));
    assert!(store.get_by_key::<Book>(key).await.unwrap().is_none());
    assert!(store.delete_by_key::<Book>(key).await.unwrap().is_none());

    manager.close();
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_successive_adds_get_increasing_keys() {
    let Some(manager) = open_fresh("recordstore_it_keys").await else {
        return;
    };
    let store = manager.admin();

    let mut keys = Vec::new();
    for title in ["Kindred", "Dawn", "Kindred"] {
        let saved = store.add(&Book::new(title, 300)).await.unwrap().unwrap();
        keys.push(saved.key.unwrap());
    }
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", keys);

    manager.close();
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_cancelled_batch_leaves_connection_clean() {
    // One admin connection, so the write after the cancelled batch reuses it.
    let Some(manager) = open_fresh_with("recordstore_it_cancel", |config| {
        config.pools.admin_connections = 1;
    })
    .await
    else {
        return;
    };
    let store = manager.admin();

    let books: Vec<Book> = (0..20_000)
        .map(|i| Book::new(&format!("Bulk {}", i), i))
        .collect();
    let cancelled = tokio::time::timeout(Duration::from_millis(100), store.add_many(&books))
        .await
        .is_err();
    assert!(cancelled, "batch finished before the deadline");

    let after = store.add(&Book::new("after", 1)).await.unwrap().unwrap();

    // The user pool is a separate session: it must see the committed write
    // and nothing from the cancelled batch.
    let user = manager.user();
    let seen = user
        .match_by_columns(&Book::new("after", 1), &["title"])
        .await
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, after.key);
    assert_eq!(user.count("book").await.unwrap(), 1);

    manager.close();
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_batches_and_paging() {
    let Some(manager) = open_fresh("recordstore_it_batch").await else {
        return;
    };
    let store = manager.admin();

    let books: Vec<Book> = (1..=5).map(|i| Book::new(&format!("Vol {}", i), i * 100)).collect();
    let saved = store.add_many(&books).await.unwrap();
    assert_eq!(saved.len(), 5);
    assert_eq!(store.count("book").await.unwrap(), 5);

    let page: Vec<Book> = store
        .get_all(&Page::Ordered {
            limit: 2,
            start: 1,
            column: "pages".to_string(),
            descending: true,
        })
        .await
        .unwrap();
    let titles: Vec<&str> = page.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["Vol 4", "Vol 3"]);

    let bad_order: Vec<Book> = store
        .get_all(&Page::Ordered {
            limit: 2,
            start: 0,
            column: "pages; DROP TABLE book".to_string(),
            descending: false,
        })
        .await
        .unwrap_or_default();
    assert!(bad_order.is_empty());
    assert_eq!(store.count("book").await.unwrap(), 5);

    let keys: Vec<i64> = saved.iter().filter_map(|b| b.key).collect();
    let gone = store.delete_by_keys::<Book>(&keys[..3]).await.unwrap();
    assert_eq!(gone.len(), 3);
    assert_eq!(store.get_by_keys::<Book>(&keys).await.unwrap().len(), 2);

    // The user role only holds SELECT on book.
    let user = manager.user();
    assert_eq!(user.get_all::<Book>(&Page::All).await.unwrap().len(), 2);
    assert!(user.add(&Book::new("Denied", 1)).await.unwrap().is_none());

    manager.close();
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_compound_records() {
    let Some(manager) = open_fresh("recordstore_it_compound").await else {
        return;
    };
    let store = manager.admin();

    let compound = Compound::new(
        Shelving::default(),
        Box::new(Shelf {
            key: None,
            label: "Fiction".to_string(),
        }),
        vec![
            Box::new(Book::new("Emma", 474)) as Box<dyn DynRecord>,
            Box::new(Book::new("Persuasion", 249)),
        ],
    );

    let saved = store.save_compound(&compound).await.unwrap().unwrap();
    let key = saved.junction.key.unwrap();
    assert_eq!(saved.junction.child_keys.len(), 2);
    assert_eq!(saved.parent_as::<Shelf>().unwrap().label, "Fiction");

    // Saving the same content again reuses the stored junction.
    let again = store.save_compound(&saved).await.unwrap().unwrap();
    assert_eq!(again.junction.key, Some(key));
    assert_eq!(store.count("shelving").await.unwrap(), 1);

    let loaded = store
        .get_compound_by_key::<Shelving>(key)
        .await
        .unwrap()
        .unwrap();
    let titles: Vec<&str> = loaded
        .children_of::<Book>()
        .iter()
        .map(|b| b.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Emma", "Persuasion"]);

    manager.close();
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_migration_moves_renamed_rows() {
    let database = "recordstore_it_migrate";
    let Some(config) = live_config(database) else {
        return;
    };

    // First generation: legacy layout, reset from an empty archive.
    let mut first = config.clone();
    first.sync.migrate = true;
    let mut legacy = RecordRegistry::new();
    legacy.register::<LegacyBook>().unwrap();
    let reset = MigrationDescriptor::new(format!("{}_archive", database), database);
    let manager = DatabaseManager::open(first, legacy, vec![reset]).await.unwrap();
    let rows = ["Ulysses", "Ulysses", "Middlemarch"].map(|title| LegacyBook {
        key: None,
        book_title: title.to_string(),
        pages: 700,
    });
    assert_eq!(manager.admin().add_many(&rows).await.unwrap().len(), 3);
    manager.close();

    // Second generation: archive and move legacy_book into book.
    let mut second = config;
    second.sync.migrate = true;
    let mut registry = RecordRegistry::new();
    registry.register::<Book>().unwrap();
    let descriptor = MigrationDescriptor::new(format!("{}_archive", database), database)
        .table::<Book>("legacy_book")
        .unwrap();
    let manager = DatabaseManager::open(second, registry, vec![descriptor])
        .await
        .unwrap();

    let report = &manager.startup_report().moved[0];
    assert_eq!(report.read, 3);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.inserted, 2);
    assert!(report.verified);

    let mut titles: Vec<String> = manager
        .user()
        .get_all::<Book>(&Page::All)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Middlemarch", "Ulysses"]);

    manager.close();
}
