//! # Database Registry
//!
//! Maps database names to open store handles.
//!
//! Databases are opened lazily on first access. Opening is single-flight
//! per name: every name owns a [`OnceCell`], so concurrent first
//! resolutions share one store open and observe the same handle.
//!
//! Destroyed names are announced on a broadcast channel so that holders of
//! a handle, such as continuous replications, can let go of it.

mod errors;

pub use errors::{RegistryError, RegistryResult};

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use regex::Regex;
use tokio::sync::{broadcast, OnceCell};
use tracing::info;

use crate::store::{Database, DocumentStore};

const DB_NAME_PATTERN: &str = r"^[a-z][a-z0-9_$()+/-]*$";

/// Destroy notices buffered for slow listeners
const DESTROYED_CAPACITY: usize = 64;

static DB_NAME: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Reject names the CouchDB protocol does not allow
pub fn validate_name(name: &str) -> RegistryResult<()> {
    let pattern = DB_NAME
        .get_or_init(|| Regex::new(DB_NAME_PATTERN))
        .as_ref()
        .map_err(|e| RegistryError::Internal(e.to_string()))?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(RegistryError::IllegalName(name.to_string()))
    }
}

/// A registered, open database
#[derive(Clone)]
pub struct DatabaseHandle {
    name: String,
    db: Arc<dyn Database>,
    validation_installed: bool,
}

impl DatabaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn validation_installed(&self) -> bool {
        self.validation_installed
    }

    /// True when both handles wrap the same store instance
    pub fn same_as(&self, other: &DatabaseHandle) -> bool {
        Arc::ptr_eq(&self.db, &other.db)
    }
}

impl Deref for DatabaseHandle {
    type Target = dyn Database;

    fn deref(&self) -> &Self::Target {
        self.db.as_ref()
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .field("validation_installed", &self.validation_installed)
            .finish()
    }
}

type Slot = Arc<OnceCell<DatabaseHandle>>;

/// Name to handle mapping over a document store
pub struct DatabaseRegistry {
    store: Arc<dyn DocumentStore>,
    slots: Mutex<HashMap<String, Slot>>,
    destroyed: broadcast::Sender<String>,
}

impl DatabaseRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (destroyed, _) = broadcast::channel(DESTROYED_CAPACITY);
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
            destroyed,
        }
    }

    /// Names of databases destroyed after this call
    pub fn watch_destroyed(&self) -> broadcast::Receiver<String> {
        self.destroyed.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn slots(&self) -> RegistryResult<MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| RegistryError::Internal("Lock poisoned".into()))
    }

    fn slot(&self, name: &str) -> RegistryResult<Slot> {
        Ok(self
            .slots()?
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone())
    }

    /// Handle for `name` if it is already registered
    pub fn cached(&self, name: &str) -> RegistryResult<Option<DatabaseHandle>> {
        Ok(self
            .slots()?
            .get(name)
            .and_then(|slot| slot.get().cloned()))
    }

    async fn in_catalog(&self, name: &str) -> RegistryResult<bool> {
        Ok(self.store.all_dbs().await?.iter().any(|n| n == name))
    }

    /// Return the handle for `name`, opening it on first access
    pub async fn resolve(&self, name: &str) -> RegistryResult<DatabaseHandle> {
        if let Some(handle) = self.cached(name)? {
            return Ok(handle);
        }
        if !self.in_catalog(name).await? {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        let (handle, _) = self.open_once(name).await?;
        Ok(handle)
    }

    /// Create and register a new database
    pub async fn create(&self, name: &str) -> RegistryResult<DatabaseHandle> {
        validate_name(name)?;
        if self.cached(name)?.is_some() || self.in_catalog(name).await? {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        let (handle, opened) = self.open_once(name).await?;
        if !opened {
            // a concurrent create won
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        info!(db = name, "Created database");
        Ok(handle)
    }

    /// Delete a database from the store and drop its entry
    pub async fn destroy(&self, name: &str) -> RegistryResult<()> {
        self.store.destroy(name).await?;
        self.slots()?.remove(name);
        // nobody listening is fine
        let _ = self.destroyed.send(name.to_string());
        info!(db = name, "Destroyed database");
        Ok(())
    }

    /// Every database in the store catalog, registered or not
    pub async fn list_all(&self) -> RegistryResult<Vec<String>> {
        Ok(self.store.all_dbs().await?)
    }

    /// Names currently held open by the registry
    pub fn registered_names(&self) -> RegistryResult<Vec<String>> {
        let mut names: Vec<String> = self
            .slots()?
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Open `name` exactly once; the flag tells whether this call opened it
    async fn open_once(&self, name: &str) -> RegistryResult<(DatabaseHandle, bool)> {
        let slot = self.slot(name)?;
        let mut opened = false;
        let flag = &mut opened;
        let result = slot
            .get_or_try_init(|| async move {
                *flag = true;
                self.open_store(name).await
            })
            .await
            .cloned();

        match result {
            Ok(handle) => Ok((handle, opened)),
            Err(err) => {
                let mut slots = self.slots()?;
                if slots.get(name).is_some_and(|s| !s.initialized()) {
                    slots.remove(name);
                }
                Err(err)
            }
        }
    }

    async fn open_store(&self, name: &str) -> RegistryResult<DatabaseHandle> {
        let open_failed = |source| RegistryError::OpenFailed {
            name: name.to_string(),
            source,
        };
        let db = self.store.open(name).await.map_err(open_failed)?;
        db.install_validation().await.map_err(open_failed)?;
        info!(db = name, "Registered database");
        Ok(DatabaseHandle {
            name: name.to_string(),
            db,
            validation_installed: true,
        })
    }
}

impl fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Memory store whose opens take a while
    struct SlowStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn all_dbs(&self) -> StoreResult<Vec<String>> {
            self.inner.all_dbs().await
        }

        async fn open(&self, name: &str) -> StoreResult<Arc<dyn Database>> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.open(name).await
        }

        async fn destroy(&self, name: &str) -> StoreResult<()> {
            self.inner.destroy(name).await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn all_dbs(&self) -> StoreResult<Vec<String>> {
            Ok(vec![])
        }

        async fn open(&self, _name: &str) -> StoreResult<Arc<dyn Database>> {
            Err(StoreError::internal("disk full"))
        }

        async fn destroy(&self, _name: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    fn registry() -> (Arc<MemoryStore>, DatabaseRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = DatabaseRegistry::new(store.clone());
        (store, registry)
    }

    #[tokio::test]
    async fn test_create_then_resolve_reuses_handle() {
        let (store, registry) = registry();
        let created = registry.create("db1").await.unwrap();
        let resolved = registry.resolve("db1").await.unwrap();
        assert!(created.same_as(&resolved));
        assert!(resolved.validation_installed());
        assert_eq!(store.open_count("db1"), 1);
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let (_, registry) = registry();
        registry.create("db1").await.unwrap();
        let err = registry.create("db1").await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
        assert_eq!(registry.registered_names().unwrap(), vec!["db1"]);
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let (_, registry) = registry();
        let err = registry.resolve("ghost").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(registry.registered_names().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_resolve_opens_once() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
        });
        store.inner.open("shared").await.unwrap();
        let registry = DatabaseRegistry::new(store.clone());

        let handles = futures_util::future::join_all((0..8).map(|_| registry.resolve("shared"))).await;
        let handles: Vec<DatabaseHandle> = handles.into_iter().map(Result::unwrap).collect();

        // one open to seed the catalog, one through the registry
        assert_eq!(store.inner.open_count("shared"), 2);
        assert!(handles.iter().all(|h| h.same_as(&handles[0])));
    }

    #[tokio::test]
    async fn test_concurrent_create_has_one_winner() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
        });
        let registry = DatabaseRegistry::new(store.clone());
        let (a, b) = tokio::join!(registry.create("race"), registry.create("race"));
        assert!(a.is_ok() != b.is_ok());
        assert_eq!(store.inner.open_count("race"), 1);
    }

    #[tokio::test]
    async fn test_list_all_includes_unresolved() {
        let (store, registry) = registry();
        store.open("elsewhere").await.unwrap();
        assert_eq!(registry.list_all().await.unwrap(), vec!["elsewhere"]);
        assert!(registry.registered_names().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_entry() {
        let (_, registry) = registry();
        registry.create("gone").await.unwrap();
        registry.destroy("gone").await.unwrap();
        assert!(registry.registered_names().unwrap().is_empty());
        assert!(registry.resolve("gone").await.is_err());
        assert_eq!(registry.destroy("gone").await.unwrap_err().status_code(), 404);
    }

    #[tokio::test]
    async fn test_destroy_is_announced() {
        let (_, registry) = registry();
        registry.create("gone").await.unwrap();
        let mut destroyed = registry.watch_destroyed();

        assert!(registry.destroy("ghost").await.is_err());
        registry.destroy("gone").await.unwrap();
        assert_eq!(destroyed.recv().await.unwrap(), "gone");
        assert!(destroyed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_failure_is_precondition_failed() {
        let registry = DatabaseRegistry::new(Arc::new(BrokenStore));
        let err = registry.create("db").await.unwrap_err();
        assert_eq!(err.status_code(), 412);
        assert!(registry.registered_names().unwrap().is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("db1").is_ok());
        assert!(validate_name("a/b_c$(d)+e-f").is_ok());
        assert!(validate_name("Upper").is_err());
        assert!(validate_name("1db").is_err());
        assert!(validate_name("").is_err());
    }
}
