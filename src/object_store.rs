//! The versioned object store handle.
//!
//! [`ObjectStore::open`] creates or upgrades the LMDB environment, and every
//! data operation runs inside [`ObjectStore::run_transaction`], which consults
//! the access gate first, commits when the body succeeds and discards every
//! write when it fails.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam::channel::Receiver;
use lmdb::{Environment, EnvironmentFlags};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::gate::{AccessGate, AlwaysOpen, SubscriptionGate};
use crate::key::{KeyRange, KeyValue};
use crate::migration;
use crate::models::Record;
use crate::notify::{LogNotifier, Notifier, Severity};
use crate::registry::{Registry, StoreEvent, SubscriberId};
use crate::schema::Schema;
use crate::transaction::{CollectionHandle, Transaction, TransactionMode};

pub const OPEN_FAILED_NOTICE: &str = "Database initialization failed. Please refresh the page.";

/// Environment state shared by every handle open on the same path and version.
pub(crate) struct Shared {
    name: String,
    path: PathBuf,
    version: u32,
    env: RwLock<Option<Environment>>,
    collections: HashMap<String, CollectionHandle>,
}

impl Shared {
    pub(crate) fn version(&self) -> u32 {
        self.version
    }

    /// Drops the environment once running transactions release it.
    pub(crate) fn invalidate(&self, new_version: u32) {
        let mut env = self.env.write();
        if env.take().is_some() {
            info!(
                "Closed '{}' v{} at {} for upgrade to v{}",
                self.name,
                self.version,
                self.path.display(),
                new_version
            );
        }
    }
}

/// Collaborators injected into a store handle.
#[derive(Clone)]
pub struct OpenOptions {
    notifier: Arc<dyn Notifier>,
    gate: Arc<dyn AccessGate>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            notifier: Arc::new(LogNotifier),
            gate: Arc::new(AlwaysOpen),
        }
    }
}

impl OpenOptions {
    /// Defaults plus a [`SubscriptionGate`] when the config carries a subscription.
    pub fn from_config(config: &StoreConfig) -> Self {
        let options = OpenOptions::default();
        match &config.subscription {
            Some(subscription) => options.gate(SubscriptionGate::new(subscription.clone())),
            None => options,
        }
    }

    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn shared_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn gate(mut self, gate: impl AccessGate + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }
}

pub struct ObjectStore {
    shared: Arc<Shared>,
    subscription: SubscriberId,
    events: Receiver<StoreEvent>,
    notifier: Arc<dyn Notifier>,
    gate: Arc<dyn AccessGate>,
}

impl ObjectStore {
    pub fn open(config: &StoreConfig, schema: Schema) -> Result<Self> {
        Self::open_with(config, schema, OpenOptions::from_config(config))
    }

    /// Opens (creating if absent) `<directory>/<schema name>.lmdb` and migrates it
    /// to `schema.version`.
    pub fn open_with(config: &StoreConfig, schema: Schema, options: OpenOptions) -> Result<Self> {
        let OpenOptions { notifier, gate } = options;
        if let Err(reason) = gate.check() {
            return Err(refuse(notifier.as_ref(), reason));
        }

        match open_shared(config, &schema, &notifier) {
            Ok((shared, (subscription, events))) => Ok(ObjectStore {
                shared,
                subscription,
                events,
                notifier,
                gate,
            }),
            Err(err) => {
                error!("Database error opening '{}': {}", schema.name, err);
                notifier.notify(OPEN_FAILED_NOTICE, Severity::Error);
                Err(err)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn version(&self) -> u32 {
        self.shared.version
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Collections that exist on disk, sorted by name.
    pub fn collection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.shared.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// True once a newer schema version has closed this handle.
    pub fn is_closed(&self) -> bool {
        self.shared.env.read().is_none()
    }

    /// Version-change signals for this handle.
    pub fn events(&self) -> &Receiver<StoreEvent> {
        &self.events
    }

    pub fn try_next_event(&self) -> Option<StoreEvent> {
        self.events.try_recv().ok()
    }

    /// Runs `body` as one atomic unit of work over `collections`.
    ///
    /// The gate is re-checked on every call. If `body` returns an error nothing it
    /// wrote is kept and the error is returned unchanged; engine failures surface
    /// as [`StoreError::TransactionFailed`]. If any operation inside `body` failed,
    /// the whole transaction is rolled back and rejected with
    /// [`StoreError::TransactionFailed`] even when `body` itself returns `Ok`.
    ///
    /// A body may start further read-only transactions on this handle. It must
    /// not open a store: an open that supersedes this version waits for the body
    /// to finish.
    pub fn run_transaction<T, F>(&self, collections: &[&str], mode: TransactionMode, body: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        if let Err(reason) = self.gate.check() {
            return Err(refuse(self.notifier.as_ref(), reason));
        }

        let result = self.transact(collections, mode, body);
        if let Err(err) = &result {
            error!("Transaction error on {:?} ({:?}): {}", collections, mode, err);
        }
        result
    }

    fn transact<T, F>(&self, collections: &[&str], mode: TransactionMode, body: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        if collections.is_empty() {
            return Err(StoreError::TransactionFailed(
                "a transaction needs at least one collection".to_string(),
            ));
        }
        if let Some(unknown) = collections
            .iter()
            .find(|name| !self.shared.collections.contains_key(**name))
        {
            return Err(StoreError::UnknownCollection(unknown.to_string()));
        }

        let guard = self.shared.env.read_recursive();
        let env = guard.as_ref().ok_or_else(|| {
            StoreError::Closed(format!(
                "'{}' v{} was superseded by a newer version; reopen it",
                self.shared.name, self.shared.version
            ))
        })?;

        let scope = collections.iter().map(|name| name.to_string()).collect();
        let mut tx = Transaction::begin(env, mode, scope, &self.shared.collections)?;
        match body(&mut tx) {
            Ok(value) => match tx.take_failure() {
                Some(reason) => {
                    debug!("Rolling back transaction on {:?} after a failed operation", collections);
                    tx.abort();
                    Err(StoreError::TransactionFailed(format!(
                        "an operation inside the transaction failed: {reason}"
                    )))
                }
                None => {
                    tx.commit()?;
                    Ok(value)
                }
            },
            Err(err) => {
                debug!("Rolling back transaction on {:?}", collections);
                tx.abort();
                Err(err)
            }
        }
    }

    /// Inserts `record`, returning its primary key.
    pub fn add(&self, collection: &str, record: JsonValue) -> Result<KeyValue> {
        self.run_transaction(&[collection], TransactionMode::ReadWrite, |tx| tx.add(collection, record))
    }

    pub fn get(&self, collection: &str, key: &KeyValue) -> Result<Option<JsonValue>> {
        self.run_transaction(&[collection], TransactionMode::ReadOnly, |tx| tx.get(collection, key))
    }

    pub fn get_all(&self, collection: &str, index: Option<&str>, range: Option<&KeyRange>) -> Result<Vec<JsonValue>> {
        self.run_transaction(&[collection], TransactionMode::ReadOnly, |tx| {
            tx.get_all(collection, index, range)
        })
    }

    /// Upsert: replaces the record with the same primary key, or inserts it.
    pub fn update(&self, collection: &str, record: JsonValue) -> Result<KeyValue> {
        self.run_transaction(&[collection], TransactionMode::ReadWrite, |tx| tx.put(collection, record))
    }

    pub fn delete(&self, collection: &str, key: &KeyValue) -> Result<()> {
        self.run_transaction(&[collection], TransactionMode::ReadWrite, |tx| tx.delete(collection, key))
    }

    pub fn clear(&self, collection: &str) -> Result<()> {
        self.run_transaction(&[collection], TransactionMode::ReadWrite, |tx| tx.clear(collection))
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        self.run_transaction(&[collection], TransactionMode::ReadOnly, |tx| tx.count(collection))
    }

    pub fn insert<R: Record>(&self, record: &R) -> Result<KeyValue> {
        self.run_transaction(&[R::COLLECTION], TransactionMode::ReadWrite, |tx| tx.insert(record))
    }

    pub fn save<R: Record>(&self, record: &R) -> Result<KeyValue> {
        self.run_transaction(&[R::COLLECTION], TransactionMode::ReadWrite, |tx| tx.save(record))
    }

    pub fn fetch<R: Record>(&self, key: &KeyValue) -> Result<Option<R>> {
        self.run_transaction(&[R::COLLECTION], TransactionMode::ReadOnly, |tx| tx.fetch(key))
    }

    pub fn fetch_all<R: Record>(&self, index: Option<&str>, range: Option<&KeyRange>) -> Result<Vec<R>> {
        self.run_transaction(&[R::COLLECTION], TransactionMode::ReadOnly, |tx| tx.fetch_all(index, range))
    }

    /// Releases this handle. The environment closes with its last handle.
    pub fn close(self) {
        debug!("Closing handle on '{}'", self.shared.name);
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        Registry::lock().unsubscribe(&self.shared.path, self.subscription);
    }
}

fn refuse(notifier: &dyn Notifier, reason: String) -> StoreError {
    warn!("Access blocked: {reason}");
    notifier.notify(&reason, Severity::Warning);
    StoreError::SubscriptionInvalid(reason)
}

fn open_shared(
    config: &StoreConfig,
    schema: &Schema,
    notifier: &Arc<dyn Notifier>,
) -> Result<(Arc<Shared>, (SubscriberId, Receiver<StoreEvent>))> {
    schema.validate()?;

    let dir = config.database_dir(&schema.name);
    std::fs::create_dir_all(&dir)
        .map_err(|e| StoreError::unavailable(&format!("cannot create {}", dir.display()), e))?;
    let path = dir
        .canonicalize()
        .map_err(|e| StoreError::unavailable(&format!("cannot resolve {}", dir.display()), e))?;

    let mut registry = Registry::lock();
    if let Some(shared) = registry.live(&path) {
        if shared.version == schema.version {
            debug!("Reusing open environment for '{}' v{}", schema.name, schema.version);
            let subscription = registry.subscribe(&path, Arc::clone(notifier));
            return Ok((shared, subscription));
        }
        if shared.version > schema.version {
            return Err(StoreError::StorageUnavailable(format!(
                "'{}' is already open at version {}, newer than the requested version {}",
                schema.name, shared.version, schema.version
            )));
        }
        registry.supersede(&path, schema.version);
    }

    let max_dbs = u32::try_from(schema.sub_database_count() * 2 + 8)
        .map_err(|_| StoreError::Config("schema declares too many collections".to_string()))?;
    let env = Environment::new()
        .set_flags(EnvironmentFlags::NO_TLS)
        .set_max_dbs(max_dbs)
        .set_max_readers(config.max_readers)
        .set_map_size(config.map_size)
        .open(&path)
        .map_err(|e| StoreError::unavailable(&format!("cannot open environment at {}", path.display()), e))?;

    let collections = migration::prepare(&env, schema)?;

    let shared = Arc::new(Shared {
        name: schema.name.clone(),
        path: path.clone(),
        version: schema.version,
        env: RwLock::new(Some(env)),
        collections,
    });
    registry.insert(path.clone(), &shared);
    let subscription = registry.subscribe(&path, Arc::clone(notifier));

    info!("✅ Opened '{}' v{} at {}", schema.name, schema.version, path.display());
    Ok((shared, subscription))
}
