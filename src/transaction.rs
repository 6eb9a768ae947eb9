//! Transaction-scoped access to collections.
//!
//! Every record write keeps the collection's secondary indexes in step with the
//! record itself. Constraint checks (primary key, unique indexes) run before any
//! byte is written. The first operation that fails marks the transaction, and a
//! marked transaction is rolled back as a whole even if the body carries on and
//! returns `Ok`.

use std::cell::RefCell;
use std::collections::HashMap;

use lmdb::{
    Cursor, Database, Environment, RoTransaction, RwTransaction, Transaction as LmdbTransaction,
    WriteFlags,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError};
use crate::key::{KeyRange, KeyValue};
use crate::models::Record;
use crate::schema::{CollectionSchema, IndexSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

pub(crate) struct IndexHandle {
    pub schema: IndexSchema,
    pub db: Database,
}

/// How a stored key relates to the key a range is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyLayout {
    /// The stored key is the logical key.
    Plain,
    /// The stored key is the logical key followed by the entry's value.
    ValueSuffixed,
}

impl IndexHandle {
    /// Unique indexes are keyed by the index key alone. Other indexes append the
    /// primary key, so each entry is distinct and ties sort by primary key.
    pub(crate) fn entry_key(&self, index_key: &KeyValue, primary: &[u8]) -> Vec<u8> {
        let mut key = index_key.encode();
        if !self.schema.unique {
            key.extend_from_slice(primary);
        }
        key
    }

    pub(crate) fn layout(&self) -> KeyLayout {
        if self.schema.unique {
            KeyLayout::Plain
        } else {
            KeyLayout::ValueSuffixed
        }
    }
}

/// An opened collection: its declaration plus the LMDB handles that exist on disk.
pub(crate) struct CollectionHandle {
    pub schema: CollectionSchema,
    pub db: Database,
    pub indexes: Vec<IndexHandle>,
}

impl CollectionHandle {
    fn index(&self, name: &str) -> Result<&IndexHandle> {
        self.indexes
            .iter()
            .find(|index| index.schema.name == name)
            .ok_or_else(|| StoreError::UnknownIndex {
                collection: self.schema.name.clone(),
                index: name.to_string(),
            })
    }

    /// Index keys the record contributes; unindexable values are skipped.
    fn index_entries<'h>(&'h self, record: &JsonValue) -> Vec<(&'h IndexHandle, KeyValue)> {
        self.indexes
            .iter()
            .filter_map(|index| index.schema.key_path.extract(record).map(|key| (index, key)))
            .collect()
    }
}

enum Txn<'env> {
    Read(RoTransaction<'env>),
    Write(RwTransaction<'env>),
}

/// Accessor handed to a transaction body.
pub struct Transaction<'env> {
    txn: Txn<'env>,
    scope: Vec<String>,
    collections: &'env HashMap<String, CollectionHandle>,
    failure: RefCell<Option<String>>,
}

impl<'env> Transaction<'env> {
    pub(crate) fn begin(
        env: &'env Environment,
        mode: TransactionMode,
        scope: Vec<String>,
        collections: &'env HashMap<String, CollectionHandle>,
    ) -> Result<Self> {
        let txn = match mode {
            TransactionMode::ReadOnly => Txn::Read(env.begin_ro_txn()?),
            TransactionMode::ReadWrite => Txn::Write(env.begin_rw_txn()?),
        };
        Ok(Transaction {
            txn,
            scope,
            collections,
            failure: RefCell::new(None),
        })
    }

    pub fn mode(&self) -> TransactionMode {
        match self.txn {
            Txn::Read(_) => TransactionMode::ReadOnly,
            Txn::Write(_) => TransactionMode::ReadWrite,
        }
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// Inserts a record; fails with [`StoreError::DuplicateKey`] if its primary key is taken.
    pub fn add(&mut self, collection: &str, record: JsonValue) -> Result<KeyValue> {
        let result = self.write_record(collection, record, false);
        self.track(result)
    }

    /// Inserts or replaces the record stored under the same primary key.
    pub fn put(&mut self, collection: &str, record: JsonValue) -> Result<KeyValue> {
        let result = self.write_record(collection, record, true);
        self.track(result)
    }

    pub fn get(&self, collection: &str, key: &KeyValue) -> Result<Option<JsonValue>> {
        self.track(self.read_record(collection, key))
    }

    /// All records in primary key order, or in index order when `index` is given.
    /// The range applies to whichever key orders the result.
    pub fn get_all(
        &self,
        collection: &str,
        index: Option<&str>,
        range: Option<&KeyRange>,
    ) -> Result<Vec<JsonValue>> {
        self.track(self.read_records(collection, index, range))
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let result = self
            .collection(collection)
            .and_then(|handle| self.scan(handle.db, None, KeyLayout::Plain))
            .map(|rows| rows.len());
        self.track(result)
    }

    /// Removes the record if present. Absent keys are not an error.
    pub fn delete(&mut self, collection: &str, key: &KeyValue) -> Result<()> {
        let result = self.delete_record(collection, key);
        self.track(result)
    }

    pub fn clear(&mut self, collection: &str) -> Result<()> {
        let result = self.clear_collection(collection);
        self.track(result)
    }

    pub fn insert<R: Record>(&mut self, record: &R) -> Result<KeyValue> {
        let value = self.track(serde_json::to_value(record).map_err(StoreError::from))?;
        self.add(R::COLLECTION, value)
    }

    pub fn save<R: Record>(&mut self, record: &R) -> Result<KeyValue> {
        let value = self.track(serde_json::to_value(record).map_err(StoreError::from))?;
        self.put(R::COLLECTION, value)
    }

    pub fn fetch<R: Record>(&self, key: &KeyValue) -> Result<Option<R>> {
        let result = match self.get(R::COLLECTION, key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(StoreError::from),
            None => Ok(None),
        };
        self.track(result)
    }

    pub fn fetch_all<R: Record>(&self, index: Option<&str>, range: Option<&KeyRange>) -> Result<Vec<R>> {
        let result = self
            .get_all(R::COLLECTION, index, range)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect();
        self.track(result)
    }

    /// Message of the first operation that failed, if any.
    pub(crate) fn take_failure(&self) -> Option<String> {
        self.failure.borrow_mut().take()
    }

    pub(crate) fn commit(self) -> Result<()> {
        match self.txn {
            Txn::Read(txn) => txn.commit()?,
            Txn::Write(txn) => txn.commit()?,
        }
        Ok(())
    }

    pub(crate) fn abort(self) {
        match self.txn {
            Txn::Read(txn) => txn.abort(),
            Txn::Write(txn) => txn.abort(),
        }
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let mut failure = self.failure.borrow_mut();
            if failure.is_none() {
                *failure = Some(err.to_string());
            }
        }
        result
    }

    fn read_record(&self, collection: &str, key: &KeyValue) -> Result<Option<JsonValue>> {
        let handle = self.collection(collection)?;
        self.read_raw(handle.db, &key.encode())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn read_records(
        &self,
        collection: &str,
        index: Option<&str>,
        range: Option<&KeyRange>,
    ) -> Result<Vec<JsonValue>> {
        let handle = self.collection(collection)?;
        match index {
            None => self
                .scan(handle.db, range, KeyLayout::Plain)?
                .into_iter()
                .map(|(_, bytes)| decode(&bytes))
                .collect(),
            Some(name) => {
                let index = handle.index(name)?;
                let mut records = Vec::new();
                for (_, primary) in self.scan(index.db, range, index.layout())? {
                    let bytes = self.read_raw(handle.db, &primary)?.ok_or_else(|| {
                        StoreError::TransactionFailed(format!(
                            "index '{}' on '{}' points at a missing record",
                            index.schema.name, collection
                        ))
                    })?;
                    records.push(decode(&bytes)?);
                }
                Ok(records)
            }
        }
    }

    fn delete_record(&mut self, collection: &str, key: &KeyValue) -> Result<()> {
        let handle = self.collection(collection)?;
        self.writer()?;
        let primary = key.encode();
        let Some(bytes) = self.read_raw(handle.db, &primary)? else {
            return Ok(());
        };
        let previous = decode(&bytes)?;

        let txn = self.writer()?;
        remove_index_entries(txn, handle, &previous, &primary)?;
        txn.del(handle.db, &primary, None)?;
        Ok(())
    }

    fn clear_collection(&mut self, collection: &str) -> Result<()> {
        let handle = self.collection(collection)?;
        let txn = self.writer()?;
        txn.clear_db(handle.db)?;
        for index in &handle.indexes {
            txn.clear_db(index.db)?;
        }
        Ok(())
    }

    fn write_record(&mut self, collection: &str, record: JsonValue, overwrite: bool) -> Result<KeyValue> {
        let handle = self.collection(collection)?;
        self.writer()?;
        let key = handle.schema.validate_record(&record)?;
        let primary = key.encode();

        let previous = match self.read_raw(handle.db, &primary)? {
            Some(_) if !overwrite => {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    key: key.to_string(),
                })
            }
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };

        let entries = handle.index_entries(&record);
        for (index, index_key) in entries.iter().filter(|(index, _)| index.schema.unique) {
            if let Some(owner) = self.read_raw(index.db, &index_key.encode())? {
                if owner != primary {
                    return Err(StoreError::UniqueViolation {
                        collection: collection.to_string(),
                        index: index.schema.name.clone(),
                        key: index_key.to_string(),
                    });
                }
            }
        }

        let bytes = serde_json::to_vec(&record)?;
        let txn = self.writer()?;
        if let Some(previous) = &previous {
            remove_index_entries(txn, handle, previous, &primary)?;
        }
        txn.put(handle.db, &primary, &bytes, WriteFlags::empty())?;
        for (index, index_key) in entries {
            txn.put(index.db, &index.entry_key(&index_key, &primary), &primary, WriteFlags::empty())?;
        }
        Ok(key)
    }

    fn collection(&self, name: &str) -> Result<&'env CollectionHandle> {
        if !self.scope.iter().any(|c| c == name) {
            return Err(StoreError::OutOfScope(name.to_string()));
        }
        self.collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    fn writer(&mut self) -> Result<&mut RwTransaction<'env>> {
        match &mut self.txn {
            Txn::Write(txn) => Ok(txn),
            Txn::Read(_) => Err(StoreError::ReadOnly),
        }
    }

    fn read_raw(&self, db: Database, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let found = match &self.txn {
            Txn::Read(txn) => txn.get(db, &key).map(<[u8]>::to_vec),
            Txn::Write(txn) => txn.get(db, &key).map(<[u8]>::to_vec),
        };
        match found {
            Ok(bytes) => Ok(Some(bytes)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self, db: Database, range: Option<&KeyRange>, layout: KeyLayout) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match &self.txn {
            Txn::Read(txn) => scan(txn, db, range, layout),
            Txn::Write(txn) => scan(txn, db, range, layout),
        }
    }
}

fn decode(bytes: &[u8]) -> Result<JsonValue> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Copies out every key/value pair of `db` in key order, restricted to `range`.
pub(crate) fn scan<T: LmdbTransaction>(
    txn: &T,
    db: Database,
    range: Option<&KeyRange>,
    layout: KeyLayout,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut cursor = txn.open_ro_cursor(db)?;
    let mut rows = Vec::new();
    // a fresh cursor steps onto the first entry and stops cleanly on an empty database
    for (key, value) in cursor.iter() {
        if let Some(range) = range {
            let logical = match layout {
                KeyLayout::Plain => key,
                KeyLayout::ValueSuffixed => &key[..key.len().saturating_sub(value.len())],
            };
            if range.is_below(logical) {
                continue;
            }
            if range.is_above(logical) {
                break;
            }
        }
        rows.push((key.to_vec(), value.to_vec()));
    }
    Ok(rows)
}

fn remove_index_entries(
    txn: &mut RwTransaction<'_>,
    handle: &CollectionHandle,
    record: &JsonValue,
    primary: &[u8],
) -> Result<()> {
    for (index, index_key) in handle.index_entries(record) {
        match txn.del(index.db, &index.entry_key(&index_key, primary), None) {
            Ok(()) => {}
            Err(lmdb::Error::NotFound) => {
                return Err(StoreError::TransactionFailed(format!(
                    "index '{}' on '{}' has no entry for key {index_key}",
                    index.schema.name, handle.schema.name
                )))
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
