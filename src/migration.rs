//! Schema versioning.
//!
//! The reserved `__meta` sub-database stores the schema version plus one marker
//! per collection and per index that has been created. Moving to a higher
//! version is additive: missing collections and indexes are created, and an
//! index added to an existing collection is back-filled from its records.
//! Nothing is ever dropped or rewritten.

use std::collections::{HashMap, HashSet};

use lmdb::{Database, DatabaseFlags, Environment, RwTransaction, Transaction as LmdbTransaction, WriteFlags};
use log::{info, warn};
use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError};
use crate::schema::{Schema, INDEX_SEPARATOR};
use crate::transaction::{scan, CollectionHandle, IndexHandle, KeyLayout};

pub(crate) const META_DB: &str = "__meta";
const VERSION_KEY: &[u8] = b"version";

fn collection_marker(collection: &str) -> Vec<u8> {
    format!("collection:{collection}").into_bytes()
}

fn index_marker(collection: &str, index: &str) -> Vec<u8> {
    format!("index:{collection}{INDEX_SEPARATOR}{index}").into_bytes()
}

/// Brings the environment up to `schema.version` and opens every declared
/// collection that exists on disk.
pub(crate) fn prepare(env: &Environment, schema: &Schema) -> Result<HashMap<String, CollectionHandle>> {
    let meta = env
        .create_db(Some(META_DB), DatabaseFlags::empty())
        .map_err(|e| StoreError::unavailable("cannot open schema metadata", e))?;

    let stored = stored_version(env, meta)?;
    if stored > schema.version {
        return Err(StoreError::StorageUnavailable(format!(
            "'{}' is at version {stored}, newer than the requested version {}",
            schema.name, schema.version
        )));
    }
    if stored < schema.version {
        migrate(env, meta, schema, stored).map_err(|e| StoreError::unavailable("migration failed", e))?;
    }

    open_collections(env, meta, schema)
}

pub(crate) fn stored_version(env: &Environment, meta: Database) -> Result<u32> {
    let txn = env
        .begin_ro_txn()
        .map_err(|e| StoreError::unavailable("cannot read schema version", e))?;
    let version = match txn.get(meta, &VERSION_KEY) {
        Ok(bytes) => {
            let raw: [u8; 4] = bytes.try_into().map_err(|_| {
                StoreError::StorageUnavailable("stored schema version is corrupted".to_string())
            })?;
            u32::from_be_bytes(raw)
        }
        Err(lmdb::Error::NotFound) => 0,
        Err(e) => return Err(StoreError::unavailable("cannot read schema version", e)),
    };
    txn.abort();
    Ok(version)
}

fn read_markers(env: &Environment, meta: Database) -> Result<HashSet<Vec<u8>>> {
    let txn = env.begin_ro_txn()?;
    let markers = scan(&txn, meta, None, KeyLayout::Plain)?
        .into_iter()
        .map(|(key, _)| key)
        .filter(|key| key.as_slice() != VERSION_KEY)
        .collect();
    txn.abort();
    Ok(markers)
}

fn migrate(env: &Environment, meta: Database, schema: &Schema, from: u32) -> Result<()> {
    info!("Upgrading '{}' from version {} to {}", schema.name, from, schema.version);

    let present = read_markers(env, meta)?;
    let mut created = Vec::new();
    let mut backfills = Vec::new();

    for collection in &schema.collections {
        let marker = collection_marker(&collection.name);
        let existed = present.contains(&marker);
        let db = env.create_db(Some(collection.name.as_str()), DatabaseFlags::empty())?;
        if !existed {
            info!("Creating collection '{}'", collection.name);
            created.push(marker);
        }

        for index in &collection.indexes {
            let marker = index_marker(&collection.name, &index.name);
            if present.contains(&marker) {
                continue;
            }
            let index_db = env.create_db(Some(index.db_name(&collection.name).as_str()), DatabaseFlags::empty())?;
            info!("Creating index '{}' on '{}'", index.name, collection.name);
            created.push(marker);
            if existed {
                backfills.push((
                    collection.name.as_str(),
                    db,
                    IndexHandle {
                        schema: index.clone(),
                        db: index_db,
                    },
                ));
            }
        }
    }

    let mut txn = env.begin_rw_txn()?;
    for (collection, db, index) in &backfills {
        backfill(&mut txn, collection, *db, index)?;
    }
    for marker in &created {
        txn.put(meta, marker, b"1", WriteFlags::empty())?;
    }
    txn.put(meta, &VERSION_KEY, &schema.version.to_be_bytes(), WriteFlags::empty())?;
    txn.commit()?;
    Ok(())
}

fn backfill(txn: &mut RwTransaction<'_>, collection: &str, db: Database, index: &IndexHandle) -> Result<()> {
    let rows = scan(&*txn, db, None, KeyLayout::Plain)?;
    info!(
        "Back-filling index '{}' on '{}' from {} records",
        index.schema.name,
        collection,
        rows.len()
    );
    for (primary, bytes) in rows {
        let record: JsonValue = serde_json::from_slice(&bytes)?;
        let Some(key) = index.schema.key_path.extract(&record) else {
            continue;
        };
        let flags = if index.schema.unique {
            WriteFlags::NO_OVERWRITE
        } else {
            WriteFlags::empty()
        };
        match txn.put(index.db, &index.entry_key(&key, &primary), &primary, flags) {
            Ok(()) => {}
            Err(lmdb::Error::KeyExist) => {
                return Err(StoreError::UniqueViolation {
                    collection: collection.to_string(),
                    index: index.schema.name.clone(),
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn open_collections(env: &Environment, meta: Database, schema: &Schema) -> Result<HashMap<String, CollectionHandle>> {
    let markers = read_markers(env, meta)?;
    let mut handles = HashMap::new();

    for collection in &schema.collections {
        if !markers.contains(&collection_marker(&collection.name)) {
            warn!(
                "Collection '{}' is declared but absent at version {}; bump the version to create it",
                collection.name, schema.version
            );
            continue;
        }
        let db = env
            .open_db(Some(collection.name.as_str()))
            .map_err(|e| StoreError::unavailable(&format!("cannot open collection '{}'", collection.name), e))?;

        let mut indexes = Vec::new();
        for index in &collection.indexes {
            if !markers.contains(&index_marker(&collection.name, &index.name)) {
                warn!("Index '{}' on '{}' is declared but absent", index.name, collection.name);
                continue;
            }
            let index_db = env
                .open_db(Some(index.db_name(&collection.name).as_str()))
                .map_err(|e| StoreError::unavailable(&format!("cannot open index '{}'", index.name), e))?;
            indexes.push(IndexHandle {
                schema: index.clone(),
                db: index_db,
            });
        }

        handles.insert(
            collection.name.clone(),
            CollectionHandle {
                schema: collection.clone(),
                db,
                indexes,
            },
        );
    }

    Ok(handles)
}
