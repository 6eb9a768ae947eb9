//! # Business Manager DB
//!
//! A local object store for offline business-management apps, built on LMDB
//! (Lightning Memory-Mapped Database). A versioned [`Schema`] declares named
//! collections of JSON records, each with a primary key field and optional
//! secondary indexes; the store creates them on first open and adds new ones
//! when the schema version goes up.
//!
//! ## Features
//!
//! - **Versioned schema**: additive migrations, index back-fill, newer-version handoff
//! - **Atomic transactions**: one or more collections per unit of work, read-only or read-write
//! - **Secondary indexes**: unique and non-unique, single-field or compound, with key ranges
//! - **Typed records**: [`models`] structs for every business collection
//! - **Access gate**: an injectable subscription check consulted before every call
//! - **FFI surface**: JSON-in/JSON-out `extern "C"` functions for host applications
//!
//! ## Quick Start
//!
//! ```no_run
//! use business_manager_db::{business_schema, KeyValue, ObjectStore, StoreConfig, TransactionMode};
//! use serde_json::json;
//!
//! let store = ObjectStore::open(&StoreConfig::in_directory("data"), business_schema())?;
//! store.add("products", json!({"id": "p1", "name": "Rice", "stock": 40, "lowStockThreshold": 5}))?;
//!
//! store.run_transaction(&["orders", "products"], TransactionMode::ReadWrite, |tx| {
//!     tx.add("orders", json!({"id": "o1", "productId": "p1", "quantity": 2, "status": "pending",
//!                             "date": "2026-03-01", "isBulkOrder": false}))?;
//!     if let Some(mut product) = tx.get("products", &KeyValue::from("p1"))? {
//!         product["stock"] = json!(38);
//!         tx.put("products", product)?;
//!     }
//!     Ok(())
//! })?;
//! # Ok::<(), business_manager_db::StoreError>(())
//! ```
//!
//! ## FFI Functions
//!
//! - [`create_db`] / [`create_db_from_config`] - Open the business database
//! - [`push_data`] - Insert a record
//! - [`get_by_id`] - Retrieve a record by primary key
//! - [`get_all`] - Retrieve all records, optionally through an index and key range
//! - [`update_data`] - Insert or replace a record
//! - [`delete_by_id`] - Delete a record
//! - [`clear_all_records`] - Empty a collection
//! - [`next_store_event`] - Poll for version-change signals
//! - [`close_database`] - Release the handle
//! - [`free_response`] - Free a returned string

pub mod app_response;
pub mod auth;
pub mod config;
pub mod error;
pub mod format;
pub mod gate;
pub mod key;
mod migration;
pub mod models;
pub mod notify;
pub mod object_store;
mod registry;
pub mod schema;
pub mod transaction;

pub use crate::config::{load_config, StoreConfig};
pub use crate::error::{Result, StoreError};
pub use crate::gate::{AccessGate, AlwaysOpen, SubscriptionConfig, SubscriptionGate};
pub use crate::key::{KeyPath, KeyRange, KeyValue};
pub use crate::notify::{LogNotifier, Notifier, Severity};
pub use crate::object_store::{ObjectStore, OpenOptions};
pub use crate::registry::StoreEvent;
pub use crate::schema::{business_schema, CollectionSchema, FieldType, IndexSchema, Schema};
pub use crate::transaction::{Transaction, TransactionMode};

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;

use log::{info, warn};
use serde_json::Value as JsonValue;

use crate::app_response::AppResponse;
use crate::key::RangeQuery;

/// Opens the business database inside the given directory.
///
/// The environment lives at `<dir>/BusinessManagerDB.lmdb` and is migrated to
/// the current business schema version.
///
/// # Parameters
///
/// * `dir` - Null-terminated C string with the directory holding the database
///
/// # Returns
///
/// A pointer to the [`ObjectStore`] on success, or a null pointer on failure.
/// Release it with [`close_database`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use business_manager_db::create_db;
///
/// let dir = CString::new("app_data").unwrap();
/// let store = create_db(dir.as_ptr());
/// assert!(!store.is_null());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_db(dir: *const c_char) -> *mut ObjectStore {
    let dir = match c_ptr_to_str(dir, "directory") {
        Ok(dir) => dir,
        Err(e) => {
            warn!("create_db: {e}");
            return std::ptr::null_mut();
        }
    };

    open_raw(&StoreConfig::in_directory(dir))
}

/// Opens the business database as described by a TOML [`StoreConfig`] file,
/// including its subscription window when one is configured.
///
/// # Parameters
///
/// * `config_path` - Null-terminated C string with the path of the TOML file
///
/// # Returns
///
/// A pointer to the [`ObjectStore`] on success, or a null pointer when the file
/// cannot be read, the subscription is invalid or the database cannot be opened.
///
/// # Safety
///
/// `config_path` must be a valid pointer to a UTF-8 C string.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use business_manager_db::create_db_from_config;
///
/// let path = CString::new("store.toml").unwrap();
/// let store = create_db_from_config(path.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_db_from_config(config_path: *const c_char) -> *mut ObjectStore {
    let path = match c_ptr_to_str(config_path, "config path") {
        Ok(path) => path,
        Err(e) => {
            warn!("create_db_from_config: {e}");
            return std::ptr::null_mut();
        }
    };

    match load_config(Path::new(&path)) {
        Ok(config) => open_raw(&config),
        Err(e) => {
            warn!("❌ Failed to load config {path}: {e}");
            std::ptr::null_mut()
        }
    }
}

fn open_raw(config: &StoreConfig) -> *mut ObjectStore {
    info!("Attempting to open database in: {}", config.directory.display());
    match ObjectStore::open(config, business_schema()) {
        Ok(store) => {
            info!("✅ Database initialized successfully");
            Box::into_raw(Box::new(store))
        }
        Err(e) => {
            warn!("❌ Failed to initialize database: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Inserts a JSON record into `collection`.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `collection` - Null-terminated C string naming the collection
/// * `json_ptr` - Null-terminated C string containing the record as a JSON object
///
/// # Returns
///
/// A JSON-formatted C string. `Ok` carries the primary key as JSON.
///
/// # Errors
///
/// * `DuplicateKey` - a record with the same primary key exists
/// * `ConstraintError` - a unique index already holds the record's index key
/// * `ValidationError` - the record does not match the collection's fields
/// * `NotFound` - the collection does not exist
/// * `SerializationError` / `BadRequest` - malformed JSON or null pointers
///
/// # Safety
///
/// All pointers must be valid. Free the returned string with [`free_response`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use business_manager_db::{create_db, push_data};
///
/// let dir = CString::new("app_data").unwrap();
/// let store = create_db(dir.as_ptr());
///
/// let collection = CString::new("categories").unwrap();
/// let json = CString::new(r#"{"id":"c1","name":"Drinks"}"#).unwrap();
/// let result = push_data(store, collection.as_ptr(), json.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn push_data(
    state: *mut ObjectStore,
    collection: *const c_char,
    json_ptr: *const c_char,
) -> *const c_char {
    respond(|| {
        let store = state_ref(state)?;
        let collection = c_ptr_to_str(collection, "collection")?;
        let record = parse_record(json_ptr)?;
        let key = store.add(&collection, record)?;
        Ok(AppResponse::Ok(key.to_string()))
    })
}

/// Retrieves one record by primary key.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `collection` - Null-terminated C string naming the collection
/// * `key` - The primary key as JSON (`"p1"`, `42`, `["a", 1]`); text that is
///   not valid JSON is taken as a string key
///
/// # Returns
///
/// A JSON-formatted C string whose `Ok` payload is the record as JSON, or
/// `NotFound` when no record matches.
///
/// # Safety
///
/// All pointers must be valid. The key string must be valid UTF-8.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use business_manager_db::{create_db, get_by_id};
///
/// let dir = CString::new("app_data").unwrap();
/// let store = create_db(dir.as_ptr());
///
/// let collection = CString::new("products").unwrap();
/// let key = CString::new("p1").unwrap();
/// let result = get_by_id(store, collection.as_ptr(), key.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_by_id(state: *mut ObjectStore, collection: *const c_char, key: *const c_char) -> *const c_char {
    respond(|| {
        let store = state_ref(state)?;
        let collection = c_ptr_to_str(collection, "collection")?;
        let key = parse_key(key)?;
        match store.get(&collection, &key)? {
            Some(record) => Ok(AppResponse::Ok(serde_json::to_string(&record)?)),
            None => Ok(AppResponse::NotFound(format!("No record in '{collection}' with key {key}"))),
        }
    })
}

/// Retrieves every record of a collection as a JSON array.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `collection` - Null-terminated C string naming the collection
/// * `index` - Index name ordering the result, or null for primary key order
/// * `range` - Key range as JSON, or null for every record. Either
///   `{"lower": "2026-01-01", "upper": "2026-02-01", "upperOpen": true}` or
///   `{"only": "pending"}`
///
/// # Returns
///
/// A JSON-formatted C string whose `Ok` payload is the JSON array of records.
///
/// # Errors
///
/// * `NotFound` - unknown collection or index
/// * `ValidationError` - the range is inverted or empty
/// * `BadRequest` - the range is not valid JSON
///
/// # Safety
///
/// `state` and `collection` must be valid pointers; `index` and `range` may be null.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_all(
    state: *mut ObjectStore,
    collection: *const c_char,
    index: *const c_char,
    range: *const c_char,
) -> *const c_char {
    respond(|| {
        let store = state_ref(state)?;
        let collection = c_ptr_to_str(collection, "collection")?;
        let index = optional_str(index, "index")?;
        let range = match optional_str(range, "range")? {
            Some(raw) => {
                let query: RangeQuery = serde_json::from_str(&raw)
                    .map_err(|e| AppResponse::BadRequest(format!("Invalid range JSON: {e}")))?;
                Some(KeyRange::try_from(query)?)
            }
            None => None,
        };
        let records = store.get_all(&collection, index.as_deref(), range.as_ref())?;
        Ok(AppResponse::Ok(serde_json::to_string(&records)?))
    })
}

/// Inserts or replaces a record (upsert).
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `collection` - Null-terminated C string naming the collection
/// * `json_ptr` - Null-terminated C string containing the full record
///
/// # Returns
///
/// A JSON-formatted C string. `Ok` carries the primary key as JSON. A record
/// that does not exist yet is inserted.
///
/// # Errors
///
/// `ConstraintError` when another record holds one of its unique index keys,
/// `ValidationError` when it does not match the collection's fields.
///
/// # Safety
///
/// All pointers must be valid.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use business_manager_db::{create_db, update_data};
///
/// let dir = CString::new("app_data").unwrap();
/// let store = create_db(dir.as_ptr());
///
/// let collection = CString::new("products").unwrap();
/// let json = CString::new(r#"{"id":"p1","name":"Rice","stock":12}"#).unwrap();
/// let result = update_data(store, collection.as_ptr(), json.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_data(
    state: *mut ObjectStore,
    collection: *const c_char,
    json_ptr: *const c_char,
) -> *const c_char {
    respond(|| {
        let store = state_ref(state)?;
        let collection = c_ptr_to_str(collection, "collection")?;
        let record = parse_record(json_ptr)?;
        let key = store.update(&collection, record)?;
        Ok(AppResponse::Ok(key.to_string()))
    })
}

/// Deletes a record by primary key, together with its index entries.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `collection` - Null-terminated C string naming the collection
/// * `key` - The primary key, in the same form [`get_by_id`] accepts
///
/// # Returns
///
/// A JSON-formatted C string confirming the deletion. Deleting an absent key
/// succeeds.
///
/// # Safety
///
/// All pointers must be valid.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use business_manager_db::{create_db, delete_by_id};
///
/// let dir = CString::new("app_data").unwrap();
/// let store = create_db(dir.as_ptr());
///
/// let collection = CString::new("orders").unwrap();
/// let key = CString::new("o1").unwrap();
/// let result = delete_by_id(store, collection.as_ptr(), key.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_by_id(
    state: *mut ObjectStore,
    collection: *const c_char,
    key: *const c_char,
) -> *const c_char {
    respond(|| {
        let store = state_ref(state)?;
        let collection = c_ptr_to_str(collection, "collection")?;
        let key = parse_key(key)?;
        store.delete(&collection, &key)?;
        Ok(AppResponse::success("Record deleted successfully"))
    })
}

/// Removes every record of a collection and empties its indexes.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `collection` - Null-terminated C string naming the collection
///
/// # Returns
///
/// A JSON-formatted C string indicating success or failure.
///
/// # Safety
///
/// Both pointers must be valid. This operation cannot be undone.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use business_manager_db::{create_db, clear_all_records};
///
/// let dir = CString::new("app_data").unwrap();
/// let store = create_db(dir.as_ptr());
///
/// let collection = CString::new("dailyStock").unwrap();
/// let result = clear_all_records(store, collection.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_all_records(state: *mut ObjectStore, collection: *const c_char) -> *const c_char {
    respond(|| {
        let store = state_ref(state)?;
        let collection = c_ptr_to_str(collection, "collection")?;
        store.clear(&collection)?;
        Ok(AppResponse::success(format!("All records in '{collection}' cleared successfully")))
    })
}

/// Polls for the next pending [`StoreEvent`].
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
///
/// # Returns
///
/// A JSON-formatted C string whose `Ok` payload is the event as JSON, or
/// `"null"` when none is waiting. A `versionChange` event means the handle is
/// closed and the host should reopen the database.
///
/// # Safety
///
/// `state` must be a valid pointer.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn next_store_event(state: *mut ObjectStore) -> *const c_char {
    respond(|| {
        let store = state_ref(state)?;
        let event = store.try_next_event();
        Ok(AppResponse::Ok(serde_json::to_string(&event)?))
    })
}

/// Releases the handle returned by [`create_db`].
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`] or [`create_db_from_config`]
///
/// # Returns
///
/// A JSON-formatted C string confirming the close, or `BadRequest` for a null
/// pointer. The environment itself closes with its last handle.
///
/// # Safety
///
/// `state` must come from this library and must not be used afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_database(state: *mut ObjectStore) -> *const c_char {
    if state.is_null() {
        let error = AppResponse::BadRequest("Null state pointer passed to close_database".to_string());
        return response_to_c_string(&error);
    }

    let store = unsafe { Box::from_raw(state) };
    store.close();
    response_to_c_string(&AppResponse::success("Database connection closed successfully"))
}

/// Frees a string returned by any function of this library.
///
/// # Safety
///
/// `ptr` must be a string returned by this library, freed at most once. Null
/// pointers are ignored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr as *mut c_char) });
    }
}

/// Runs an FFI body and turns its outcome into a C string.
fn respond<F>(body: F) -> *const c_char
where
    F: FnOnce() -> std::result::Result<AppResponse, AppResponse>,
{
    match body() {
        Ok(response) | Err(response) => response_to_c_string(&response),
    }
}

fn state_ref<'a>(state: *mut ObjectStore) -> std::result::Result<&'a ObjectStore, AppResponse> {
    unsafe { state.as_ref() }.ok_or_else(|| AppResponse::BadRequest("Null state pointer".to_string()))
}

fn parse_record(json_ptr: *const c_char) -> std::result::Result<JsonValue, AppResponse> {
    let json = c_ptr_to_str(json_ptr, "JSON")?;
    serde_json::from_str(&json).map_err(|e| AppResponse::SerializationError(format!("Invalid JSON: {e}")))
}

fn parse_key(key_ptr: *const c_char) -> std::result::Result<KeyValue, AppResponse> {
    let raw = c_ptr_to_str(key_ptr, "key")?;
    match serde_json::from_str::<JsonValue>(&raw) {
        Ok(value) => KeyValue::from_json(&value)
            .ok_or_else(|| AppResponse::BadRequest(format!("{raw} is not a valid key"))),
        Err(_) => Ok(KeyValue::Text(raw)),
    }
}

fn optional_str(ptr: *const c_char, field_name: &str) -> std::result::Result<Option<String>, AppResponse> {
    if ptr.is_null() {
        return Ok(None);
    }
    c_ptr_to_str(ptr, field_name).map(Some)
}

/// Converts an [`AppResponse`] to a JSON C string owned by the caller.
///
/// Returns a null pointer if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string pointer to an owned `String`, reporting null pointers
/// and invalid UTF-8 as `BadRequest`.
fn c_ptr_to_str(ptr: *const c_char, field_name: &str) -> std::result::Result<String, AppResponse> {
    if ptr.is_null() {
        return Err(AppResponse::BadRequest(format!("Null {field_name} pointer")));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => Err(AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"))),
    }
}
