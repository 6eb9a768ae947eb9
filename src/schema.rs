//! Versioned schema declarations and record validation.
//!
//! A [`Schema`] names the database, carries its integer version and lists every
//! collection with its primary key field, secondary indexes and typed fields.
//! The declaration is plain data (serde) so it can be built in code with the
//! builder methods or loaded from TOML.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError};
use crate::key::{lookup, KeyPath, KeyValue};

/// Name prefix reserved for internal sub-databases.
pub(crate) const RESERVED_PREFIX: &str = "__";
/// Separator between collection and index name in index sub-database names.
pub(crate) const INDEX_SEPARATOR: char = '#';

pub const BUSINESS_DB_NAME: &str = "BusinessManagerDB";
pub const BUSINESS_DB_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    /// ISO-8601 date or date-time string.
    Timestamp,
    Any,
}

impl FieldType {
    fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            FieldType::Text => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Timestamp => value.as_str().is_some_and(is_timestamp),
            FieldType::Any => true,
        }
    }
}

fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    pub(crate) fn db_name(&self, collection: &str) -> String {
        format!("{collection}{INDEX_SEPARATOR}{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    /// Field holding the primary key.
    pub key_path: String,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        CollectionSchema {
            name: name.into(),
            key_path: key_path.into(),
            indexes: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn index(mut self, name: &str, key_path: impl Into<KeyPath>, unique: bool) -> Self {
        self.indexes.push(IndexSchema {
            name: name.to_string(),
            key_path: key_path.into(),
            unique,
        });
        self
    }

    pub fn field(mut self, name: &str, field_type: FieldType, required: bool) -> Self {
        self.fields.push(FieldSchema {
            name: name.to_string(),
            field_type,
            required,
        });
        self
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Checks a record against the declared shape and returns its primary key.
    pub fn validate_record(&self, record: &JsonValue) -> Result<KeyValue> {
        if !record.is_object() {
            return Err(StoreError::validation(&self.name, "record must be a JSON object"));
        }

        let key = match lookup(record, &self.key_path) {
            None | Some(JsonValue::Null) => {
                return Err(StoreError::validation(
                    &self.name,
                    format!("missing primary key field '{}'", self.key_path),
                ))
            }
            Some(raw) => KeyValue::from_json(raw).ok_or_else(|| {
                StoreError::validation(
                    &self.name,
                    format!("primary key field '{}' holds {raw}, which is not a valid key", self.key_path),
                )
            })?,
        };

        for field in &self.fields {
            match lookup(record, &field.name) {
                None | Some(JsonValue::Null) => {
                    if field.required {
                        return Err(StoreError::validation(
                            &self.name,
                            format!("required field '{}' is missing", field.name),
                        ));
                    }
                }
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(StoreError::validation(
                        &self.name,
                        format!("field '{}' should be {:?}, got {value}", field.name, field.field_type),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(key)
    }

    fn check(&self) -> Result<()> {
        if self.name.is_empty()
            || self.name.starts_with(RESERVED_PREFIX)
            || self.name.contains(INDEX_SEPARATOR)
        {
            return Err(StoreError::Config(format!("invalid collection name '{}'", self.name)));
        }
        if self.key_path.is_empty() {
            return Err(StoreError::Config(format!("collection '{}' has no primary key field", self.name)));
        }
        let mut seen = HashSet::new();
        for index in &self.indexes {
            if index.key_path.is_empty() {
                return Err(StoreError::Config(format!(
                    "index '{}' on '{}' has an empty key path",
                    index.name, self.name
                )));
            }
            if index.name.is_empty() || !seen.insert(index.name.as_str()) {
                return Err(StoreError::Config(format!(
                    "duplicate or empty index name '{}' on '{}'",
                    index.name, self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub collections: Vec<CollectionSchema>,
}

impl Schema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Schema {
            name: name.into(),
            version,
            collections: Vec::new(),
        }
    }

    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let schema: Schema = toml::from_str(source)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Rejects declarations the store cannot lay out on disk.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Config("schema name is empty".to_string()));
        }
        if self.version == 0 {
            return Err(StoreError::Config("schema version must be at least 1".to_string()));
        }
        let mut seen = HashSet::new();
        for collection in &self.collections {
            collection.check()?;
            if !seen.insert(collection.name.as_str()) {
                return Err(StoreError::Config(format!("collection '{}' declared twice", collection.name)));
            }
        }
        Ok(())
    }

    /// Number of LMDB sub-databases the schema needs, metadata included.
    pub(crate) fn sub_database_count(&self) -> usize {
        1 + self
            .collections
            .iter()
            .map(|c| 1 + c.indexes.len())
            .sum::<usize>()
    }
}

/// The schema used by the business-management pages.
pub fn business_schema() -> Schema {
    use FieldType::*;

    Schema::new(BUSINESS_DB_NAME, BUSINESS_DB_VERSION)
        .with_collection(
            CollectionSchema::new("products", "id")
                .index("name", "name", false)
                .index("category", "category", false)
                .index("stock_status", &["stock", "lowStockThreshold"][..], false)
                .field("name", Text, true)
                .field("category", Text, false)
                .field("price", Number, false)
                .field("stock", Number, false)
                .field("lowStockThreshold", Number, false),
        )
        .with_collection(
            CollectionSchema::new("categories", "id")
                .index("name", "name", true)
                .field("name", Text, true),
        )
        .with_collection(
            CollectionSchema::new("orders", "id")
                .index("productId", "productId", false)
                .index("status", "status", false)
                .index("date", "date", false)
                .index("isBulkOrder", "isBulkOrder", false)
                .field("productId", Text, false)
                .field("quantity", Number, false)
                .field("status", Text, false)
                .field("date", Timestamp, false)
                .field("isBulkOrder", Boolean, false),
        )
        .with_collection(
            CollectionSchema::new("damaged_items", "id")
                .index("orderId", "orderId", false)
                .index("productId", "productId", false)
                .index("date", "date", false)
                .field("quantity", Number, false)
                .field("date", Timestamp, false),
        )
        .with_collection(
            CollectionSchema::new("sales", "id")
                .index("date", "date", false)
                .index("customer", "customer", false)
                .field("date", Timestamp, false)
                .field("total", Number, false),
        )
        .with_collection(
            CollectionSchema::new("sale_transactions", "id")
                .index("saleId", "saleId", false)
                .index("productId", "productId", false)
                .index("orderId", "orderId", false)
                .index("date", "date", false)
                .field("quantity", Number, false)
                .field("price", Number, false)
                .field("date", Timestamp, false),
        )
        .with_collection(
            CollectionSchema::new("customers", "id")
                .index("name", "name", false)
                .index("phone", "phone", false)
                .index("status", "status", false)
                .field("name", Text, true)
                .field("phone", Text, false),
        )
        .with_collection(
            CollectionSchema::new("dailyStock", "id")
                .index("date", "date", false)
                .index("productId", "productId", false)
                .field("date", Timestamp, false),
        )
        .with_collection(CollectionSchema::new("settings", "id"))
        .with_collection(CollectionSchema::new("finance", "id").field("balance", Number, false))
        .with_collection(
            CollectionSchema::new("finance_transactions", "id")
                .index("type", "type", false)
                .index("status", "status", false)
                .index("date", "date", false)
                .field("amount", Number, false)
                .field("date", Timestamp, false),
        )
}
