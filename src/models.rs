//! Typed record shapes for the business collections.
//!
//! Field names are camelCase on disk so records written by the web pages and
//! records written through these structs are interchangeable. Relations such as
//! `Order::product_id → Product::id` are logical only; the store does not
//! enforce them.
//!
//! ```no_run
//! use business_manager_db::{business_schema, ObjectStore, StoreConfig};
//! use business_manager_db::models::{generate_id, Category};
//!
//! let store = ObjectStore::open(&StoreConfig::in_directory("data"), business_schema())?;
//! let category = Category {
//!     id: generate_id("cat"),
//!     name: "Beverages".to_string(),
//!     description: None,
//! };
//! store.insert(&category)?;
//! # Ok::<(), business_manager_db::StoreError>(())
//! ```

use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A typed record bound to one collection.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: f64,
    #[serde(default)]
    pub low_stock_threshold: f64,
}

impl Product {
    pub fn is_low_on_stock(&self) -> bool {
        self.stock <= self.low_stock_threshold
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub product_id: String,
    pub quantity: f64,
    pub status: String,
    pub date: String,
    #[serde(default)]
    pub is_bulk_order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamagedItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub product_id: String,
    pub quantity: f64,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub date: String,
    pub customer: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleTransaction {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub quantity: f64,
    pub price: f64,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStock {
    pub id: String,
    pub date: String,
    pub product_id: String,
    pub opening: f64,
    pub closing: f64,
}

/// Free-form application setting keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub id: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceAccount {
    pub id: String,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceTransaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub status: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

macro_rules! record {
    ($($ty:ty => $collection:literal),* $(,)?) => {
        $(impl Record for $ty {
            const COLLECTION: &'static str = $collection;
        })*
    };
}

record! {
    Product => "products",
    Category => "categories",
    Order => "orders",
    DamagedItem => "damaged_items",
    Sale => "sales",
    SaleTransaction => "sale_transactions",
    Customer => "customers",
    DailyStock => "dailyStock",
    Setting => "settings",
    FinanceAccount => "finance",
    FinanceTransaction => "finance_transactions",
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// `prefix` + base36 millisecond timestamp + five random base36 characters.
pub fn generate_id(prefix: &str) -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{prefix}{}{suffix}", to_base36(millis))
}
