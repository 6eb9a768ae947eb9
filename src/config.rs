use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::gate::SubscriptionConfig;

const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024;
const DEFAULT_MAX_READERS: u32 = 126;

/// Where and how the LMDB environment is opened.
///
/// ```toml
/// directory = "data"
/// map_size = 134217728
///
/// [subscription]
/// activated_on = "2026-01-01"
/// duration_days = 365
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub directory: PathBuf,
    pub map_size: usize,
    pub max_readers: u32,
    pub subscription: Option<SubscriptionConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            directory: PathBuf::from("."),
            map_size: DEFAULT_MAP_SIZE,
            max_readers: DEFAULT_MAX_READERS,
            subscription: None,
        }
    }
}

impl StoreConfig {
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        StoreConfig {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// `<directory>/<name>.lmdb`
    pub fn database_dir(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.lmdb"))
    }
}

pub fn load_config(path: &Path) -> Result<StoreConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| StoreError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: StoreConfig = toml::from_str(&contents)?;
    if let Some(subscription) = &config.subscription {
        if subscription.expires_at().is_none() {
            return Err(StoreError::Config(format!(
                "subscription duration_days = {} does not fit the calendar",
                subscription.duration_days
            )));
        }
    }
    Ok(config)
}
