//! User-facing notification surface.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Fire-and-forget sink for messages meant for the user (toasts, banners).
///
/// The store calls it when opening fails, when the access gate refuses a call
/// and when a newer schema version forces a reload.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Default notifier: writes through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Success | Severity::Info => info!("[notice] {message}"),
            Severity::Warning => warn!("[notice] {message}"),
            Severity::Error => error!("[notice] {message}"),
        }
    }
}
