//! Process-wide table of open environments.
//!
//! LMDB must not open the same environment twice in one process, so handles
//! opened on the same path and version share one environment. Opening a path
//! with a newer version closes the older environment first and tells every
//! handle that was using it to reload.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{const_mutex, Mutex, MutexGuard};
use serde::Serialize;

use crate::notify::{Notifier, Severity};
use crate::object_store::Shared;

pub const RELOAD_NOTICE: &str = "Database upgrade needed. Page will reload.";

/// Signals pushed to open handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StoreEvent {
    /// Another handle opened a newer schema; this handle is closed and the
    /// caller should reopen (reload).
    #[serde(rename_all = "camelCase")]
    VersionChange { old_version: u32, new_version: u32 },
}

/// Identifies one handle's subscription.
pub(crate) type SubscriberId = u64;

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

struct Subscriber {
    id: SubscriberId,
    events: Sender<StoreEvent>,
    notifier: Arc<dyn Notifier>,
}

struct Entry {
    path: PathBuf,
    shared: Weak<Shared>,
    subscribers: Vec<Subscriber>,
}

pub(crate) struct Registry {
    entries: Vec<Entry>,
}

static REGISTRY: Mutex<Registry> = const_mutex(Registry { entries: Vec::new() });

impl Registry {
    /// Held for the whole open sequence so opens of one path never interleave.
    pub(crate) fn lock() -> MutexGuard<'static, Registry> {
        REGISTRY.lock()
    }

    pub(crate) fn live(&mut self, path: &Path) -> Option<Arc<Shared>> {
        self.entries.retain(|entry| entry.shared.strong_count() > 0);
        self.entries
            .iter()
            .find(|entry| entry.path == path)
            .and_then(|entry| entry.shared.upgrade())
    }

    pub(crate) fn insert(&mut self, path: PathBuf, shared: &Arc<Shared>) {
        self.entries.push(Entry {
            path,
            shared: Arc::downgrade(shared),
            subscribers: Vec::new(),
        });
    }

    pub(crate) fn subscribe(
        &mut self,
        path: &Path,
        notifier: Arc<dyn Notifier>,
    ) -> (SubscriberId, Receiver<StoreEvent>) {
        let id = NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed);
        let (events, receiver) = unbounded();
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.path == path) {
            entry.subscribers.push(Subscriber { id, events, notifier });
        }
        (id, receiver)
    }

    /// Forgets a closed handle. Unknown ids are ignored.
    pub(crate) fn unsubscribe(&mut self, path: &Path, id: SubscriberId) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.path == path) {
            entry.subscribers.retain(|subscriber| subscriber.id != id);
        }
    }

    /// Closes the environment open at `path` and signals its handles.
    /// Blocks until that environment's in-flight transactions have finished.
    pub(crate) fn supersede(&mut self, path: &Path, new_version: u32) {
        let Some(position) = self.entries.iter().position(|entry| entry.path == path) else {
            return;
        };
        let entry = self.entries.remove(position);
        let Some(shared) = entry.shared.upgrade() else {
            return;
        };

        let old_version = shared.version();
        shared.invalidate(new_version);
        for subscriber in entry.subscribers {
            let event = StoreEvent::VersionChange {
                old_version,
                new_version,
            };
            // a dropped receiver means that handle is already gone
            if subscriber.events.send(event).is_ok() {
                subscriber.notifier.notify(RELOAD_NOTICE, Severity::Warning);
            }
        }
    }
}
