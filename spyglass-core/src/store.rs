//! Object store: owns exported objects and mints their wire ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ObjectError;
use crate::object::RemoteObject;

#[derive(Default)]
struct StoreInner {
    entries: HashMap<u64, Arc<dyn RemoteObject>>,
    // Arc identity -> id, so re-exporting the same Arc reuses its id.
    by_identity: HashMap<usize, u64>,
}

/// Keeps exported objects alive and resolvable by id.
///
/// An entry pins its object until [`ObjectStore::remove`] runs; there is no
/// implicit reclamation, release is always an explicit peer request.
pub struct ObjectStore {
    inner: Mutex<StoreInner>,
    next_id: AtomicU64,
}

impl ObjectStore {
    pub fn new() -> Self {
        ObjectStore {
            inner: Mutex::new(StoreInner::default()),
            // Id 0 is reserved so a zeroed reference never resolves.
            next_id: AtomicU64::new(1),
        }
    }

    fn identity(obj: &Arc<dyn RemoteObject>) -> usize {
        Arc::as_ptr(obj) as *const u8 as usize
    }

    /// Registers an object and returns its id. Adding the same `Arc` again
    /// returns the id already assigned to it.
    pub fn add(&self, obj: Arc<dyn RemoteObject>) -> u64 {
        let identity = Self::identity(&obj);
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.by_identity.get(&identity) {
            return id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, type_name = obj.type_name(), "exporting object");
        inner.by_identity.insert(identity, id);
        inner.entries.insert(id, obj);
        id
    }

    pub fn resolve(&self, id: u64) -> Result<Arc<dyn RemoteObject>, ObjectError> {
        self.inner
            .lock()
            .entries
            .get(&id)
            .cloned()
            .ok_or(ObjectError::NotFound(id))
    }

    /// Drops an entry. Removing an unknown id is a no-op.
    pub fn remove(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(obj) = inner.entries.remove(&id) {
            let identity = Self::identity(&obj);
            inner.by_identity.remove(&identity);
            debug!(id, "released object");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}
