use insdb_core::{Object, ObjectKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
struct CacheState {
    objects: HashMap<Uuid, Object>,
    /// Top-level entities, from the `entities/` listing.
    roots: Option<Vec<Uuid>>,
    hits: u64,
    misses: u64,
}

/// UUID-keyed store of fetched objects, owned by one backend.
///
/// Entries never expire; mutations invalidate them explicitly. The lock is
/// only held for map operations, never across a request.
#[derive(Debug, Default)]
pub struct ObjectCache {
    state: Mutex<CacheState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: Uuid) -> Option<Object> {
        let mut state = self.state.lock();
        match state.objects.get(&uuid).cloned() {
            Some(object) => {
                state.hits += 1;
                tracing::debug!(%uuid, "cache hit");
                Some(object)
            }
            None => {
                state.misses += 1;
                tracing::debug!(%uuid, "cache miss");
                None
            }
        }
    }

    pub fn insert(&self, object: Object) {
        self.state.lock().objects.insert(object.uuid(), object);
    }

    pub fn invalidate(&self, uuid: Uuid) {
        if self.state.lock().objects.remove(&uuid).is_some() {
            tracing::debug!(%uuid, "cache entry invalidated");
        }
    }

    pub fn roots(&self) -> Option<Vec<Uuid>> {
        self.state.lock().roots.clone()
    }

    pub fn set_roots(&self, roots: Vec<Uuid>) {
        self.state.lock().roots = Some(roots);
    }

    pub fn invalidate_roots(&self) {
        self.state.lock().roots = None;
    }

    pub fn uuids_of(&self, kind: ObjectKind) -> Vec<Uuid> {
        let state = self.state.lock();
        let mut uuids: Vec<Uuid> = state
            .objects
            .values()
            .filter(|object| object.kind() == kind)
            .map(Object::uuid)
            .collect();
        uuids.sort();
        uuids
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.objects.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}
