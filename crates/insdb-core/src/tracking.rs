//! Records which catalog objects a session actually looked up.
//!
//! Wrap any backend in [`Tracking`] and every object returned by a UUID or
//! path lookup is remembered, so a pipeline can report the exact entities,
//! quantities and data files it depended on. Listings and version scans do
//! not count as lookups; use [`Tracking::inner`] for reads that should not be
//! recorded at all.

use crate::backend::{Attributes, Backend, Capabilities};
use crate::error::Result;
use crate::model::{ChildEntry, DataFile, Entity, Object, ObjectKind, Quantity, Release};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;

pub struct Tracking<B: Backend> {
    inner: B,
    queried: Mutex<BTreeSet<(ObjectKind, Uuid)>>,
}

impl<B: Backend> Tracking<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            queried: Mutex::new(BTreeSet::new()),
        }
    }

    /// The wrapped backend; lookups through it are not recorded.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    /// UUIDs of `kind` looked up so far, in UUID order.
    pub fn queried(&self, kind: ObjectKind) -> Vec<Uuid> {
        self.queried
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, uuid)| *uuid)
            .collect()
    }

    pub fn queried_entities(&self) -> Vec<Uuid> {
        self.queried(ObjectKind::Entity)
    }

    pub fn queried_quantities(&self) -> Vec<Uuid> {
        self.queried(ObjectKind::Quantity)
    }

    pub fn queried_data_files(&self) -> Vec<Uuid> {
        self.queried(ObjectKind::DataFile)
    }

    pub fn clear_queried(&self) {
        self.queried.lock().clear();
    }

    fn record(&self, object: &Object) {
        if self.queried.lock().insert((object.kind(), object.uuid())) {
            tracing::trace!(uuid = %object.uuid(), kind = %object.kind(), "tracked");
        }
    }

    fn track(&self, object: Result<Object>) -> Result<Object> {
        if let Ok(object) = &object {
            self.record(object);
        }
        object
    }
}

impl<B: Backend> Backend for Tracking<B> {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn resolve_uuid(&self, uuid: Uuid) -> Result<Object> {
        self.track(self.inner.resolve_uuid(uuid))
    }

    fn children(&self, entity: Option<Uuid>) -> Result<Vec<ChildEntry>> {
        self.inner.children(entity)
    }

    fn child(&self, entity: Option<Uuid>, name: &str) -> Result<Option<ChildEntry>> {
        self.inner.child(entity, name)
    }

    fn releases(&self) -> Result<Vec<Release>> {
        self.inner.releases()
    }

    fn release(&self, tag: &str) -> Result<Option<Release>> {
        self.inner.release(tag)
    }

    fn known_uuids(&self, kind: ObjectKind) -> Vec<Uuid> {
        self.inner.known_uuids(kind)
    }

    fn local_copy(&self, uuid: Uuid) -> Result<PathBuf> {
        self.inner.local_copy(uuid)
    }

    /// Only the object the path lands on is recorded, not the entities walked through.
    fn resolve_path(&self, path: &str, base: Option<Uuid>) -> Result<Object> {
        self.track(self.inner.resolve_path(path, base))
    }

    fn create(&self, kind: ObjectKind, parent: &str, attributes: &Attributes) -> Result<Uuid> {
        self.inner.create(kind, parent, attributes)
    }

    fn patch(&self, uuid: Uuid, attributes: &Attributes) -> Result<()> {
        self.inner.patch(uuid, attributes)
    }

    fn delete(&self, uuid: Uuid) -> Result<()> {
        self.inner.delete(uuid)?;
        self.queried.lock().retain(|(_, tracked)| *tracked != uuid);
        Ok(())
    }

    fn download(&self, uuid: Uuid) -> Result<PathBuf> {
        self.inner.download(uuid)
    }

    fn entity(&self, uuid: Uuid) -> Result<Entity> {
        let entity = self.inner.entity(uuid)?;
        self.queried.lock().insert((ObjectKind::Entity, uuid));
        Ok(entity)
    }

    fn quantity(&self, uuid: Uuid) -> Result<Quantity> {
        let quantity = self.inner.quantity(uuid)?;
        self.queried.lock().insert((ObjectKind::Quantity, uuid));
        Ok(quantity)
    }

    fn data_file(&self, uuid: Uuid) -> Result<DataFile> {
        let data_file = self.inner.data_file(uuid)?;
        self.queried.lock().insert((ObjectKind::DataFile, uuid));
        Ok(data_file)
    }

    fn versions(&self, quantity: &Quantity) -> Result<Vec<DataFile>> {
        self.inner.versions(quantity)
    }

    fn releases_containing(&self, data_file: Uuid) -> Result<Vec<Release>> {
        self.inner.releases_containing(data_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InsDbError;
    use crate::snapshot;
    use crate::LocalBackend;
    use std::path::Path;

    const SCHEMA: &str = include_str!("../../../tests/fixtures/planck_schema.json");

    const BANDPASS: &str = "71f0e4c2-3b5d-4a6e-9f7a-8b9c0d1e2f01";
    const OLD_BANDPASS: &str = "3a29d860-2289-4691-82de-1fcb4adfff0e";
    const FFP_2018: &str = "37bb70e4-5f9d-4c2a-b1e8-6a7d9c0b2e01";

    fn tracked() -> Tracking<LocalBackend> {
        let graph = snapshot::parse_schema(SCHEMA, Path::new("/nonexistent")).unwrap();
        Tracking::new(LocalBackend::new(graph).unwrap())
    }

    fn uuid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn lookups_are_recorded_per_kind() {
        let db = tracked();
        assert!(db.queried_quantities().is_empty());

        db.resolve_path("/HFI/frequency_217_ghz/bandpass", None).unwrap();
        db.resolve_uuid(uuid(OLD_BANDPASS)).unwrap();
        db.resolve_path("/releases/planck2018/LFI/full_focal_plane", None)
            .unwrap();

        assert_eq!(db.queried_quantities(), vec![uuid(BANDPASS)]);
        let mut files = vec![uuid(OLD_BANDPASS), uuid(FFP_2018)];
        files.sort();
        assert_eq!(db.queried_data_files(), files);
        // Entities walked through on the way are not lookups of their own.
        assert!(db.queried_entities().is_empty());
    }

    #[test]
    fn repeated_and_failed_lookups_do_not_add_entries() {
        let db = tracked();
        db.data_file(uuid(OLD_BANDPASS)).unwrap();
        db.data_file(uuid(OLD_BANDPASS)).unwrap();
        assert!(matches!(
            db.resolve_uuid(Uuid::from_u128(1)),
            Err(InsDbError::NotFound(_))
        ));
        assert!(db.quantity(uuid(OLD_BANDPASS)).is_err());
        assert_eq!(db.queried_data_files(), vec![uuid(OLD_BANDPASS)]);
        assert!(db.queried_quantities().is_empty());
    }

    #[test]
    fn listings_and_untracked_reads_leave_no_trace() {
        let db = tracked();
        let hfi = db.inner().resolve_path("/HFI", None).unwrap().uuid();
        db.children(Some(hfi)).unwrap();
        let bandpass = db.inner().quantity(uuid(BANDPASS)).unwrap();
        assert_eq!(db.versions(&bandpass).unwrap().len(), 2);
        assert!(db.queried(ObjectKind::Entity).is_empty());
        assert!(db.queried_data_files().is_empty());

        db.entity(hfi).unwrap();
        assert_eq!(db.queried_entities(), vec![hfi]);
        db.clear_queried();
        assert!(db.queried_entities().is_empty());
    }
}
