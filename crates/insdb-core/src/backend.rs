//! The contract shared by the local snapshot and the remote service.
//!
//! The path resolver and the shell only ever talk to `dyn Backend`; mutation is
//! a capability, not a separate type, so a read-only backend answers with
//! [`InsDbError::PermissionDenied`] through the same methods.

use crate::error::{InsDbError, Result};
use crate::model::{ChildEntry, DataFile, Entity, Object, ObjectKind, Quantity, Release};
use std::path::PathBuf;
use uuid::Uuid;

/// Free-form attributes for create/patch requests, forwarded to the service.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// What a backend can do beyond reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub writable: bool,
    pub downloads: bool,
}

pub trait Backend: Send + Sync {
    /// Human-readable location (snapshot directory or server address).
    fn describe(&self) -> String;

    fn capabilities(&self) -> Capabilities;

    /// Fails with [`InsDbError::NotFound`] when no object has this UUID.
    fn resolve_uuid(&self, uuid: Uuid) -> Result<Object>;

    /// Child entities and quantities of `entity` (top-level entities for `None`),
    /// sorted by name.
    fn children(&self, entity: Option<Uuid>) -> Result<Vec<ChildEntry>>;

    /// Looks up one child of `entity` by name.
    fn child(&self, entity: Option<Uuid>, name: &str) -> Result<Option<ChildEntry>> {
        Ok(self
            .children(entity)?
            .into_iter()
            .find(|child| child.name == name))
    }

    fn releases(&self) -> Result<Vec<Release>>;

    /// `Ok(None)` when no release carries this tag.
    fn release(&self, tag: &str) -> Result<Option<Release>>;

    /// UUIDs of `kind` this backend can enumerate without extra round trips.
    fn known_uuids(&self, kind: ObjectKind) -> Vec<Uuid>;

    /// Local file backing a data file or a format specification document.
    fn local_copy(&self, uuid: Uuid) -> Result<PathBuf>;

    /// Resolves a slash path, a release path, a typed path or a bare UUID.
    fn resolve_path(&self, path: &str, base: Option<Uuid>) -> Result<Object> {
        crate::path::resolve(self, path, base)
    }

    fn create(&self, kind: ObjectKind, parent: &str, attributes: &Attributes) -> Result<Uuid> {
        let _ = (kind, parent, attributes);
        Err(InsDbError::read_only("create"))
    }

    fn patch(&self, uuid: Uuid, attributes: &Attributes) -> Result<()> {
        let _ = (uuid, attributes);
        Err(InsDbError::read_only("patch"))
    }

    fn delete(&self, uuid: Uuid) -> Result<()> {
        let _ = uuid;
        Err(InsDbError::read_only("delete"))
    }

    /// Fetches the content of a data file so that [`Backend::local_copy`] succeeds.
    fn download(&self, uuid: Uuid) -> Result<PathBuf> {
        let _ = uuid;
        Err(InsDbError::PermissionDenied(
            "download: this database has no remote content".to_string(),
        ))
    }

    fn entity(&self, uuid: Uuid) -> Result<Entity> {
        match self.resolve_uuid(uuid)? {
            Object::Entity(entity) => Ok(entity),
            other => Err(kind_mismatch(&other, ObjectKind::Entity)),
        }
    }

    fn quantity(&self, uuid: Uuid) -> Result<Quantity> {
        match self.resolve_uuid(uuid)? {
            Object::Quantity(quantity) => Ok(quantity),
            other => Err(kind_mismatch(&other, ObjectKind::Quantity)),
        }
    }

    fn data_file(&self, uuid: Uuid) -> Result<DataFile> {
        match self.resolve_uuid(uuid)? {
            Object::DataFile(data_file) => Ok(data_file),
            other => Err(kind_mismatch(&other, ObjectKind::DataFile)),
        }
    }

    /// Data files of a quantity, oldest upload first.
    fn versions(&self, quantity: &Quantity) -> Result<Vec<DataFile>> {
        let mut files = quantity
            .data_files
            .iter()
            .map(|uuid| self.data_file(*uuid))
            .collect::<Result<Vec<_>>>()?;
        files.sort_by(|a, b| a.upload_date.cmp(&b.upload_date).then(a.uuid.cmp(&b.uuid)));
        Ok(files)
    }

    /// Releases that pin `data_file`, computed from the release list.
    fn releases_containing(&self, data_file: Uuid) -> Result<Vec<Release>> {
        Ok(self
            .releases()?
            .into_iter()
            .filter(|release| release.data_files.contains(&data_file))
            .collect())
    }
}

/// Error for an object reached where another kind was required.
pub fn kind_mismatch(found: &Object, expected: ObjectKind) -> InsDbError {
    InsDbError::invalid_path(
        found.uuid().to_string(),
        format!("expected {expected}, found {} \"{}\"", found.kind(), found.name()),
    )
}
