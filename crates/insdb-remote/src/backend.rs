use crate::cache::{CacheStats, ObjectCache};
use crate::transport::{HttpTransport, Transport};
use crate::wire;
use insdb_core::path::check_name;
use insdb_core::{
    kind_mismatch, Attributes, Backend, Capabilities, ChildEntry, ChildKind, ConnectionConfig,
    DataFile, Entity, InsDbError, Object, ObjectKind, Quantity, Release, Result,
};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

const DOWNLOAD_DIR_NAME: &str = "insdb-downloads";

fn object_endpoint(kind: ObjectKind, uuid: Uuid) -> String {
    format!("{}/{uuid}/", kind.collection())
}

/// Refuses entity and quantity names that no path could spell.
fn check_path_name(kind: ObjectKind, name: &str, top_level: bool) -> Result<()> {
    if !matches!(kind, ObjectKind::Entity | ObjectKind::Quantity) {
        return Ok(());
    }
    check_name(name, top_level && kind == ObjectKind::Entity)
        .map_err(|reason| InsDbError::invalid_path(name, reason))
}

/// 404 on a UUID endpoint means the object is gone.
fn not_found_as(uuid: Uuid) -> impl FnOnce(InsDbError) -> InsDbError {
    move |err| match err {
        InsDbError::InvalidPath { .. } => InsDbError::NotFound(uuid),
        other => other,
    }
}

/// Backend talking to an InstrumentDB server.
///
/// Objects are fetched lazily and cached by UUID. Paths are resolved one
/// segment at a time through [`Backend::children`], so the tree is never
/// fetched as a whole.
pub struct RemoteBackend<T: Transport = HttpTransport> {
    transport: T,
    cache: ObjectCache,
    server: String,
    read_only: bool,
    download_dir: PathBuf,
}

impl RemoteBackend<HttpTransport> {
    /// Logs in and returns a backend with an empty cache.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let transport = HttpTransport::connect(config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> RemoteBackend<T> {
    pub fn with_transport(transport: T, config: &ConnectionConfig) -> Self {
        let download_dir = config
            .download_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DOWNLOAD_DIR_NAME));
        Self {
            transport,
            cache: ObjectCache::new(),
            server: config.server.clone(),
            read_only: config.read_only,
            download_dir,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.read_only {
            return Err(InsDbError::read_only(operation));
        }
        Ok(())
    }

    fn fetch_remote(&self, uuid: Uuid, kind: ObjectKind) -> Result<Option<Object>> {
        let Some(value) = self.transport.get(&object_endpoint(kind, uuid))? else {
            return Ok(None);
        };
        let object = wire::object(kind, value)?;
        self.cache.insert(object.clone());
        Ok(Some(object))
    }

    /// Fetches `uuid` from the collection of `kind` unless it is cached.
    fn fetch_as(&self, uuid: Uuid, kind: ObjectKind) -> Result<Object> {
        if let Some(object) = self.cache.get(uuid) {
            return Ok(object);
        }
        self.fetch_remote(uuid, kind)?
            .ok_or(InsDbError::NotFound(uuid))
    }

    /// Every item of a listing endpoint, following `next` links.
    fn list_all(&self, endpoint: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(endpoint.to_string());
        while let Some(page_endpoint) = next {
            let value = self.transport.get(&page_endpoint)?.ok_or_else(|| {
                InsDbError::invalid_path(page_endpoint.clone(), "no such listing")
            })?;
            let (page, following) = wire::page(value)?;
            items.extend(page);
            next = following;
        }
        Ok(items)
    }

    /// Top-level entities. The listing fills the cache with every entity, so
    /// later lookups below the root cost no request.
    fn root_entities(&self) -> Result<Vec<Uuid>> {
        if let Some(roots) = self.cache.roots() {
            return Ok(roots);
        }
        let mut roots = Vec::new();
        for item in self.list_all(&format!("{}/", ObjectKind::Entity.collection()))? {
            let entity = wire::entity(item)?;
            if entity.parent.is_none() {
                roots.push(entity.uuid);
            }
            self.cache.insert(Object::Entity(entity));
        }
        self.cache.set_roots(roots.clone());
        Ok(roots)
    }

    /// Drops `object` and whatever lists it as a child.
    fn invalidate_around(&self, object: &Object) {
        self.cache.invalidate(object.uuid());
        match object.parent() {
            Some(parent) => self.cache.invalidate(parent),
            None if object.kind() == ObjectKind::Entity => self.cache.invalidate_roots(),
            None => {}
        }
    }

    fn download_path(&self, object: &Object) -> Result<PathBuf> {
        let file_name = match object {
            Object::DataFile(file) => format!("{}_{}", file.uuid, file.name),
            Object::FormatSpec(spec) if spec.document_ref.is_empty() => {
                format!("{}_document", spec.uuid)
            }
            Object::FormatSpec(spec) => format!("{}_{}", spec.uuid, spec.document_ref),
            other => {
                return Err(InsDbError::invalid_path(
                    other.uuid().to_string(),
                    format!("{} \"{}\" has no file content", other.kind(), other.name()),
                ))
            }
        };
        Ok(self.download_dir.join(file_name.replace(['/', '\\'], "_")))
    }

    fn parent_reference(
        &self,
        kind: ObjectKind,
        parent: &str,
    ) -> Result<Option<(&'static str, Value)>> {
        let parent = parent.trim();
        let (field, parent_kind) = match kind {
            ObjectKind::Entity => ("parent", ObjectKind::Entity),
            ObjectKind::Quantity => ("parent_entity", ObjectKind::Entity),
            ObjectKind::DataFile => ("quantity", ObjectKind::Quantity),
            ObjectKind::FormatSpec => return Ok(None),
        };
        if parent.is_empty() || parent == "/" {
            if kind == ObjectKind::Entity {
                return Ok(Some((field, Value::Null)));
            }
            return Err(InsDbError::invalid_path(
                parent,
                format!("a {kind} needs a parent {parent_kind}"),
            ));
        }
        let object = self.resolve_path(parent, None)?;
        if object.kind() != parent_kind {
            return Err(kind_mismatch(&object, parent_kind));
        }
        let reference = self.transport.reference(&object_endpoint(parent_kind, object.uuid()));
        Ok(Some((field, Value::String(reference))))
    }
}

impl<T: Transport> Backend for RemoteBackend<T> {
    fn describe(&self) -> String {
        self.server.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            writable: !self.read_only,
            downloads: true,
        }
    }

    /// Probes the collections in order when the kind is unknown.
    fn resolve_uuid(&self, uuid: Uuid) -> Result<Object> {
        if let Some(object) = self.cache.get(uuid) {
            return Ok(object);
        }
        for kind in ObjectKind::ALL {
            if let Some(object) = self.fetch_remote(uuid, kind)? {
                return Ok(object);
            }
        }
        Err(InsDbError::NotFound(uuid))
    }

    fn children(&self, entity: Option<Uuid>) -> Result<Vec<ChildEntry>> {
        let (entities, quantities) = match entity {
            None => (self.root_entities()?, Default::default()),
            Some(uuid) => match self.fetch_as(uuid, ObjectKind::Entity) {
                Ok(Object::Entity(entity)) => (entity.children, entity.quantities),
                Ok(other) => return Err(InsDbError::NotAnEntity(other.name().to_string())),
                // Not in `entities/`; another collection may still hold it.
                Err(InsDbError::NotFound(_)) => {
                    let other = self.resolve_uuid(uuid)?;
                    return Err(InsDbError::NotAnEntity(other.name().to_string()));
                }
                Err(err) => return Err(err),
            },
        };

        let mut listing = Vec::with_capacity(entities.len() + quantities.len());
        for uuid in entities {
            listing.push(ChildEntry {
                uuid,
                name: self.entity(uuid)?.name,
                kind: ChildKind::Entity,
            });
        }
        for uuid in quantities {
            listing.push(ChildEntry {
                uuid,
                name: self.quantity(uuid)?.name,
                kind: ChildKind::Quantity,
            });
        }
        insdb_core::model::sort_children(&mut listing);
        Ok(listing)
    }

    fn releases(&self) -> Result<Vec<Release>> {
        let mut releases = self
            .list_all("releases/")?
            .into_iter()
            .map(wire::release)
            .collect::<Result<Vec<_>>>()?;
        releases.sort_by(|a, b| {
            a.release_date
                .cmp(&b.release_date)
                .then_with(|| a.tag.cmp(&b.tag))
        });
        Ok(releases)
    }

    fn release(&self, tag: &str) -> Result<Option<Release>> {
        self.transport
            .get(&format!("releases/{tag}/"))?
            .map(wire::release)
            .transpose()
    }

    fn known_uuids(&self, kind: ObjectKind) -> Vec<Uuid> {
        self.cache.uuids_of(kind)
    }

    fn local_copy(&self, uuid: Uuid) -> Result<PathBuf> {
        let object = self.resolve_uuid(uuid)?;
        let path = self.download_path(&object)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(InsDbError::NoLocalCopy(uuid))
        }
    }

    fn create(&self, kind: ObjectKind, parent: &str, attributes: &Attributes) -> Result<Uuid> {
        self.check_writable("create")?;
        let mut body = attributes.clone();
        let parent_field = self.parent_reference(kind, parent)?;
        if let Some(name) = attributes.get("name").and_then(Value::as_str) {
            let top_level = matches!(parent_field, Some((_, Value::Null)));
            check_path_name(kind, name, top_level)?;
        }
        if let Some((field, reference)) = &parent_field {
            body.insert(field.to_string(), reference.clone());
        }

        let response = self
            .transport
            .post(&format!("{}/", kind.collection()), &Value::Object(body))?;
        let uuid = wire::created_uuid(&response)?;

        match parent_field {
            Some((_, Value::String(reference))) => {
                if let Some(parent) = wire::uuid_from_reference(&reference) {
                    self.cache.invalidate(parent);
                }
            }
            Some(_) => self.cache.invalidate_roots(),
            None => {}
        }
        tracing::info!(%uuid, %kind, "created");
        Ok(uuid)
    }

    fn patch(&self, uuid: Uuid, attributes: &Attributes) -> Result<()> {
        self.check_writable("patch")?;
        let object = self.resolve_uuid(uuid)?;
        let renamed = attributes.get("name").and_then(Value::as_str);
        let moved = attributes.get("parent");
        if renamed.is_some() || moved.is_some() {
            let top_level = match moved {
                Some(parent) => parent.is_null(),
                None => object.parent().is_none(),
            };
            check_path_name(object.kind(), renamed.unwrap_or(object.name()), top_level)?;
        }
        self.transport
            .patch(
                &object_endpoint(object.kind(), uuid),
                &Value::Object(attributes.clone()),
            )
            .map_err(not_found_as(uuid))?;

        self.invalidate_around(&object);
        // A re-parented object also changes its new parent's listing.
        for field in ["parent", "parent_entity", "quantity"] {
            match attributes.get(field) {
                Some(Value::String(reference)) => {
                    if let Some(parent) = wire::uuid_from_reference(reference) {
                        self.cache.invalidate(parent);
                    }
                }
                Some(Value::Null) => self.cache.invalidate_roots(),
                _ => {}
            }
        }
        tracing::info!(%uuid, fields = attributes.len(), "patched");
        Ok(())
    }

    fn delete(&self, uuid: Uuid) -> Result<()> {
        self.check_writable("delete")?;
        let object = self.resolve_uuid(uuid)?;
        self.transport
            .delete(&object_endpoint(object.kind(), uuid))
            .map_err(not_found_as(uuid))?;
        self.invalidate_around(&object);
        tracing::info!(%uuid, "deleted");
        Ok(())
    }

    fn download(&self, uuid: Uuid) -> Result<PathBuf> {
        let object = self.resolve_uuid(uuid)?;
        let source = match &object {
            Object::DataFile(file) => file.download_url.clone().unwrap_or_else(|| {
                format!("{}download/", object_endpoint(ObjectKind::DataFile, uuid))
            }),
            Object::FormatSpec(_) => {
                format!("{}download/", object_endpoint(ObjectKind::FormatSpec, uuid))
            }
            _ => return self.download_path(&object),
        };
        let target = self.download_path(&object)?;
        let bytes = self.transport.get_bytes(&source)?;

        fs::create_dir_all(&self.download_dir).map_err(|e| {
            InsDbError::Transport(format!("cannot create {}: {e}", self.download_dir.display()))
        })?;
        fs::write(&target, &bytes).map_err(|e| {
            InsDbError::Transport(format!("cannot write {}: {e}", target.display()))
        })?;
        tracing::info!(%uuid, path = %target.display(), bytes = bytes.len(), "downloaded");
        Ok(target)
    }

    fn entity(&self, uuid: Uuid) -> Result<Entity> {
        match self.fetch_as(uuid, ObjectKind::Entity)? {
            Object::Entity(entity) => Ok(entity),
            other => Err(kind_mismatch(&other, ObjectKind::Entity)),
        }
    }

    fn quantity(&self, uuid: Uuid) -> Result<Quantity> {
        match self.fetch_as(uuid, ObjectKind::Quantity)? {
            Object::Quantity(quantity) => Ok(quantity),
            other => Err(kind_mismatch(&other, ObjectKind::Quantity)),
        }
    }

    fn data_file(&self, uuid: Uuid) -> Result<DataFile> {
        match self.fetch_as(uuid, ObjectKind::DataFile)? {
            Object::DataFile(file) => Ok(file),
            other => Err(kind_mismatch(&other, ObjectKind::DataFile)),
        }
    }

    fn releases_containing(&self, data_file: Uuid) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        for tag in self.data_file(data_file)?.release_tags {
            if let Some(release) = self.release(&tag)? {
                releases.push(release);
            }
        }
        releases.sort_by(|a, b| {
            a.release_date
                .cmp(&b.release_date)
                .then_with(|| a.tag.cmp(&b.tag))
        });
        Ok(releases)
    }
}
