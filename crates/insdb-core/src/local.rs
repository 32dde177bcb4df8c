//! Read-only backend over a snapshot held entirely in memory.
//!
//! The graph is linked and validated once in [`LocalBackend::new`]; after that
//! every lookup is a hash-map probe and the backend can be shared freely
//! between threads.

use crate::backend::{Backend, Capabilities};
use crate::error::{InsDbError, Result};
use crate::model::{
    sort_children, ChildEntry, ChildKind, DataFile, Entity, Object, ObjectKind, Quantity, Release,
};
use crate::path;
use crate::snapshot::{self, SnapshotGraph};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ============================================================================
// Index types
// ============================================================================

/// Children of one entity (or of the root), sorted, plus a name index.
#[derive(Debug, Default)]
struct Level {
    listing: Vec<ChildEntry>,
    by_name: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct LocalBackend {
    location: PathBuf,
    objects: HashMap<Uuid, Object>,
    levels: HashMap<Option<Uuid>, Level>,
    /// Sorted by release date.
    releases: Vec<Release>,
    release_index: HashMap<String, usize>,
    by_kind: HashMap<ObjectKind, Vec<Uuid>>,
}

fn invalid(message: impl Into<String>) -> InsDbError {
    InsDbError::Snapshot(message.into())
}

// ============================================================================
// Construction
// ============================================================================

impl LocalBackend {
    /// Loads `<dir>/schema.json` (or the given schema file) and builds the backend.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let graph = snapshot::load(path.as_ref())?;
        let backend = Self::new(graph)?;
        tracing::info!(
            location = %backend.location.display(),
            objects = backend.objects.len(),
            releases = backend.releases.len(),
            "opened snapshot"
        );
        Ok(backend)
    }

    /// Links back-references and validates the graph.
    ///
    /// Children lists, hosted quantities, version lists and release tags are
    /// recomputed from the forward references, so whatever the input carried
    /// in those fields is ignored.
    pub fn new(graph: SnapshotGraph) -> Result<Self> {
        let SnapshotGraph {
            location,
            format_specs,
            mut entities,
            mut quantities,
            mut data_files,
            mut releases,
        } = graph;

        let mut kinds: HashMap<Uuid, ObjectKind> = HashMap::new();
        let declared = format_specs
            .iter()
            .map(|spec| (spec.uuid, ObjectKind::FormatSpec))
            .chain(entities.iter().map(|e| (e.uuid, ObjectKind::Entity)))
            .chain(quantities.iter().map(|q| (q.uuid, ObjectKind::Quantity)))
            .chain(data_files.iter().map(|d| (d.uuid, ObjectKind::DataFile)));
        for (uuid, kind) in declared {
            if let Some(previous) = kinds.insert(uuid, kind) {
                return Err(invalid(format!(
                    "UUID {uuid} is used by a {previous} and by a {kind}"
                )));
            }
        }

        let expect = |uuid: Uuid, kind: ObjectKind, referrer: &str| -> Result<()> {
            match kinds.get(&uuid) {
                Some(found) if *found == kind => Ok(()),
                Some(found) => Err(invalid(format!(
                    "{referrer} refers to {uuid}, which is a {found}, not a {kind}"
                ))),
                None => Err(invalid(format!("{referrer} refers to unknown {kind} {uuid}"))),
            }
        };

        // Entities: parents must exist and the forest must be acyclic.
        let mut children_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for entity in &entities {
            if let Some(parent) = entity.parent {
                expect(parent, ObjectKind::Entity, &format!("entity '{}'", entity.name))?;
                children_of.entry(parent).or_default().push(entity.uuid);
            }
        }
        check_acyclic(&entities)?;

        // Quantities: one parent entity, one format specification.
        let mut quantities_of: HashMap<Uuid, BTreeSet<Uuid>> = HashMap::new();
        for quantity in &quantities {
            let referrer = format!("quantity '{}'", quantity.name);
            expect(quantity.entity, ObjectKind::Entity, &referrer)?;
            expect(quantity.format_spec, ObjectKind::FormatSpec, &referrer)?;
            quantities_of
                .entry(quantity.entity)
                .or_default()
                .insert(quantity.uuid);
        }
        for entity in &mut entities {
            entity.children = children_of.remove(&entity.uuid).unwrap_or_default();
            entity.quantities = quantities_of.remove(&entity.uuid).unwrap_or_default();
        }

        // Releases: unique tags, members must be data files.
        let mut tags_of: HashMap<Uuid, BTreeSet<String>> = HashMap::new();
        let mut seen_tags = HashSet::new();
        for release in &releases {
            if !seen_tags.insert(release.tag.clone()) {
                return Err(invalid(format!("release tag '{}' is used twice", release.tag)));
            }
            for member in &release.data_files {
                expect(*member, ObjectKind::DataFile, &format!("release '{}'", release.tag))?;
                tags_of.entry(*member).or_default().insert(release.tag.clone());
            }
        }

        // Data files: owning quantity must exist; versions are ordered by upload date.
        let mut versions_of: HashMap<Uuid, Vec<(DateTime<Utc>, Uuid)>> = HashMap::new();
        for data_file in &mut data_files {
            expect(
                data_file.quantity,
                ObjectKind::Quantity,
                &format!("data file {}", data_file.uuid),
            )?;
            for dependency in &data_file.dependencies {
                if kinds.get(dependency) != Some(&ObjectKind::DataFile) {
                    tracing::warn!(
                        data_file = %data_file.uuid,
                        dependency = %dependency,
                        "data file depends on an object that is not in the snapshot"
                    );
                }
            }
            data_file.release_tags = tags_of.remove(&data_file.uuid).unwrap_or_default();
            versions_of
                .entry(data_file.quantity)
                .or_default()
                .push((data_file.upload_date, data_file.uuid));
        }
        for quantity in &mut quantities {
            let mut versions = versions_of.remove(&quantity.uuid).unwrap_or_default();
            versions.sort();
            quantity.data_files = versions.into_iter().map(|(_, uuid)| uuid).collect();
        }

        let levels = build_levels(&entities, &quantities)?;

        releases.sort_by(|a, b| {
            a.release_date
                .cmp(&b.release_date)
                .then_with(|| a.tag.cmp(&b.tag))
        });
        let release_index = releases
            .iter()
            .enumerate()
            .map(|(index, release)| (release.tag.clone(), index))
            .collect();

        let mut by_kind: HashMap<ObjectKind, Vec<Uuid>> = HashMap::new();
        for (uuid, kind) in &kinds {
            by_kind.entry(*kind).or_default().push(*uuid);
        }
        for uuids in by_kind.values_mut() {
            uuids.sort();
        }

        let objects = format_specs
            .into_iter()
            .map(Object::FormatSpec)
            .chain(entities.into_iter().map(Object::Entity))
            .chain(quantities.into_iter().map(Object::Quantity))
            .chain(data_files.into_iter().map(Object::DataFile))
            .map(|object| (object.uuid(), object))
            .collect();

        Ok(Self {
            location,
            objects,
            levels,
            releases,
            release_index,
            by_kind,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    fn check_entity(&self, entity: Option<Uuid>) -> Result<()> {
        let Some(uuid) = entity else {
            return Ok(());
        };
        match self.objects.get(&uuid) {
            Some(Object::Entity(_)) => Ok(()),
            Some(other) => Err(InsDbError::NotAnEntity(other.name().to_string())),
            None => Err(InsDbError::NotFound(uuid)),
        }
    }
}

fn check_acyclic(entities: &[Entity]) -> Result<()> {
    let parent_of: HashMap<Uuid, Option<Uuid>> =
        entities.iter().map(|e| (e.uuid, e.parent)).collect();
    for entity in entities {
        let mut seen = HashSet::new();
        let mut next = Some(entity.uuid);
        while let Some(uuid) = next {
            if !seen.insert(uuid) {
                return Err(invalid(format!(
                    "entity '{}' is its own ancestor",
                    entity.name
                )));
            }
            next = parent_of.get(&uuid).copied().flatten();
        }
    }
    Ok(())
}

/// Entity and quantity names share one namespace per parent.
fn build_levels(
    entities: &[Entity],
    quantities: &[Quantity],
) -> Result<HashMap<Option<Uuid>, Level>> {
    let mut levels: HashMap<Option<Uuid>, Level> = HashMap::new();
    let entries = entities
        .iter()
        .map(|e| {
            let entry = ChildEntry {
                uuid: e.uuid,
                name: e.name.clone(),
                kind: ChildKind::Entity,
            };
            (e.parent, entry)
        })
        .chain(quantities.iter().map(|q| {
            let entry = ChildEntry {
                uuid: q.uuid,
                name: q.name.clone(),
                kind: ChildKind::Quantity,
            };
            (Some(q.entity), entry)
        }));
    for (parent, entry) in entries {
        if let Err(reason) = path::check_name(&entry.name, parent.is_none()) {
            return Err(invalid(format!(
                "'{}' ({}) cannot be addressed by path: {reason}",
                entry.name, entry.uuid
            )));
        }
        levels.entry(parent).or_default().listing.push(entry);
    }

    for (parent, level) in &mut levels {
        sort_children(&mut level.listing);
        for (index, entry) in level.listing.iter().enumerate() {
            if level.by_name.insert(entry.name.clone(), index).is_some() {
                let place = match parent {
                    Some(uuid) => format!("entity {uuid}"),
                    None => "the root".to_string(),
                };
                return Err(invalid(format!(
                    "name '{}' is used twice under {place}",
                    entry.name
                )));
            }
        }
    }
    Ok(levels)
}

// ============================================================================
// Backend
// ============================================================================

impl Backend for LocalBackend {
    fn describe(&self) -> String {
        self.location.display().to_string()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn resolve_uuid(&self, uuid: Uuid) -> Result<Object> {
        self.objects
            .get(&uuid)
            .cloned()
            .ok_or(InsDbError::NotFound(uuid))
    }

    fn children(&self, entity: Option<Uuid>) -> Result<Vec<ChildEntry>> {
        self.check_entity(entity)?;
        Ok(self
            .levels
            .get(&entity)
            .map(|level| level.listing.clone())
            .unwrap_or_default())
    }

    fn child(&self, entity: Option<Uuid>, name: &str) -> Result<Option<ChildEntry>> {
        self.check_entity(entity)?;
        Ok(self.levels.get(&entity).and_then(|level| {
            level
                .by_name
                .get(name)
                .map(|index| level.listing[*index].clone())
        }))
    }

    fn releases(&self) -> Result<Vec<Release>> {
        Ok(self.releases.clone())
    }

    fn release(&self, tag: &str) -> Result<Option<Release>> {
        Ok(self
            .release_index
            .get(tag)
            .map(|index| self.releases[*index].clone()))
    }

    fn known_uuids(&self, kind: ObjectKind) -> Vec<Uuid> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    fn local_copy(&self, uuid: Uuid) -> Result<PathBuf> {
        let candidate = match self.resolve_uuid(uuid)? {
            Object::DataFile(DataFile { local_path, .. }) => local_path,
            Object::FormatSpec(spec) => spec.local_doc_path,
            other => {
                return Err(InsDbError::invalid_path(
                    uuid.to_string(),
                    format!("{} \"{}\" has no file content", other.kind(), other.name()),
                ))
            }
        };
        match candidate {
            Some(path) if path.is_file() => Ok(path),
            Some(path) => {
                tracing::debug!(%uuid, path = %path.display(), "local copy is missing on disk");
                Err(InsDbError::NoLocalCopy(uuid))
            }
            None => Err(InsDbError::NoLocalCopy(uuid)),
        }
    }

    fn releases_containing(&self, data_file: Uuid) -> Result<Vec<Release>> {
        let tags = self.data_file(data_file)?.release_tags;
        Ok(self
            .releases
            .iter()
            .filter(|release| tags.contains(&release.tag))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormatSpecification;
    use chrono::TimeZone;

    fn spec(id: u128) -> FormatSpecification {
        FormatSpecification {
            uuid: Uuid::from_u128(id),
            document_ref: format!("DOC-{id}"),
            title: String::new(),
            doc_mime_type: String::new(),
            file_mime_type: String::new(),
            local_doc_path: None,
        }
    }

    fn entity(id: u128, name: &str, parent: Option<u128>) -> Entity {
        Entity {
            uuid: Uuid::from_u128(id),
            name: name.to_string(),
            parent: parent.map(Uuid::from_u128),
            children: Vec::new(),
            quantities: BTreeSet::new(),
        }
    }

    fn quantity(id: u128, name: &str, entity: u128) -> Quantity {
        Quantity {
            uuid: Uuid::from_u128(id),
            name: name.to_string(),
            entity: Uuid::from_u128(entity),
            format_spec: Uuid::from_u128(1),
            data_files: Vec::new(),
        }
    }

    fn data_file(id: u128, quantity: u128, year: i32) -> DataFile {
        DataFile {
            uuid: Uuid::from_u128(id),
            name: "file.csv".to_string(),
            quantity: Uuid::from_u128(quantity),
            upload_date: Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap(),
            spec_version: "1.0".to_string(),
            comment: None,
            metadata: None,
            local_path: None,
            download_url: None,
            dependencies: BTreeSet::new(),
            plot_file: None,
            plot_mime_type: None,
            release_tags: BTreeSet::new(),
        }
    }

    fn graph() -> SnapshotGraph {
        SnapshotGraph {
            location: PathBuf::from("/snap"),
            format_specs: vec![spec(1)],
            entities: vec![
                entity(10, "LFI", None),
                entity(11, "frequency_030_ghz", Some(10)),
                entity(12, "HFI", None),
            ],
            quantities: vec![quantity(20, "bandpass", 11), quantity(21, "beam", 11)],
            data_files: vec![data_file(31, 20, 2020), data_file(30, 20, 2017)],
            releases: Vec::new(),
        }
    }

    #[test]
    fn back_references_are_recomputed() {
        let backend = LocalBackend::new(graph()).unwrap();
        let lfi = backend.entity(Uuid::from_u128(10)).unwrap();
        assert_eq!(lfi.children, vec![Uuid::from_u128(11)]);

        let bandpass = backend.quantity(Uuid::from_u128(20)).unwrap();
        assert_eq!(bandpass.data_files, vec![Uuid::from_u128(30), Uuid::from_u128(31)]);
    }

    #[test]
    fn children_are_sorted_and_indexed() {
        let backend = LocalBackend::new(graph()).unwrap();
        let roots: Vec<_> = backend
            .children(None)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(roots, vec!["HFI", "LFI"]);

        let beam = backend
            .child(Some(Uuid::from_u128(11)), "beam")
            .unwrap()
            .unwrap();
        assert_eq!(beam.kind, ChildKind::Quantity);
        assert!(backend.child(Some(Uuid::from_u128(11)), "nope").unwrap().is_none());
    }

    #[test]
    fn entity_and_quantity_may_not_share_a_name() {
        let mut g = graph();
        g.entities.push(entity(13, "beam", Some(11)));
        let err = LocalBackend::new(g).unwrap_err();
        assert!(matches!(err, InsDbError::Snapshot(msg) if msg.contains("'beam'")));
    }

    #[test]
    fn names_no_path_can_reach_are_rejected() {
        let unreachable = [
            entity(13, "releases", None),
            entity(13, "..", Some(10)),
            entity(13, ".", Some(10)),
            entity(13, "a/b", Some(10)),
            entity(13, "00000000-0000-0000-0000-00000000000d", Some(10)),
        ];
        for bad in unreachable {
            let name = bad.name.clone();
            let mut g = graph();
            g.entities.push(bad);
            let err = LocalBackend::new(g).unwrap_err();
            assert!(matches!(err, InsDbError::Snapshot(_)), "{name}");
        }

        let mut g = graph();
        g.quantities.push(quantity(22, "..", 11));
        assert!(matches!(LocalBackend::new(g), Err(InsDbError::Snapshot(_))));

        // Only the top level reserves `releases`.
        let mut g = graph();
        g.entities.push(entity(13, "releases", Some(10)));
        let backend = LocalBackend::new(g).unwrap();
        let found = backend.resolve_path("/LFI/releases", None).unwrap();
        assert_eq!(found.uuid(), Uuid::from_u128(13));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut g = graph();
        g.entities[0].parent = Some(Uuid::from_u128(11));
        assert!(matches!(LocalBackend::new(g), Err(InsDbError::Snapshot(_))));
    }

    #[test]
    fn dangling_quantity_reference_is_rejected() {
        let mut g = graph();
        g.data_files.push(data_file(32, 99, 2021));
        assert!(matches!(LocalBackend::new(g), Err(InsDbError::Snapshot(_))));
    }

    #[test]
    fn mutations_are_denied() {
        let backend = LocalBackend::new(graph()).unwrap();
        let err = backend.delete(Uuid::from_u128(10)).unwrap_err();
        assert!(matches!(err, InsDbError::PermissionDenied(_)));
        assert!(!backend.capabilities().writable);
    }

    #[test]
    fn missing_file_means_no_local_copy() {
        let backend = LocalBackend::new(graph()).unwrap();
        assert!(matches!(
            backend.local_copy(Uuid::from_u128(30)),
            Err(InsDbError::NoLocalCopy(_))
        ));
    }
}
