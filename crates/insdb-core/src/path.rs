//! Slash-path resolution over any [`Backend`].
//!
//! Accepted forms:
//!
//! ```text
//! 3a29d860-2289-4691-82de-1fcb4adfff0e      bare UUID, wins over names
//! /entities/<uuid>                          typed UUID (also quantities, data_files, format_specs)
//! /HFI/frequency_217_ghz/bandpass           absolute, from the root
//! frequency_217_ghz/bandpass                relative to the base entity
//! ../LFI                                    `.` and `..` segments
//! /releases/planck2018/LFI/full_focal_plane release-relative
//! ```
//!
//! Release-relative paths walk the *live* entity tree; only the terminal
//! quantity is replaced by the data file the release pins. An entity segment
//! that the release does not mention is therefore still reachable, and a
//! quantity with no pinned version is an error.

use crate::backend::{kind_mismatch, Backend};
use crate::error::{InsDbError, Result};
use crate::model::{ChildKind, Object, ObjectKind, Release};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

pub const RELEASES_PREFIX: &str = "releases";

/// A parsed path, before any backend lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec<'a> {
    Uuid(Uuid),
    Typed { kind: ObjectKind, uuid: Uuid },
    Tree { absolute: bool, segments: Vec<&'a str> },
    Release { tag: &'a str, segments: Vec<&'a str> },
}

/// Where a path lands: the synthetic root above all top-level entities, or an object.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Root,
    Object(Object),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Root,
    Entity(Uuid),
    Quantity(Uuid),
}

pub fn parse(input: &str) -> Result<PathSpec<'_>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InsDbError::invalid_path(input, "empty path"));
    }

    let bare = trimmed.trim_matches('/');
    if let Ok(uuid) = Uuid::parse_str(bare) {
        return Ok(PathSpec::Uuid(uuid));
    }

    let absolute = trimmed.starts_with('/');
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    if absolute {
        if let [collection, id] = segments.as_slice() {
            let kind = ObjectKind::from_collection(collection);
            if let (Some(kind), Ok(uuid)) = (kind, Uuid::parse_str(id)) {
                return Ok(PathSpec::Typed { kind, uuid });
            }
        }

        if segments.first() == Some(&RELEASES_PREFIX) {
            let Some(tag) = segments.get(1) else {
                return Err(InsDbError::invalid_path(input, "missing release tag"));
            };
            return Ok(PathSpec::Release {
                tag: *tag,
                segments: segments[2..].to_vec(),
            });
        }
    }

    Ok(PathSpec::Tree { absolute, segments })
}

/// Checks that `name` can be spelled as a single path segment.
///
/// Names that would be read back as something else are refused: empty names,
/// names with a `/` or surrounding blanks, `.` and `..`, names that parse as a
/// UUID, and `releases` directly under the root.
pub fn check_name(name: &str, top_level: bool) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.trim() != name {
        return Err("name starts or ends with whitespace");
    }
    if name.contains('/') {
        return Err("name contains '/'");
    }
    if name == "." || name == ".." {
        return Err("'.' and '..' are relative path segments");
    }
    if Uuid::parse_str(name).is_ok() {
        return Err("name parses as a UUID");
    }
    if top_level && name == RELEASES_PREFIX {
        return Err("'releases' is reserved at the top level");
    }
    Ok(())
}

/// Resolves `input` to an object; the bare root is rejected.
pub fn resolve<B: Backend + ?Sized>(
    backend: &B,
    input: &str,
    base: Option<Uuid>,
) -> Result<Object> {
    match resolve_location(backend, input, base)? {
        Location::Object(object) => Ok(object),
        Location::Root => Err(InsDbError::invalid_path(input, "the root is not an object")),
    }
}

/// Resolves `input`, allowing the root itself as a result.
pub fn resolve_location<B: Backend + ?Sized>(
    backend: &B,
    input: &str,
    base: Option<Uuid>,
) -> Result<Location> {
    match parse(input)? {
        PathSpec::Uuid(uuid) => backend.resolve_uuid(uuid).map(Location::Object),
        PathSpec::Typed { kind, uuid } => {
            let object = backend.resolve_uuid(uuid)?;
            if object.kind() != kind {
                return Err(kind_mismatch(&object, kind));
            }
            Ok(Location::Object(object))
        }
        PathSpec::Tree { absolute, segments } => {
            let start = match (absolute, base) {
                (false, Some(entity)) => Cursor::Entity(entity),
                _ => Cursor::Root,
            };
            match walk(backend, input, start, &segments)? {
                Cursor::Root => Ok(Location::Root),
                Cursor::Entity(uuid) | Cursor::Quantity(uuid) => {
                    backend.resolve_uuid(uuid).map(Location::Object)
                }
            }
        }
        PathSpec::Release { tag, segments } => {
            let release = backend.release(tag)?.ok_or_else(|| {
                InsDbError::invalid_path(input, format!("unknown release '{tag}'"))
            })?;
            resolve_in_release(backend, input, &release, &segments).map(Location::Object)
        }
    }
}

fn resolve_in_release<B: Backend + ?Sized>(
    backend: &B,
    input: &str,
    release: &Release,
    segments: &[&str],
) -> Result<Object> {
    match walk(backend, input, Cursor::Root, segments)? {
        Cursor::Root => Err(InsDbError::invalid_path(
            input,
            "a release path must name an entity or a quantity",
        )),
        Cursor::Entity(uuid) => backend.resolve_uuid(uuid),
        Cursor::Quantity(uuid) => {
            let quantity = backend.quantity(uuid)?;
            let pinned = release.pinned_version(&quantity).ok_or_else(|| {
                InsDbError::invalid_path(
                    input,
                    format!(
                        "quantity '{}' has no data file in release '{}'",
                        quantity.name, release.tag
                    ),
                )
            })?;
            backend.resolve_uuid(pinned)
        }
    }
}

fn walk<B: Backend + ?Sized>(
    backend: &B,
    input: &str,
    start: Cursor,
    segments: &[&str],
) -> Result<Cursor> {
    let mut cursor = start;
    for segment in segments {
        cursor = match (*segment, cursor) {
            (".", _) => cursor,
            ("..", Cursor::Root) => Cursor::Root,
            ("..", Cursor::Entity(uuid)) => match backend.entity(uuid)?.parent {
                Some(parent) => Cursor::Entity(parent),
                None => Cursor::Root,
            },
            ("..", Cursor::Quantity(uuid)) => Cursor::Entity(backend.quantity(uuid)?.entity),
            (_, Cursor::Quantity(uuid)) => {
                let quantity = backend.quantity(uuid)?;
                return Err(InsDbError::invalid_path(
                    input,
                    format!("'{}' is a quantity and has no children", quantity.name),
                ));
            }
            (name, Cursor::Root) => child_named(backend, input, None, name)?,
            (name, Cursor::Entity(uuid)) => child_named(backend, input, Some(uuid), name)?,
        };
    }
    Ok(cursor)
}

fn child_named<B: Backend + ?Sized>(
    backend: &B,
    input: &str,
    parent: Option<Uuid>,
    name: &str,
) -> Result<Cursor> {
    let entry = backend
        .child(parent, name)?
        .ok_or_else(|| InsDbError::invalid_path(input, format!("no entry '{name}'")))?;
    Ok(match entry.kind {
        ChildKind::Entity => Cursor::Entity(entry.uuid),
        ChildKind::Quantity => Cursor::Quantity(entry.uuid),
    })
}

/// UUIDs from the top-level entity down to `entity`, inclusive.
pub fn ancestry<B: Backend + ?Sized>(backend: &B, entity: Uuid) -> Result<Vec<Uuid>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(entity);
    while let Some(uuid) = next {
        if !seen.insert(uuid) {
            return Err(InsDbError::invalid_path(
                entity.to_string(),
                "entity is its own ancestor",
            ));
        }
        chain.push(uuid);
        next = backend.entity(uuid)?.parent;
    }
    chain.reverse();
    Ok(chain)
}

/// Absolute path of an entity; `/` for the root.
pub fn entity_path<B: Backend + ?Sized>(backend: &B, entity: Option<Uuid>) -> Result<String> {
    let Some(entity) = entity else {
        return Ok("/".to_string());
    };
    let mut path = String::new();
    for uuid in ancestry(backend, entity)? {
        path.push('/');
        path.push_str(&backend.entity(uuid)?.name);
    }
    Ok(path)
}

/// Canonical path of any object.
///
/// Data files are not path segments, so they map to their quantity's path;
/// format specifications only have a typed path.
pub fn canonical_path<B: Backend + ?Sized>(backend: &B, object: &Object) -> Result<String> {
    match object {
        Object::Entity(entity) => entity_path(backend, Some(entity.uuid)),
        Object::Quantity(quantity) => {
            let parent = entity_path(backend, Some(quantity.entity))?;
            Ok(join(&parent, &quantity.name))
        }
        Object::DataFile(data_file) => {
            let quantity = backend.quantity(data_file.quantity)?;
            canonical_path(backend, &Object::Quantity(quantity))
        }
        Object::FormatSpec(spec) => Ok(format!(
            "/{}/{}",
            ObjectKind::FormatSpec.collection(),
            spec.uuid
        )),
    }
}

/// Path of a data file as seen through a release.
pub fn release_path<B: Backend + ?Sized>(
    backend: &B,
    tag: &str,
    data_file: Uuid,
) -> Result<String> {
    let object = backend.resolve_uuid(data_file)?;
    let path = canonical_path(backend, &object)?;
    Ok(format!("/{RELEASES_PREFIX}/{tag}{path}"))
}

/// (logical path, data file) for every member of a release, ordered by path.
///
/// A release may pin several versions of one quantity; each keeps its own row.
pub fn release_manifest<B: Backend + ?Sized>(
    backend: &B,
    release: &Release,
) -> Result<BTreeSet<(String, Uuid)>> {
    let mut manifest = BTreeSet::new();
    for uuid in &release.data_files {
        let object = backend.resolve_uuid(*uuid)?;
        manifest.insert((canonical_path(backend, &object)?, *uuid));
    }
    Ok(manifest)
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
