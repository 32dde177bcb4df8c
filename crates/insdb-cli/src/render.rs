//! Text rendering of catalog objects for the shell.

use anyhow::Result;
use colored::Colorize;
use insdb_core::path::{canonical_path, entity_path, release_manifest, release_path};
use insdb_core::{
    Backend, ChildEntry, ChildKind, DataFile, Entity, FormatSpecification, InsDbError, Object,
    Quantity, Release,
};
use std::io::Write;
use uuid::Uuid;

const LABEL_WIDTH: usize = 14;
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn field(out: &mut impl Write, label: &str, value: impl std::fmt::Display) -> Result<()> {
    writeln!(out, "{}{value}", format!("{label:<width$}", width = LABEL_WIDTH).bold())?;
    Ok(())
}

fn child_name(entry: &ChildEntry) -> String {
    match entry.kind {
        ChildKind::Entity => format!("{}/", entry.name).blue().bold().to_string(),
        ChildKind::Quantity => entry.name.green().to_string(),
    }
}

/// `ls` output: one row per child, UUID column first unless suppressed.
pub fn children(out: &mut impl Write, entries: &[ChildEntry], show_uuids: bool) -> Result<()> {
    for entry in entries {
        if show_uuids {
            writeln!(out, "{}  {}", entry.uuid.to_string().dimmed(), child_name(entry))?;
        } else {
            writeln!(out, "{}", child_name(entry))?;
        }
    }
    Ok(())
}

/// `tree` output: the whole subtree under `entity`, entities before their quantities.
pub fn tree(out: &mut impl Write, backend: &dyn Backend, entity: Option<Uuid>) -> Result<()> {
    writeln!(out, "{}", entity_path(backend, entity)?.blue().bold())?;
    tree_level(out, backend, entity, "")
}

fn tree_level(
    out: &mut impl Write,
    backend: &dyn Backend,
    entity: Option<Uuid>,
    indent: &str,
) -> Result<()> {
    let entries = backend.children(entity)?;
    for (i, entry) in entries.iter().enumerate() {
        let last = i + 1 == entries.len();
        let (branch, nested) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        let uuid = entry.uuid.to_string().dimmed();
        writeln!(out, "{indent}{branch}{}  {uuid}", child_name(entry))?;
        if entry.kind == ChildKind::Entity {
            tree_level(out, backend, Some(entry.uuid), &format!("{indent}{nested}"))?;
        }
    }
    Ok(())
}

pub fn object(out: &mut impl Write, backend: &dyn Backend, object: &Object) -> Result<()> {
    match object {
        Object::Entity(entity) => show_entity(out, backend, entity),
        Object::Quantity(quantity) => show_quantity(out, backend, quantity),
        Object::DataFile(data_file) => show_data_file(out, backend, data_file),
        Object::FormatSpec(spec) => show_format_spec(out, backend, spec),
    }
}

fn show_entity(out: &mut impl Write, backend: &dyn Backend, entity: &Entity) -> Result<()> {
    field(out, "entity", &entity.name)?;
    field(out, "uuid", entity.uuid)?;
    field(out, "path", entity_path(backend, Some(entity.uuid))?)?;
    field(out, "parent", entity_path(backend, entity.parent)?)?;
    let entries = backend.children(Some(entity.uuid))?;
    if !entries.is_empty() {
        writeln!(out)?;
        children(out, &entries, true)?;
    }
    Ok(())
}

fn show_quantity(out: &mut impl Write, backend: &dyn Backend, quantity: &Quantity) -> Result<()> {
    field(out, "quantity", &quantity.name)?;
    field(out, "uuid", quantity.uuid)?;
    field(out, "path", canonical_path(backend, &Object::Quantity(quantity.clone()))?)?;
    match backend.resolve_uuid(quantity.format_spec)? {
        Object::FormatSpec(spec) => field(
            out,
            "format spec",
            format!("{} {} ({})", spec.document_ref, spec.title, spec.uuid),
        )?,
        other => field(out, "format spec", other.uuid())?,
    }

    let versions = backend.versions(quantity)?;
    writeln!(out)?;
    if versions.is_empty() {
        writeln!(out, "{}", "no data files".dimmed())?;
        return Ok(());
    }
    let newest = versions.last().map(|d| d.uuid);
    for data_file in &versions {
        let mut line = format!(
            "{}  {}  {}",
            data_file.uuid,
            data_file.upload_date.format(DATE_FORMAT),
            data_file.name
        );
        if !data_file.release_tags.is_empty() {
            let tags: Vec<&str> = data_file.release_tags.iter().map(String::as_str).collect();
            line.push_str(&format!("  [{}]", tags.join(", ")));
        }
        if Some(data_file.uuid) == newest {
            writeln!(out, "{}  {}", line, "newest".yellow())?;
        } else {
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}

fn show_data_file(
    out: &mut impl Write,
    backend: &dyn Backend,
    data_file: &DataFile,
) -> Result<()> {
    let quantity_path = canonical_path(backend, &Object::DataFile(data_file.clone()))?;
    field(out, "data file", &data_file.name)?;
    field(out, "uuid", data_file.uuid)?;
    field(out, "quantity", quantity_path)?;
    field(out, "uploaded", data_file.upload_date.format(DATE_FORMAT))?;
    field(out, "spec version", &data_file.spec_version)?;
    if let Some(comment) = &data_file.comment {
        field(out, "comment", comment)?;
    }
    field(out, "metadata", if data_file.metadata.is_some() { "yes" } else { "no" })?;
    match backend.local_copy(data_file.uuid) {
        Ok(path) => field(out, "local copy", path.display())?,
        Err(InsDbError::NoLocalCopy(_)) => field(out, "local copy", "-".dimmed())?,
        Err(e) => return Err(e.into()),
    }
    if let Some(plot) = &data_file.plot_file {
        let mime = data_file.plot_mime_type.as_deref().unwrap_or("unknown type");
        field(out, "plot", format!("{} ({mime})", plot.display()))?;
    }

    if !data_file.dependencies.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "dependencies".bold())?;
        for dependency in &data_file.dependencies {
            match backend.resolve_uuid(*dependency) {
                Ok(object) => writeln!(out, "  {dependency}  {}", object.name())?,
                Err(e) => writeln!(out, "  {dependency}  {}", e.to_string().red())?,
            }
        }
    }

    let releases = backend.releases_containing(data_file.uuid)?;
    if !releases.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "releases".bold())?;
        for release in &releases {
            writeln!(out, "  {}", release_path(backend, &release.tag, data_file.uuid)?)?;
        }
    }
    Ok(())
}

fn show_format_spec(
    out: &mut impl Write,
    backend: &dyn Backend,
    spec: &FormatSpecification,
) -> Result<()> {
    field(out, "format spec", &spec.document_ref)?;
    field(out, "uuid", spec.uuid)?;
    field(out, "title", &spec.title)?;
    field(out, "document type", &spec.doc_mime_type)?;
    field(out, "file type", &spec.file_mime_type)?;
    match backend.local_copy(spec.uuid) {
        Ok(path) => field(out, "document", path.display())?,
        Err(InsDbError::NoLocalCopy(_)) => field(out, "document", "-".dimmed())?,
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub fn metadata(out: &mut impl Write, data_file: &DataFile) -> Result<()> {
    match &data_file.metadata {
        Some(value) => writeln!(out, "{}", serde_json::to_string_pretty(value)?)?,
        None => writeln!(out, "no metadata for {}", data_file.uuid)?,
    }
    Ok(())
}

pub fn releases(out: &mut impl Write, releases: &[Release]) -> Result<()> {
    for release in releases {
        writeln!(
            out,
            "{}  {}  {}",
            release.tag.bold(),
            release.release_date.format("%Y-%m-%d"),
            release.comment
        )?;
    }
    Ok(())
}

/// `releases TAG`: header plus one `uuid  path` row per pinned data file,
/// so two pinned versions of one quantity show as two rows.
pub fn release(out: &mut impl Write, backend: &dyn Backend, release: &Release) -> Result<()> {
    field(out, "release", &release.tag)?;
    field(out, "date", release.release_date.format("%Y-%m-%d"))?;
    if !release.comment.is_empty() {
        field(out, "comment", &release.comment)?;
    }
    writeln!(out)?;
    for (path, uuid) in release_manifest(backend, release)? {
        writeln!(out, "{}  {path}", uuid.to_string().dimmed())?;
    }
    Ok(())
}
