//! Reader for flat-file snapshots.
//!
//! A snapshot is a directory holding `schema.json` plus the data files and
//! specification documents it points to:
//!
//! ```text
//! <dir>/schema.json
//! <dir>/data_files/...
//! <dir>/format_spec/...
//! ```
//!
//! Entities are nested through `children`; everything else is a flat list that
//! refers to other objects by UUID. Linking and validation happen in
//! [`crate::local::LocalBackend::new`].

use crate::error::{InsDbError, Result};
use crate::model::{DataFile, Entity, FormatSpecification, Quantity, Release};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SCHEMA_FILE_NAME: &str = "schema.json";

/// Objects read from a snapshot, with forward references only.
#[derive(Debug, Clone, Default)]
pub struct SnapshotGraph {
    pub location: PathBuf,
    pub format_specs: Vec<FormatSpecification>,
    pub entities: Vec<Entity>,
    pub quantities: Vec<Quantity>,
    pub data_files: Vec<DataFile>,
    pub releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    format_specifications: Vec<RawFormatSpec>,
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    quantities: Vec<RawQuantity>,
    #[serde(default)]
    data_files: Vec<RawDataFile>,
    #[serde(default)]
    releases: Vec<RawRelease>,
}

#[derive(Debug, Deserialize)]
struct RawFormatSpec {
    uuid: Uuid,
    #[serde(default)]
    document_ref: String,
    #[serde(default)]
    title: String,
    doc_file_name: Option<String>,
    #[serde(default)]
    doc_mime_type: String,
    #[serde(default)]
    file_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    uuid: Uuid,
    name: String,
    #[serde(default)]
    children: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawQuantity {
    uuid: Uuid,
    #[serde(default)]
    name: String,
    format_spec: Option<Uuid>,
    entity: Uuid,
}

#[derive(Debug, Deserialize)]
struct RawDataFile {
    uuid: Uuid,
    #[serde(default)]
    name: String,
    upload_date: String,
    file_name: Option<String>,
    metadata: Option<serde_json::Value>,
    quantity: Uuid,
    #[serde(default)]
    spec_version: String,
    #[serde(default)]
    dependencies: Vec<Uuid>,
    plot_file: Option<String>,
    plot_mime_type: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelease {
    tag: String,
    release_date: String,
    #[serde(default, alias = "comments")]
    comment: String,
    #[serde(default)]
    data_files: Vec<Uuid>,
}

/// Reads a snapshot from a directory or from a `schema.json` path.
pub fn load(path: &Path) -> Result<SnapshotGraph> {
    let (location, schema_path) = if path.is_dir() {
        (path.to_path_buf(), path.join(SCHEMA_FILE_NAME))
    } else {
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (parent, path.to_path_buf())
    };

    if !schema_path.is_file() {
        return Err(InsDbError::Snapshot(format!(
            "no valid schema file found in \"{}\"",
            location.display()
        )));
    }

    let text = fs::read_to_string(&schema_path).map_err(|e| {
        InsDbError::Snapshot(format!("failed to read {}: {e}", schema_path.display()))
    })?;
    parse_schema(&text, &location)
}

/// Parses the content of a `schema.json`; relative file names are joined to `location`.
pub fn parse_schema(text: &str, location: &Path) -> Result<SnapshotGraph> {
    let raw: RawSchema = serde_json::from_str(text)
        .map_err(|e| InsDbError::Snapshot(format!("malformed schema: {e}")))?;

    let mut graph = SnapshotGraph {
        location: location.to_path_buf(),
        ..SnapshotGraph::default()
    };

    graph.format_specs = raw
        .format_specifications
        .into_iter()
        .map(|spec| FormatSpecification {
            uuid: spec.uuid,
            document_ref: spec.document_ref,
            title: spec.title,
            doc_mime_type: spec.doc_mime_type,
            file_mime_type: spec.file_mime_type,
            local_doc_path: spec.doc_file_name.map(|name| location.join(name)),
        })
        .collect();

    flatten_entities(raw.entities, None, &mut graph.entities);

    graph.quantities = raw
        .quantities
        .into_iter()
        .map(|quantity| {
            let format_spec = quantity.format_spec.ok_or_else(|| {
                InsDbError::Snapshot(format!(
                    "quantity {} (\"{}\") has no format specification",
                    quantity.uuid, quantity.name
                ))
            })?;
            Ok(Quantity {
                uuid: quantity.uuid,
                name: quantity.name,
                entity: quantity.entity,
                format_spec,
                data_files: Vec::new(),
            })
        })
        .collect::<Result<_>>()?;

    graph.data_files = raw
        .data_files
        .into_iter()
        .map(|file| {
            Ok(DataFile {
                uuid: file.uuid,
                name: file.name,
                quantity: file.quantity,
                upload_date: parse_timestamp(&file.upload_date)?,
                spec_version: file.spec_version,
                comment: file.comment.filter(|c| !c.is_empty()),
                metadata: file.metadata.filter(|m| !m.is_null()),
                local_path: file.file_name.map(|name| location.join(name)),
                download_url: None,
                dependencies: file.dependencies.into_iter().collect(),
                plot_file: file.plot_file.map(|name| location.join(name)),
                plot_mime_type: file.plot_mime_type.filter(|m| !m.is_empty()),
                release_tags: BTreeSet::new(),
            })
        })
        .collect::<Result<_>>()?;

    graph.releases = raw
        .releases
        .into_iter()
        .map(|release| {
            Ok(Release {
                tag: release.tag,
                release_date: parse_timestamp(&release.release_date)?,
                comment: release.comment,
                data_files: release.data_files.into_iter().collect(),
            })
        })
        .collect::<Result<_>>()?;

    Ok(graph)
}

fn flatten_entities(raw: Vec<RawEntity>, parent: Option<Uuid>, out: &mut Vec<Entity>) {
    for entity in raw {
        out.push(Entity {
            uuid: entity.uuid,
            name: entity.name,
            parent,
            children: entity.children.iter().map(|child| child.uuid).collect(),
            quantities: BTreeSet::new(),
        });
        flatten_entities(entity.children, Some(entity.uuid), out);
    }
}

/// Accepts RFC 3339, naive ISO date-times (taken as UTC), and plain dates.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(InsDbError::Snapshot(format!("invalid timestamp \"{text}\"")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_in_several_shapes() {
        let midnight = Utc.with_ymd_and_hms(2017, 9, 26, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2017-09-26T00:00:00Z").unwrap(), midnight);
        assert_eq!(parse_timestamp("2017-09-26T02:00:00+02:00").unwrap(), midnight);
        assert_eq!(parse_timestamp("2017-09-26T00:00:00").unwrap(), midnight);
        assert_eq!(parse_timestamp("2017-09-26").unwrap(), midnight);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn nested_entities_are_flattened_with_parents() {
        let text = r#"{
            "format_specifications": [],
            "entities": [
                {"uuid": "00000000-0000-0000-0000-000000000001", "name": "LFI",
                 "children": [
                    {"uuid": "00000000-0000-0000-0000-000000000002", "name": "frequency_030_ghz"}
                 ]}
            ]
        }"#;
        let graph = parse_schema(text, Path::new("/snap")).unwrap();
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.entities[0].parent, None);
        assert_eq!(graph.entities[0].children, vec![Uuid::from_u128(2)]);
        assert_eq!(graph.entities[1].parent, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn quantity_without_format_spec_is_rejected() {
        let text = r#"{
            "quantities": [
                {"uuid": "00000000-0000-0000-0000-000000000005", "name": "bandpass",
                 "entity": "00000000-0000-0000-0000-000000000001"}
            ]
        }"#;
        let err = parse_schema(text, Path::new("/snap")).unwrap_err();
        assert!(matches!(err, InsDbError::Snapshot(msg) if msg.contains("bandpass")));
    }

    #[test]
    fn relative_file_names_are_joined_to_the_snapshot() {
        let text = r#"{
            "data_files": [
                {"uuid": "00000000-0000-0000-0000-000000000009", "name": "bandpass.csv",
                 "upload_date": "2020-01-01T00:00:00Z",
                 "file_name": "data_files/bandpass.csv",
                 "quantity": "00000000-0000-0000-0000-000000000005",
                 "comment": ""}
            ]
        }"#;
        let graph = parse_schema(text, Path::new("/snap")).unwrap();
        let file = &graph.data_files[0];
        assert_eq!(file.local_path.as_deref(), Some(Path::new("/snap/data_files/bandpass.csv")));
        assert_eq!(file.comment, None);
    }
}
