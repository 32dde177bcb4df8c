//! JSON payloads of the REST API and their conversion into model objects.
//!
//! Cross references are URLs whose last path segment is the UUID (or the
//! release tag); a bare UUID is accepted as well.

use chrono::{DateTime, Utc};
use insdb_core::snapshot::parse_timestamp;
use insdb_core::{
    DataFile, Entity, FormatSpecification, InsDbError, Object, ObjectKind, Quantity, Release,
    Result,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use url::Url;
use uuid::Uuid;

/// Last non-empty path segment of a reference.
pub fn last_segment(reference: &str) -> Option<String> {
    let path = match Url::parse(reference) {
        Ok(url) => url.path().to_string(),
        Err(_) => reference.to_string(),
    };
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

pub fn uuid_from_reference(reference: &str) -> Option<Uuid> {
    last_segment(reference).and_then(|segment| Uuid::parse_str(&segment).ok())
}

fn required_uuid(reference: &str, field: &str) -> Result<Uuid> {
    uuid_from_reference(reference).ok_or_else(|| {
        InsDbError::Transport(format!("field '{field}' is not a valid reference: {reference}"))
    })
}

fn uuid_set(references: &[String], field: &str) -> BTreeSet<Uuid> {
    references
        .iter()
        .filter_map(|reference| {
            let parsed = uuid_from_reference(reference);
            if parsed.is_none() {
                tracing::warn!(field, reference = %reference, "skipping unparseable reference");
            }
            parsed
        })
        .collect()
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| InsDbError::Transport(format!("malformed {what} payload: {e}")))
}

fn timestamp(text: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(text).map_err(|e| InsDbError::Transport(e.to_string()))
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct EntityPayload {
    uuid: String,
    name: String,
    parent: Option<String>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    quantities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QuantityPayload {
    uuid: String,
    name: String,
    format_spec: String,
    parent_entity: String,
    #[serde(default)]
    data_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FormatSpecPayload {
    uuid: String,
    #[serde(default)]
    document_ref: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    doc_mime_type: String,
    #[serde(default)]
    file_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct DataFilePayload {
    uuid: String,
    name: String,
    upload_date: String,
    quantity: String,
    #[serde(default)]
    spec_version: String,
    metadata: Option<Value>,
    comment: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    plot_mime_type: Option<String>,
    file_data: Option<String>,
    #[serde(default)]
    release_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    tag: String,
    #[serde(alias = "rel_date")]
    release_date: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    data_files: Vec<String>,
}

pub fn entity(value: Value) -> Result<Entity> {
    let payload: EntityPayload = decode(value, "entity")?;
    Ok(Entity {
        uuid: required_uuid(&payload.uuid, "uuid")?,
        name: payload.name,
        parent: payload.parent.as_deref().and_then(uuid_from_reference),
        children: uuid_set(&payload.children, "children").into_iter().collect(),
        quantities: uuid_set(&payload.quantities, "quantities"),
    })
}

/// Keeps the server's order of `data_files`, which lists versions by upload date.
pub fn quantity(value: Value) -> Result<Quantity> {
    let payload: QuantityPayload = decode(value, "quantity")?;
    Ok(Quantity {
        uuid: required_uuid(&payload.uuid, "uuid")?,
        name: payload.name,
        entity: required_uuid(&payload.parent_entity, "parent_entity")?,
        format_spec: required_uuid(&payload.format_spec, "format_spec")?,
        data_files: payload
            .data_files
            .iter()
            .filter_map(|reference| uuid_from_reference(reference))
            .collect(),
    })
}

pub fn format_spec(value: Value) -> Result<FormatSpecification> {
    let payload: FormatSpecPayload = decode(value, "format specification")?;
    Ok(FormatSpecification {
        uuid: required_uuid(&payload.uuid, "uuid")?,
        document_ref: payload.document_ref,
        title: payload.title,
        doc_mime_type: payload.doc_mime_type,
        file_mime_type: payload.file_mime_type,
        local_doc_path: None,
    })
}

pub fn data_file(value: Value) -> Result<DataFile> {
    let payload: DataFilePayload = decode(value, "data file")?;
    Ok(DataFile {
        uuid: required_uuid(&payload.uuid, "uuid")?,
        name: payload.name,
        quantity: required_uuid(&payload.quantity, "quantity")?,
        upload_date: timestamp(&payload.upload_date)?,
        spec_version: payload.spec_version,
        comment: payload.comment.filter(|c| !c.is_empty()),
        metadata: payload.metadata.filter(|m| !m.is_null()),
        local_path: None,
        download_url: payload.file_data,
        dependencies: uuid_set(&payload.dependencies, "dependencies"),
        plot_file: None,
        plot_mime_type: payload.plot_mime_type.filter(|m| !m.is_empty()),
        release_tags: payload
            .release_tags
            .iter()
            .filter_map(|reference| last_segment(reference))
            .collect(),
    })
}

pub fn release(value: Value) -> Result<Release> {
    let payload: ReleasePayload = decode(value, "release")?;
    Ok(Release {
        release_date: timestamp(&payload.release_date)?,
        data_files: uuid_set(&payload.data_files, "data_files"),
        tag: payload.tag,
        comment: payload.comment,
    })
}

pub fn object(kind: ObjectKind, value: Value) -> Result<Object> {
    Ok(match kind {
        ObjectKind::Entity => Object::Entity(entity(value)?),
        ObjectKind::Quantity => Object::Quantity(quantity(value)?),
        ObjectKind::DataFile => Object::DataFile(data_file(value)?),
        ObjectKind::FormatSpec => Object::FormatSpec(format_spec(value)?),
    })
}

/// Splits a listing into its items and the link to the next page.
///
/// Accepts both a plain array and the paginated `{"results", "next"}` shape.
pub fn page(value: Value) -> Result<(Vec<Value>, Option<String>)> {
    match value {
        Value::Array(items) => Ok((items, None)),
        Value::Object(mut map) => {
            let items = match map.remove("results") {
                Some(Value::Array(items)) => items,
                _ => return Err(InsDbError::Transport("listing without 'results'".to_string())),
            };
            let next = match map.remove("next") {
                Some(Value::String(next)) => Some(next),
                _ => None,
            };
            Ok((items, next))
        }
        other => Err(InsDbError::Transport(format!("unexpected listing payload: {other}"))),
    }
}

/// The UUID a create request returned.
pub fn created_uuid(value: &Value) -> Result<Uuid> {
    value
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(uuid_from_reference)
        .ok_or_else(|| InsDbError::Transport("create response carries no 'uuid'".to_string()))
}
