//! In-process stand-in for an InstrumentDB server.
//!
//! [`MemoryTransport`] answers the same endpoints as the real service from
//! JSON documents held in memory, records every request, and can be told to
//! fail the next one. It is seeded from a snapshot so that the local and
//! remote backends can be compared on the same catalog.

use crate::transport::{status_error, Transport};
use insdb_core::snapshot::SnapshotGraph;
use insdb_core::{ObjectKind, Result};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use uuid::Uuid;

pub const MEMORY_BASE: &str = "memory://insdb/api/";

const RELEASES: &str = "releases";

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Value>>,
    files: HashMap<String, Vec<u8>>,
    requests: Vec<String>,
    page_size: Option<usize>,
    fail_next: Option<(u16, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

fn reference(endpoint: &str) -> String {
    if endpoint.starts_with(MEMORY_BASE) {
        endpoint.to_string()
    } else {
        format!("{MEMORY_BASE}{}", endpoint.trim_start_matches('/'))
    }
}

fn object_reference(kind: ObjectKind, uuid: Uuid) -> String {
    reference(&format!("{}/{uuid}/", kind.collection()))
}

/// Path segments and the `page` query parameter of an endpoint.
fn parse_endpoint(endpoint: &str) -> (Vec<String>, usize) {
    let relative = endpoint.strip_prefix(MEMORY_BASE).unwrap_or(endpoint);
    let (path, query) = relative.split_once('?').unwrap_or((relative, ""));
    let page = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("page="))
        .and_then(|n| n.parse().ok())
        .unwrap_or(1);
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (segments, page)
}

/// Field of a payload that points at its owner, with the owner's collection
/// and the owner's field listing it.
fn owner_link(collection: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match collection {
        "entities" => Some(("parent", "entities", "children")),
        "quantities" => Some(("parent_entity", "entities", "quantities")),
        "data_files" => Some(("quantity", "quantities", "data_files")),
        _ => None,
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves the objects of `graph`; data files present on disk become downloadable.
    pub fn from_snapshot(graph: &SnapshotGraph) -> Self {
        let mut state = MemoryState::default();
        let mut put = |kind: ObjectKind, uuid: Uuid, value: Value| {
            state
                .collections
                .entry(kind.collection().to_string())
                .or_default()
                .insert(uuid.to_string(), value);
        };

        for spec in &graph.format_specs {
            put(
                ObjectKind::FormatSpec,
                spec.uuid,
                json!({
                    "uuid": spec.uuid.to_string(),
                    "document_ref": spec.document_ref,
                    "title": spec.title,
                    "doc_mime_type": spec.doc_mime_type,
                    "file_mime_type": spec.file_mime_type,
                }),
            );
        }

        for entity in &graph.entities {
            let children: Vec<String> = graph
                .entities
                .iter()
                .filter(|e| e.parent == Some(entity.uuid))
                .map(|e| object_reference(ObjectKind::Entity, e.uuid))
                .collect();
            let quantities: Vec<String> = graph
                .quantities
                .iter()
                .filter(|q| q.entity == entity.uuid)
                .map(|q| object_reference(ObjectKind::Quantity, q.uuid))
                .collect();
            put(
                ObjectKind::Entity,
                entity.uuid,
                json!({
                    "uuid": entity.uuid.to_string(),
                    "name": entity.name,
                    "parent": entity.parent.map(|p| object_reference(ObjectKind::Entity, p)),
                    "children": children,
                    "quantities": quantities,
                }),
            );
        }

        for quantity in &graph.quantities {
            let mut versions: Vec<_> = graph
                .data_files
                .iter()
                .filter(|d| d.quantity == quantity.uuid)
                .collect();
            versions.sort_by_key(|d| (d.upload_date, d.uuid));
            let data_files: Vec<String> = versions
                .iter()
                .map(|d| object_reference(ObjectKind::DataFile, d.uuid))
                .collect();
            put(
                ObjectKind::Quantity,
                quantity.uuid,
                json!({
                    "uuid": quantity.uuid.to_string(),
                    "name": quantity.name,
                    "format_spec": object_reference(ObjectKind::FormatSpec, quantity.format_spec),
                    "parent_entity": object_reference(ObjectKind::Entity, quantity.entity),
                    "data_files": data_files,
                }),
            );
        }

        let mut files = HashMap::new();
        for file in &graph.data_files {
            let tags: Vec<String> = graph
                .releases
                .iter()
                .filter(|r| r.data_files.contains(&file.uuid))
                .map(|r| reference(&format!("{RELEASES}/{}/", r.tag)))
                .collect();
            let download = format!("{}/{}/download/", ObjectKind::DataFile.collection(), file.uuid);
            if let Some(bytes) = file.local_path.as_ref().and_then(|p| fs::read(p).ok()) {
                files.insert(download.clone(), bytes);
            }
            put(
                ObjectKind::DataFile,
                file.uuid,
                json!({
                    "uuid": object_reference(ObjectKind::DataFile, file.uuid),
                    "name": file.name,
                    "upload_date": file.upload_date.to_rfc3339(),
                    "quantity": object_reference(ObjectKind::Quantity, file.quantity),
                    "spec_version": file.spec_version,
                    "metadata": file.metadata,
                    "comment": file.comment,
                    "dependencies": file
                        .dependencies
                        .iter()
                        .map(|d| object_reference(ObjectKind::DataFile, *d))
                        .collect::<Vec<_>>(),
                    "plot_mime_type": file.plot_mime_type,
                    "file_data": reference(&download),
                    "release_tags": tags,
                }),
            );
        }

        let releases = state.collections.entry(RELEASES.to_string()).or_default();
        for release in &graph.releases {
            releases.insert(
                release.tag.clone(),
                json!({
                    "tag": release.tag,
                    "rel_date": release.release_date.to_rfc3339(),
                    "comment": release.comment,
                    "data_files": release
                        .data_files
                        .iter()
                        .map(|d| object_reference(ObjectKind::DataFile, *d))
                        .collect::<Vec<_>>(),
                }),
            );
        }
        state.files = files;

        Self {
            state: Mutex::new(state),
        }
    }

    /// Splits listings into pages of `size` items.
    pub fn with_page_size(self, size: usize) -> Self {
        self.state.lock().page_size = Some(size.max(1));
        self
    }

    pub fn put_file(&self, endpoint: &str, bytes: Vec<u8>) {
        let (segments, _) = parse_endpoint(endpoint);
        self.state.lock().files.insert(format!("{}/", segments.join("/")), bytes);
    }

    /// The next request fails with `status` and `body`.
    pub fn fail_next(&self, status: u16, body: impl Into<String>) {
        self.state.lock().fail_next = Some((status, body.into()));
    }

    /// `"METHOD endpoint"` for every request served so far.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Starts request accounting afresh.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }
}

/// Records the request and consumes a pending failure.
fn begin(state: &mut MemoryState, method: &str, endpoint: &str) -> Result<()> {
    let (segments, _) = parse_endpoint(endpoint);
    state.requests.push(format!("{method} {}/", segments.join("/")));
    match state.fail_next.take() {
        Some((status, body)) => Err(status_error(status, endpoint, &body)),
        None => Ok(()),
    }
}

fn listing(state: &MemoryState, collection: &str, page: usize) -> Value {
    let items: Vec<Value> = state
        .collections
        .get(collection)
        .map(|objects| objects.values().cloned().collect())
        .unwrap_or_default();
    let Some(size) = state.page_size else {
        return Value::Array(items);
    };
    let start = (page.saturating_sub(1)) * size;
    let results: Vec<Value> = items.iter().skip(start).take(size).cloned().collect();
    let next = (start + size < items.len())
        .then(|| reference(&format!("{collection}/?page={}", page + 1)));
    json!({ "results": results, "next": next })
}

fn sibling_conflict(
    state: &MemoryState,
    collection: &str,
    body: &Map<String, Value>,
) -> Option<String> {
    let (field, _, _) = owner_link(collection)?;
    let name = body.get("name")?;
    let owner = body.get(field).cloned().unwrap_or(Value::Null);
    let clash = state.collections.get(collection)?.values().any(|existing| {
        let existing_owner = existing.get(field).cloned().unwrap_or(Value::Null);
        existing.get("name") == Some(name) && existing_owner == owner
    });
    clash.then(|| {
        let message = format!("{collection} with this name already exists under this parent.");
        json!({ "name": [message] }).to_string()
    })
}

impl Transport for MemoryTransport {
    fn get(&self, endpoint: &str) -> Result<Option<Value>> {
        let mut state = self.state.lock();
        begin(&mut state, "GET", endpoint)?;
        let (segments, page) = parse_endpoint(endpoint);
        Ok(match segments.as_slice() {
            [collection] if state.collections.contains_key(collection) => {
                Some(listing(&state, collection, page))
            }
            [collection, id] => state
                .collections
                .get(collection)
                .and_then(|objects| objects.get(id))
                .cloned(),
            _ => None,
        })
    }

    fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let mut state = self.state.lock();
        begin(&mut state, "POST", endpoint)?;
        let (segments, _) = parse_endpoint(endpoint);
        let [collection] = segments.as_slice() else {
            return Err(status_error(405, endpoint, "method not allowed"));
        };
        let Some(fields) = body.as_object() else {
            return Err(status_error(400, endpoint, r#"{"detail": "expected a JSON object"}"#));
        };
        if let Some(detail) = sibling_conflict(&state, collection, fields) {
            return Err(status_error(400, endpoint, &detail));
        }

        let uuid = Uuid::new_v4();
        let kind = ObjectKind::from_collection(collection)
            .ok_or_else(|| status_error(404, endpoint, ""))?;
        let self_ref = object_reference(kind, uuid);
        let mut created = fields.clone();
        created.insert("uuid".to_string(), Value::String(uuid.to_string()));
        if let Some((field, owner_collection, list_field)) = owner_link(collection) {
            let owner = created
                .get(field)
                .and_then(Value::as_str)
                .and_then(|r| parse_endpoint(r).0.last().cloned());
            if let Some(owner) = owner {
                let Some(owner_doc) = state
                    .collections
                    .get_mut(owner_collection)
                    .and_then(|objects| objects.get_mut(&owner))
                else {
                    return Err(status_error(400, endpoint, &format!("unknown {field} {owner}")));
                };
                if let Some(Value::Array(list)) = owner_doc.get_mut(list_field) {
                    list.push(Value::String(self_ref));
                }
            }
        }
        let own_lists: &[&str] = match kind {
            ObjectKind::Entity => &["children", "quantities"],
            ObjectKind::Quantity => &["data_files"],
            _ => &[],
        };
        for list in own_lists {
            created.entry(*list).or_insert_with(|| json!([]));
        }

        let created = Value::Object(created);
        state
            .collections
            .entry(collection.clone())
            .or_default()
            .insert(uuid.to_string(), created.clone());
        Ok(created)
    }

    fn patch(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let mut state = self.state.lock();
        begin(&mut state, "PATCH", endpoint)?;
        let (segments, _) = parse_endpoint(endpoint);
        let [collection, id] = segments.as_slice() else {
            return Err(status_error(405, endpoint, "method not allowed"));
        };
        let document = state
            .collections
            .get_mut(collection)
            .and_then(|objects| objects.get_mut(id))
            .ok_or_else(|| status_error(404, endpoint, ""))?;
        if let (Some(target), Some(fields)) = (document.as_object_mut(), body.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(document.clone())
    }

    fn delete(&self, endpoint: &str) -> Result<()> {
        let mut state = self.state.lock();
        begin(&mut state, "DELETE", endpoint)?;
        let (segments, _) = parse_endpoint(endpoint);
        let [collection, id] = segments.as_slice() else {
            return Err(status_error(405, endpoint, "method not allowed"));
        };
        let removed = state
            .collections
            .get_mut(collection)
            .and_then(|objects| objects.remove(id));
        if removed.is_none() {
            return Err(status_error(404, endpoint, ""));
        }
        let gone = ObjectKind::from_collection(collection)
            .map(|kind| reference(&format!("{}/{id}/", kind.collection())))
            .unwrap_or_default();
        for objects in state.collections.values_mut() {
            for document in objects.values_mut() {
                let Some(fields) = document.as_object_mut() else {
                    continue;
                };
                for value in fields.values_mut() {
                    if let Value::Array(list) = value {
                        list.retain(|item| item.as_str() != Some(gone.as_str()));
                    }
                }
            }
        }
        Ok(())
    }

    fn get_bytes(&self, endpoint: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        begin(&mut state, "GET", endpoint)?;
        let (segments, _) = parse_endpoint(endpoint);
        state
            .files
            .get(&format!("{}/", segments.join("/")))
            .cloned()
            .ok_or_else(|| status_error(404, endpoint, ""))
    }

    fn reference(&self, endpoint: &str) -> String {
        reference(endpoint)
    }
}
