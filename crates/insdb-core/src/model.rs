//! Catalog object model.
//!
//! Every object is identified by a UUID and is immutable once loaded. Objects
//! refer to each other by UUID only; a backend owns the graph and hands out
//! clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A node of the instrument hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub uuid: Uuid,
    pub name: String,
    /// `None` for top-level entities.
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub quantities: BTreeSet<Uuid>,
}

/// A measurable or documented attribute of one entity, versioned by data files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub uuid: Uuid,
    pub name: String,
    pub entity: Uuid,
    pub format_spec: Uuid,
    /// Sorted by upload date, oldest first.
    pub data_files: Vec<Uuid>,
}

/// The document describing how a quantity is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatSpecification {
    pub uuid: Uuid,
    pub document_ref: String,
    pub title: String,
    pub doc_mime_type: String,
    pub file_mime_type: String,
    pub local_doc_path: Option<PathBuf>,
}

/// One concrete version of a quantity.
///
/// Several data files of the same quantity may share a name; only the UUID
/// tells them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub uuid: Uuid,
    pub name: String,
    pub quantity: Uuid,
    pub upload_date: DateTime<Utc>,
    pub spec_version: String,
    pub comment: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub local_path: Option<PathBuf>,
    pub download_url: Option<String>,
    pub dependencies: BTreeSet<Uuid>,
    pub plot_file: Option<PathBuf>,
    pub plot_mime_type: Option<String>,
    pub release_tags: BTreeSet<String>,
}

/// A named, dated view pinning specific data files.
///
/// A release is never merged into the live tree: release-relative paths walk
/// the live entities and pick, at the terminal quantity, the data file listed
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub tag: String,
    pub release_date: DateTime<Utc>,
    pub comment: String,
    pub data_files: BTreeSet<Uuid>,
}

impl Release {
    /// The data file of `quantity` pinned by this release, if any.
    pub fn pinned_version(&self, quantity: &Quantity) -> Option<Uuid> {
        quantity
            .data_files
            .iter()
            .rev()
            .find(|uuid| self.data_files.contains(uuid))
            .copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Entity,
    Quantity,
    DataFile,
    FormatSpec,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Entity,
        ObjectKind::Quantity,
        ObjectKind::DataFile,
        ObjectKind::FormatSpec,
    ];

    /// Collection name used by typed paths (`/entities/<uuid>`) and the REST API.
    pub fn collection(self) -> &'static str {
        match self {
            ObjectKind::Entity => "entities",
            ObjectKind::Quantity => "quantities",
            ObjectKind::DataFile => "data_files",
            ObjectKind::FormatSpec => "format_specs",
        }
    }

    pub fn from_collection(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.collection() == name)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectKind::Entity => "entity",
            ObjectKind::Quantity => "quantity",
            ObjectKind::DataFile => "data file",
            ObjectKind::FormatSpec => "format specification",
        };
        f.write_str(label)
    }
}

/// Any object a UUID or a path can resolve to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Object {
    Entity(Entity),
    Quantity(Quantity),
    DataFile(DataFile),
    FormatSpec(FormatSpecification),
}

impl Object {
    pub fn uuid(&self) -> Uuid {
        match self {
            Object::Entity(e) => e.uuid,
            Object::Quantity(q) => q.uuid,
            Object::DataFile(d) => d.uuid,
            Object::FormatSpec(f) => f.uuid,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Entity(_) => ObjectKind::Entity,
            Object::Quantity(_) => ObjectKind::Quantity,
            Object::DataFile(_) => ObjectKind::DataFile,
            Object::FormatSpec(_) => ObjectKind::FormatSpec,
        }
    }

    /// Display name; format specifications are named by their document reference.
    pub fn name(&self) -> &str {
        match self {
            Object::Entity(e) => &e.name,
            Object::Quantity(q) => &q.name,
            Object::DataFile(d) => &d.name,
            Object::FormatSpec(f) => &f.document_ref,
        }
    }

    /// UUID of the owning object: parent entity, owning quantity, or nothing.
    pub fn parent(&self) -> Option<Uuid> {
        match self {
            Object::Entity(e) => e.parent,
            Object::Quantity(q) => Some(q.entity),
            Object::DataFile(d) => Some(d.quantity),
            Object::FormatSpec(_) => None,
        }
    }
}

/// The two kinds of object that can appear as a path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildKind {
    Entity,
    Quantity,
}

/// One row of a children listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub uuid: Uuid,
    pub name: String,
    pub kind: ChildKind,
}

/// Sorts a children listing by name, the order every backend promises.
pub fn sort_children(children: &mut [ChildEntry]) {
    children.sort_by(|a, b| a.name.cmp(&b.name).then(a.uuid.cmp(&b.uuid)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quantity_with(versions: &[Uuid]) -> Quantity {
        Quantity {
            uuid: Uuid::from_u128(1),
            name: "bandpass".to_string(),
            entity: Uuid::from_u128(2),
            format_spec: Uuid::from_u128(3),
            data_files: versions.to_vec(),
        }
    }

    #[test]
    fn pinned_version_picks_the_release_member() {
        let old = Uuid::from_u128(10);
        let new = Uuid::from_u128(11);
        let release = Release {
            tag: "planck2018".to_string(),
            release_date: Utc.with_ymd_and_hms(2018, 7, 17, 0, 0, 0).unwrap(),
            comment: String::new(),
            data_files: [old].into_iter().collect(),
        };

        assert_eq!(release.pinned_version(&quantity_with(&[old, new])), Some(old));
        assert_eq!(release.pinned_version(&quantity_with(&[new])), None);
    }

    #[test]
    fn collection_names_round_trip() {
        for kind in ObjectKind::ALL {
            assert_eq!(ObjectKind::from_collection(kind.collection()), Some(kind));
        }
        assert_eq!(ObjectKind::from_collection("releases"), None);
    }
}
