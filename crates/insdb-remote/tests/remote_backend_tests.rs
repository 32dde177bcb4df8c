use insdb_core::snapshot::{self, SnapshotGraph};
use insdb_core::{Attributes, Backend, ConnectionConfig, InsDbError, Object, ObjectKind, Tracking};
use insdb_remote::{MemoryTransport, RemoteBackend};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../../tests/fixtures/planck_schema.json");

const HFI: &str = "c8b1a6e4-2d6f-4b8a-9f3e-7a1d2c3b4e01";
const LFI: &str = "9e0f3d2a-6c1b-4f7e-8d5a-2b3c4d5e6f01";
const BEAM: &str = "71f0e4c2-3b5d-4a6e-9f7a-8b9c0d1e2f02";
const OLD_BANDPASS: &str = "3a29d860-2289-4691-82de-1fcb4adfff0e";
const FFP_2018: &str = "37bb70e4-5f9d-4c2a-b1e8-6a7d9c0b2e01";
const FREQ_217: &str = "c8b1a6e4-2d6f-4b8a-9f3e-7a1d2c3b4e02";

fn uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("valid uuid")
}

fn snapshot_graph() -> (tempfile::TempDir, SnapshotGraph) {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("schema.json"), SCHEMA).expect("write schema");
    fs::create_dir_all(dir.path().join("data_files")).expect("create data_files/");
    fs::write(
        dir.path()
            .join(format!("data_files/{OLD_BANDPASS}_bandpass217.csv")),
        "nu,transmission\n217,0.9\n",
    )
    .expect("write data file");
    let graph = snapshot::load(dir.path()).expect("load snapshot");
    (dir, graph)
}

type MemoryBackend = RemoteBackend<MemoryTransport>;

fn backend_with(config: ConnectionConfig) -> (tempfile::TempDir, MemoryBackend) {
    let (dir, graph) = snapshot_graph();
    let transport = MemoryTransport::from_snapshot(&graph);
    (dir, RemoteBackend::with_transport(transport, &config))
}

fn backend() -> (tempfile::TempDir, MemoryBackend) {
    backend_with(ConnectionConfig::new("memory://insdb"))
}

fn attributes(value: serde_json::Value) -> Attributes {
    value.as_object().cloned().expect("object literal")
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn paths_resolve_segment_by_segment() {
    let (_dir, db) = backend();
    let quantity = db.resolve_path("/HFI/frequency_217_ghz/bandpass", None).unwrap();
    assert_eq!(quantity.kind(), ObjectKind::Quantity);

    let pinned = db
        .resolve_path("/releases/planck2018/LFI/full_focal_plane", None)
        .unwrap();
    assert_eq!(pinned.uuid(), uuid(FFP_2018));

    assert!(matches!(
        db.resolve_path("/HFI/nope", None),
        Err(InsDbError::InvalidPath { .. })
    ));
    assert!(matches!(
        db.resolve_uuid(Uuid::from_u128(1)),
        Err(InsDbError::NotFound(_))
    ));
}

#[test]
fn repeated_lookups_are_served_from_the_cache() {
    let (_dir, db) = backend();
    let first = db.resolve_uuid(uuid(OLD_BANDPASS)).unwrap();
    let after_first = db.transport().request_count();

    let second = db.resolve_uuid(uuid(OLD_BANDPASS)).unwrap();
    assert_eq!(first, second);
    assert_eq!(db.transport().request_count(), after_first);
    assert!(db.cache_stats().hits >= 1);
    assert!(db.known_uuids(ObjectKind::DataFile).contains(&uuid(OLD_BANDPASS)));
}

#[test]
fn typed_fetch_goes_straight_to_the_collection() {
    let (_dir, db) = backend();
    db.quantity(uuid(BEAM)).unwrap();
    assert_eq!(
        db.transport().requests(),
        vec![format!("GET quantities/{BEAM}/")]
    );
}

#[test]
fn paginated_root_listing_is_followed() {
    let (_dir, graph) = snapshot_graph();
    let transport = MemoryTransport::from_snapshot(&graph).with_page_size(1);
    let db = RemoteBackend::with_transport(transport, &ConnectionConfig::new("memory://insdb"));
    let names: Vec<_> = db.children(None).unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["HFI", "LFI"]);
}

#[test]
fn root_listing_fills_the_cache_for_every_entity() {
    let (_dir, db) = backend();
    db.children(None).unwrap();
    db.transport().clear_requests();

    for id in [HFI, LFI, FREQ_217] {
        assert_eq!(db.resolve_uuid(uuid(id)).unwrap().kind(), ObjectKind::Entity);
    }
    db.entity(uuid(FREQ_217)).unwrap();
    assert_eq!(db.transport().request_count(), 0);
}

#[test]
fn children_of_a_non_entity_is_not_an_entity() {
    let (_dir, db) = backend();
    match db.children(Some(uuid(BEAM))) {
        Err(InsDbError::NotAnEntity(name)) => assert_eq!(name, "beam"),
        other => panic!("expected NotAnEntity, got {other:?}"),
    }
    // Once cached, the answer is the same without a request.
    db.transport().clear_requests();
    assert!(matches!(
        db.children(Some(uuid(BEAM))),
        Err(InsDbError::NotAnEntity(_))
    ));
    assert_eq!(db.transport().request_count(), 0);
    assert!(matches!(
        db.children(Some(Uuid::from_u128(1))),
        Err(InsDbError::NotFound(_))
    ));
}

#[test]
fn tracking_records_remote_lookups() {
    let (_dir, db) = backend();
    let db = Tracking::new(db);
    db.resolve_path("/HFI/frequency_217_ghz/beam", None).unwrap();
    db.resolve_uuid(uuid(OLD_BANDPASS)).unwrap();
    db.data_file(uuid(FFP_2018)).unwrap();
    db.inner().resolve_uuid(uuid(LFI)).unwrap();

    assert_eq!(db.queried_quantities(), vec![uuid(BEAM)]);
    let mut files = vec![uuid(OLD_BANDPASS), uuid(FFP_2018)];
    files.sort();
    assert_eq!(db.queried_data_files(), files);
    assert!(db.queried_entities().is_empty());

    db.delete(uuid(BEAM)).unwrap();
    assert!(db.queried_quantities().is_empty());
}

#[test]
fn concurrent_readers_share_one_cache() {
    let (_dir, db) = backend();
    let db = Arc::new(db);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let path = if i % 2 == 0 {
                    "/HFI/frequency_217_ghz/beam"
                } else {
                    "/LFI/full_focal_plane"
                };
                db.resolve_path(path, None).map(|object| object.uuid())
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().expect("thread panicked").is_ok());
    }
    assert!(db.cache_stats().entries >= 5);
}

// ============================================================================
// Mutations
// ============================================================================

#[test]
fn patch_invalidates_only_the_touched_objects() {
    let (_dir, db) = backend();
    db.resolve_uuid(uuid(HFI)).unwrap();
    db.resolve_uuid(uuid(LFI)).unwrap();
    db.transport().clear_requests();

    db.patch(uuid(HFI), &attributes(json!({"name": "HFI_renamed"})))
        .unwrap();
    assert_eq!(db.entity(uuid(HFI)).unwrap().name, "HFI_renamed");
    assert_eq!(db.entity(uuid(LFI)).unwrap().name, "LFI");

    assert_eq!(
        db.transport().requests(),
        vec![format!("PATCH entities/{HFI}/"), format!("GET entities/{HFI}/")]
    );
}

#[test]
fn create_and_delete_refresh_the_parent_listing() {
    let (_dir, db) = backend();
    assert_eq!(db.children(Some(uuid(HFI))).unwrap().len(), 1);

    let created = db
        .create(ObjectKind::Entity, "/HFI", &attributes(json!({"name": "frequency_353_ghz"})))
        .unwrap();
    let object = db.resolve_path("/HFI/frequency_353_ghz", None).unwrap();
    assert_eq!(object.uuid(), created);

    db.delete(uuid(BEAM)).unwrap();
    let parent = db.resolve_path("/HFI/frequency_217_ghz", None).unwrap().uuid();
    let names: Vec<_> = db.children(Some(parent)).unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["bandpass"]);
    assert!(matches!(db.resolve_uuid(uuid(BEAM)), Err(InsDbError::NotFound(_))));
}

#[test]
fn top_level_entities_can_be_created() {
    let (_dir, db) = backend();
    db.children(None).unwrap();
    db.create(ObjectKind::Entity, "/", &attributes(json!({"name": "SPT"})))
        .unwrap();
    let names: Vec<_> = db.children(None).unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["HFI", "LFI", "SPT"]);
}

#[test]
fn unaddressable_names_are_refused_before_any_request() {
    let (_dir, db) = backend();
    db.resolve_path("/HFI/frequency_217_ghz", None).unwrap();
    db.transport().clear_requests();

    let refused = [
        db.create(ObjectKind::Entity, "/", &attributes(json!({"name": "releases"}))),
        db.create(ObjectKind::Entity, "/HFI", &attributes(json!({"name": ".."}))),
        db.create(ObjectKind::Entity, "/HFI", &attributes(json!({"name": "a/b"}))),
        db.create(
            ObjectKind::Quantity,
            "/HFI/frequency_217_ghz",
            &attributes(json!({"name": BEAM})),
        ),
    ];
    for result in refused {
        assert!(matches!(result, Err(InsDbError::InvalidPath { .. })), "{result:?}");
    }
    for patch in [json!({"name": "."}), json!({"name": "releases"})] {
        let result = db.patch(uuid(HFI), &attributes(patch));
        assert!(matches!(result, Err(InsDbError::InvalidPath { .. })), "{result:?}");
    }
    assert_eq!(db.transport().request_count(), 0);
}

#[test]
fn reserved_name_is_fine_below_the_top_level() {
    let (_dir, db) = backend();
    let created = db
        .create(ObjectKind::Entity, "/LFI", &attributes(json!({"name": "releases"})))
        .unwrap();
    assert_eq!(db.resolve_path("/LFI/releases", None).unwrap().uuid(), created);

    // Moving it to the top level would hide it behind release paths.
    let result = db.patch(created, &attributes(json!({"parent": null})));
    assert!(matches!(result, Err(InsDbError::InvalidPath { .. })));
}

#[test]
fn server_conflicts_are_passed_through() {
    let (_dir, db) = backend();
    let err = db
        .create(ObjectKind::Entity, "/", &attributes(json!({"name": "HFI"})))
        .unwrap_err();
    match err {
        InsDbError::Conflict(detail) => assert!(detail.contains("already exists"), "{detail}"),
        other => panic!("expected a conflict, got {other:?}"),
    }
}

#[test]
fn read_only_backend_refuses_without_a_request() {
    let mut config = ConnectionConfig::new("memory://insdb");
    config.read_only = true;
    let (_dir, db) = backend_with(config);

    assert!(!db.capabilities().writable);
    for result in [
        db.delete(uuid(HFI)),
        db.patch(uuid(HFI), &Attributes::new()),
        db.create(ObjectKind::Entity, "/", &Attributes::new()).map(|_| ()),
    ] {
        assert!(matches!(result, Err(InsDbError::PermissionDenied(_))));
    }
    assert_eq!(db.transport().request_count(), 0);
}

#[test]
fn server_errors_map_onto_the_taxonomy() {
    let (_dir, db) = backend();
    db.transport().fail_next(401, "");
    assert!(matches!(db.resolve_uuid(uuid(HFI)), Err(InsDbError::Authentication(_))));

    db.transport().fail_next(403, "You do not have permission");
    assert!(matches!(
        db.delete(uuid(HFI)),
        Err(InsDbError::PermissionDenied(_))
    ));

    db.transport().fail_next(503, "maintenance");
    assert!(matches!(db.releases(), Err(InsDbError::Transport(_))));
}

// ============================================================================
// Downloads
// ============================================================================

#[test]
fn download_makes_a_local_copy_available() {
    let downloads = tempfile::tempdir().unwrap();
    let mut config = ConnectionConfig::new("memory://insdb");
    config.download_dir = Some(downloads.path().join("cache"));
    let (_dir, db) = backend_with(config);

    assert!(matches!(
        db.local_copy(uuid(OLD_BANDPASS)),
        Err(InsDbError::NoLocalCopy(_))
    ));
    let path = db.download(uuid(OLD_BANDPASS)).unwrap();
    assert_eq!(db.local_copy(uuid(OLD_BANDPASS)).unwrap(), path);
    assert!(fs::read_to_string(&path).unwrap().starts_with("nu,transmission"));

    let Object::DataFile(file) = db.resolve_uuid(uuid(OLD_BANDPASS)).unwrap() else {
        panic!("expected a data file");
    };
    assert!(file.download_url.is_some());
}
