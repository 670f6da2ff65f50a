//! Shared index maintenance as seen through clients.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use record_relay::telemetry::ViolationKind;
use record_relay::{
    ClientId, FieldValue, Fields, IndexPatch, IndexWriteMode, MemorySharedStore, NoticeLevel,
    RecordId, RelayConfig, RelayError, RelayEvent, Role, SharedIndex, SharedStore,
};
use serde_json::json;

use crate::common::{drain, notices, Room, NAMESPACE};

fn named(name: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_owned(), FieldValue::from(name));
    fields.insert("hp_cur".to_owned(), FieldValue::from("12"));
    fields.insert("save_will".to_owned(), FieldValue::from(true));
    fields
}

fn raw_index(room: &Room) -> serde_json::Value {
    room.shared
        .read(&SharedIndex::key_for(NAMESPACE))
        .unwrap()
        .unwrap_or(serde_json::Value::Null)
}

#[test]
fn save_publishes_name_and_owner_but_never_fields() {
    let mut room = Room::new();
    let mut player = room.join("p1", "Ana", Role::Owner);

    let id = player.create_record().unwrap();
    player.save(named("Kaya")).unwrap();

    let entries = player.index().read_all().unwrap();
    let entry = &entries[&id];
    assert_eq!(entry.record_id, id);
    assert_eq!(entry.display_name, "Kaya");
    assert_eq!(entry.owner_id, ClientId::from("p1"));
    assert_eq!(entry.owner_display_name, "Ana");

    let raw = raw_index(&room);
    let raw_entry = raw[id.as_str()].as_object().unwrap();
    assert!(!raw_entry.contains_key("fields"));
    assert!(!raw.to_string().contains("hp_cur"));
}

#[test]
fn renaming_updates_the_entry() {
    let mut room = Room::new();
    let mut player = room.join("p1", "Ana", Role::Owner);
    let id = player.create_record().unwrap();
    assert_eq!(
        player.index().get(&id).unwrap().unwrap().display_name,
        "New Character"
    );

    player.save(named("Kaya")).unwrap();
    player.save(named("Kaya the Bold")).unwrap();
    assert_eq!(
        player.index().get(&id).unwrap().unwrap().display_name,
        "Kaya the Bold"
    );
}

#[test]
fn clearing_the_name_lists_the_record_as_untitled() {
    let mut room = Room::new();
    let mut player = room.join("p1", "Ana", Role::Owner);
    let id = player.create_record().unwrap();
    player.save(named("")).unwrap();
    assert_eq!(player.index().get(&id).unwrap().unwrap().display_name, "Untitled");
}

#[test]
fn delete_removes_the_entry() {
    let mut room = Room::new();
    let mut player = room.join("p1", "Ana", Role::Owner);
    let id = player.create_record().unwrap();
    player.save(named("Kaya")).unwrap();
    drain(&mut player);

    player.delete_active().unwrap();
    assert!(player.index().get(&id).unwrap().is_none());
    assert!(player.active_record_id().is_none());
    assert!(player.local_records().unwrap().is_empty());
    let events = drain(&mut player);
    assert_eq!(notices(&events, NoticeLevel::Info), vec!["Deleted \"Kaya\"."]);
}

#[test]
fn delete_survives_an_unavailable_index() {
    let mut room = Room::new();
    let mut player = room.join("p1", "Ana", Role::Owner);
    let id = player.create_record().unwrap();

    room.shared.set_available(false);
    player.delete_record(&id).unwrap();
    assert!(player.local_records().unwrap().is_empty());

    room.shared.set_available(true);
    assert!(
        player.index().get(&id).unwrap().is_some(),
        "entry lingers until pruned"
    );
}

#[test]
fn save_survives_an_unavailable_index() {
    let mut room = Room::new();
    let mut player = room.join("p1", "Ana", Role::Owner);
    let id = player.create_record().unwrap();

    room.shared.set_available(false);
    player.save(named("Kaya")).unwrap();
    room.shared.set_available(true);
    assert_eq!(
        player.index().get(&id).unwrap().unwrap().display_name,
        "New Character"
    );

    player.save(named("Kaya")).unwrap();
    assert_eq!(player.index().get(&id).unwrap().unwrap().display_name, "Kaya");
}

#[test]
fn viewer_prunes_stale_entries() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let mut player = room.join("p1", "Ana", Role::Owner);
    let id = player.create_record().unwrap();

    assert!(gm.prune(&id).unwrap());
    assert!(!gm.prune(&id).unwrap());
    let events = drain(&mut gm);
    assert_eq!(
        notices(&events, NoticeLevel::Info),
        vec!["Removed from list."]
    );
    assert!(matches!(
        player.prune(&id),
        Err(RelayError::RoleMismatch { .. })
    ));
}

#[test]
fn other_clients_notice_index_changes_when_polling() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let mut player = room.join("p1", "Ana", Role::Owner);

    gm.poll();
    assert!(!drain(&mut gm).contains(&RelayEvent::IndexChanged));

    player.create_record().unwrap();
    gm.poll();
    assert!(drain(&mut gm).contains(&RelayEvent::IndexChanged));

    gm.poll();
    assert!(!drain(&mut gm).contains(&RelayEvent::IndexChanged));
}

#[test]
fn foreign_entries_are_read_leniently() {
    let mut room = Room::new();
    let gm = room.join("gm", "Game Master", Role::Viewer);
    room.shared
        .write(
            &SharedIndex::key_for(NAMESPACE),
            json!({
                "r1": { "recordId": "r1", "ownerId": "p1" },
                "r2": { "recordId": "r2", "displayName": "Orphan" },
                "r3": { "recordId": "r3", "displayName": "Leaky", "ownerId": "p3",
                        "ownerDisplayName": "Cy", "fields": { "hp_cur": "9" } },
                "r4": "not an entry"
            }),
        )
        .unwrap();

    let entries = gm.index().read_all().unwrap();
    assert_eq!(entries.len(), 2);
    let r1 = &entries[&RecordId::from("r1")];
    assert_eq!(r1.display_name, "Untitled");
    assert_eq!(r1.owner_display_name, "p1");
    assert!(entries.contains_key(&RecordId::from("r3")));
    assert_eq!(
        room.observer
            .violations_of_kind(ViolationKind::SharedIndex)
            .len(),
        3
    );
}

#[test]
fn upserting_strips_foreign_fields() {
    let room = Room::new();
    let key = SharedIndex::key_for(NAMESPACE);
    room.shared
        .write(
            &key,
            json!({ "r1": { "recordId": "r1", "ownerId": "p1", "fields": { "x": "y" } } }),
        )
        .unwrap();
    let index = SharedIndex::new(room.shared.clone(), NAMESPACE);
    index
        .upsert(
            &RecordId::from("r1"),
            &IndexPatch::new().with_display_name("Kaya"),
        )
        .unwrap();
    let raw = room.shared.read(&key).unwrap().unwrap();
    assert!(raw["r1"].get("fields").is_none());
    assert_eq!(raw["r1"]["ownerId"], "p1");
}

#[test]
fn interleaved_whole_blob_upserts_lose_an_entry() {
    let shared = MemorySharedStore::new();
    let a = SharedIndex::new(shared.clone(), NAMESPACE);
    let b = SharedIndex::new(shared.clone(), NAMESPACE);
    let r1 = RecordId::from("r1");
    let r2 = RecordId::from("r2");

    let mut snap_a = a.snapshot().unwrap();
    let mut snap_b = b.snapshot().unwrap();
    snap_a.upsert(&r1, &IndexPatch::new().with_owner("p1".into(), "Ana"));
    snap_b.upsert(&r2, &IndexPatch::new().with_owner("p2".into(), "Bo"));
    a.commit(snap_a).unwrap();
    b.commit(snap_b).unwrap();

    let entries = a.read_all().unwrap();
    assert!(!entries.contains_key(&r1), "first writer's entry is lost");
    assert!(entries.contains_key(&r2));

    // the next save of the lost record repairs the index
    a.upsert(&r1, &IndexPatch::new().with_owner("p1".into(), "Ana"))
        .unwrap();
    assert_eq!(a.read_all().unwrap().len(), 2);
}

#[test]
fn concurrent_atomic_writers_keep_every_entry() {
    const PER_WRITER: usize = 200;
    let shared = MemorySharedStore::new();

    std::thread::scope(|scope| {
        for (writer, owner) in [("a", "p1"), ("b", "p2")] {
            let store = shared.clone();
            scope.spawn(move || {
                let index =
                    SharedIndex::with_write_mode(Box::new(store), NAMESPACE, IndexWriteMode::Atomic)
                        .unwrap();
                for n in 0..PER_WRITER {
                    let id = RecordId::from(format!("{writer}-{n}"));
                    let patch = IndexPatch::new()
                        .with_display_name(format!("Record {n}"))
                        .with_owner(ClientId::from(owner), owner);
                    index.upsert(&id, &patch).unwrap();
                }
            });
        }
    });

    let index = SharedIndex::new(shared, NAMESPACE);
    let entries = index.read_all().unwrap();
    assert_eq!(entries.len(), 2 * PER_WRITER);
    for (writer, owner) in [("a", "p1"), ("b", "p2")] {
        for n in 0..PER_WRITER {
            let entry = &entries[&RecordId::from(format!("{writer}-{n}"))];
            assert_eq!(entry.owner_id, ClientId::from(owner));
        }
    }
}

#[test]
fn atomic_mode_keeps_every_entry() {
    let mut room = Room::new();
    let atomic = || RelayConfig {
        namespace: NAMESPACE.to_owned(),
        ..RelayConfig::atomic()
    };
    let builder = room.builder().with_relay_config(atomic());
    let mut ana = room.join_with(
        builder,
        record_relay::StaticIdentity::new("p1", "Ana", Role::Owner),
        record_relay::MemoryPrivateStore::new(),
    );
    let builder = room.builder().with_relay_config(atomic());
    let mut bo = room.join_with(
        builder,
        record_relay::StaticIdentity::new("p2", "Bo", Role::Owner),
        record_relay::MemoryPrivateStore::new(),
    );
    assert_eq!(ana.index().mode(), IndexWriteMode::Atomic);

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(ana.create_record().unwrap());
        ids.push(bo.create_record().unwrap());
    }
    let entries = ana.index().read_all().unwrap();
    for id in &ids {
        assert!(entries.contains_key(id));
    }
}
