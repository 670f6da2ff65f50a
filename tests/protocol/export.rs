//! Export documents moving records between owners.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use record_relay::{
    ClientId, FieldValue, Fields, FilePrivateStore, NoticeLevel, PrivateStore, RelayError, Role,
    StaticIdentity, EXPORT_KIND,
};

use crate::common::{drain, notices, poll_all, Room};

fn sheet() -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_owned(), FieldValue::from("Kaya"));
    fields.insert("class".to_owned(), FieldValue::from("Psion"));
    fields.insert("notes".to_owned(), FieldValue::from("owes Bo 3 gp\nhates boats"));
    fields.insert("save_will".to_owned(), FieldValue::from(true));
    fields.insert("save_fort".to_owned(), FieldValue::from(false));
    fields
}

#[test]
fn import_on_another_owner_keeps_fields_and_rebinds_ownership() {
    let mut room = Room::new();
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let id = ana.create_record().unwrap();
    ana.save(sheet()).unwrap();
    let original = ana.active_record().unwrap().unwrap();

    let text = ana.export_active().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["kind"], EXPORT_KIND);
    assert_eq!(value["version"], 1);
    assert!(text.contains('\n'), "export is pretty-printed");

    drain(&mut bo);
    let imported_id = bo.import(&text).unwrap();
    let imported = bo.active_record().unwrap().unwrap();
    // ana still lists the original, so bo's copy cannot share its id
    assert_ne!(imported_id, id);
    assert_eq!(imported.id, imported_id);
    assert_eq!(imported.fields, original.fields);
    assert_eq!(imported.display_name(), "Kaya");
    assert_eq!(imported.owner_id, ClientId::from("p2"));
    assert_eq!(imported.owner_display_name, "Bo");
    assert_eq!(imported.created_at, original.created_at);

    let entry = bo.index().get(&imported_id).unwrap().unwrap();
    assert_eq!(entry.owner_id, ClientId::from("p2"));
    assert_eq!(entry.display_name, "Kaya");
    let events = drain(&mut bo);
    assert_eq!(notices(&events, NoticeLevel::Info), vec!["Imported."]);
}

#[test]
fn importing_a_listed_record_leaves_the_original_owner_in_place() {
    let mut room = Room::new();
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let id = ana.create_record().unwrap();
    ana.save(sheet()).unwrap();

    let copy = bo.import(&ana.export_active().unwrap()).unwrap();
    assert_ne!(copy, id);

    let entries = gm.index().read_all().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[&id].owner_id, ClientId::from("p1"));
    assert_eq!(entries[&copy].owner_id, ClientId::from("p2"));
    assert_eq!(entries[&copy].display_name, "Kaya");

    gm.select_by_id(&id).unwrap();
    poll_all(&mut [&mut ana, &mut bo, &mut gm]);
    let context = gm.viewer_state().context().unwrap();
    assert_eq!(context.record_id, id);
    assert_eq!(context.owner_id, ClientId::from("p1"));
    assert_eq!(
        gm.viewer_state().fields().unwrap().get("name"),
        Some(&FieldValue::from("Kaya"))
    );
    assert!(room.observer.is_empty());
}

#[test]
fn reimporting_an_own_export_overwrites_the_copy() {
    let mut room = Room::new();
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let id = bo.create_record().unwrap();
    bo.save(sheet()).unwrap();
    let text = bo.export_active().unwrap();

    assert_eq!(bo.import(&text).unwrap(), id);
    assert_eq!(bo.local_records().unwrap().len(), 1);
    assert_eq!(bo.index().read_all().unwrap().len(), 1);
}

#[test]
fn a_deleted_record_can_be_imported_under_its_old_id() {
    let mut room = Room::new();
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let id = ana.create_record().unwrap();
    let text = ana.export_active().unwrap();
    ana.delete_record(&id).unwrap();

    assert_eq!(bo.import(&text).unwrap(), id);
    let entry = bo.index().get(&id).unwrap().unwrap();
    assert_eq!(entry.owner_id, ClientId::from("p2"));
}

#[test]
fn import_without_an_id_gets_a_fresh_one() {
    let mut room = Room::new();
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let text = r#"{
        "kind": "record-export",
        "version": 1,
        "data": { "fields": { "name": "Stray", "save_ref": true } }
    }"#;
    let first = bo.import(text).unwrap();
    let second = bo.import(text).unwrap();
    assert_ne!(first, second);
    assert_eq!(bo.local_records().unwrap().len(), 2);
}

#[test]
fn rejected_imports_leave_everything_untouched() {
    let mut room = Room::new();
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let active = bo.create_record().unwrap();
    drain(&mut bo);

    let bad = [
        "{ not json",
        r#"{"kind":"something-else","version":1,"data":{"fields":{}}}"#,
        r#"{"kind":"record-export","version":99,"data":{"fields":{}}}"#,
        r#"{"kind":"record-export","version":1,"data":{"fields":{"hp":12}}}"#,
        r#"[1, 2, 3]"#,
    ];
    for text in bad {
        assert!(
            matches!(bo.import(text), Err(RelayError::MalformedImport { .. })),
            "accepted {text}"
        );
    }

    assert_eq!(bo.local_records().unwrap().len(), 1);
    assert_eq!(bo.active_record_id(), Some(&active));
    assert_eq!(bo.index().read_all().unwrap().len(), 1);
    let events = drain(&mut bo);
    assert_eq!(
        notices(&events, NoticeLevel::Error),
        vec!["Import failed (bad JSON?)."; bad.len()]
    );
}

#[test]
fn exporting_nothing_is_an_error() {
    let mut room = Room::new();
    let mut bo = room.join("p2", "Bo", Role::Owner);
    assert_eq!(bo.export_active(), Err(RelayError::NoActiveRecord));
    let events = drain(&mut bo);
    assert_eq!(
        notices(&events, NoticeLevel::Error),
        vec!["Nothing to export."]
    );
}

#[test]
fn file_store_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");
    let mut room = Room::new();

    let start = |room: &mut Room| {
        room.builder()
            .start(
                StaticIdentity::new("p1", "Ana", Role::Owner),
                FilePrivateStore::new(&path),
                room.shared.clone(),
                room.broker.endpoint(),
            )
            .unwrap()
    };

    let mut ana = start(&mut room);
    let id = ana.create_record().unwrap();
    ana.save(sheet()).unwrap();
    drop(ana);

    let records = FilePrivateStore::new(&path).list_owned().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert_eq!(records[0].fields.get("save_will"), Some(&FieldValue::from(true)));

    let mut restarted = start(&mut room);
    let record = restarted.open_local(&id).unwrap();
    assert_eq!(record.display_name(), "Kaya");
    assert_eq!(restarted.active_record_id(), Some(&id));
}
