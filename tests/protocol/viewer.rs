//! The viewer state machine across real clients.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::thread;

use record_relay::{
    FieldValue, Fields, MemoryPrivateStore, MessageKind, NoticeLevel, RecordId, RelayClient,
    RelayError, RelayEvent, Role, StaticIdentity, ViewerConfig, ViewerState, ViewingContext,
};
use web_time::Duration;

use crate::common::{drain, notices, poll_all, view_updates, Room};

fn named(name: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_owned(), FieldValue::from(name));
    fields
}

fn owner_with_record(room: &mut Room, id: &str, name: &str, record: &str) -> (RelayClient, RecordId) {
    let mut owner = room.join(id, name, Role::Owner);
    let record_id = owner.create_record().unwrap();
    owner.save(named(record)).unwrap();
    (owner, record_id)
}

fn shown_name(client: &RelayClient) -> Option<String> {
    client
        .viewer_state()
        .fields()
        .and_then(|fields| fields.get("name"))
        .and_then(FieldValue::as_text)
        .map(str::to_owned)
}

#[test]
fn request_and_response_show_the_record() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let (mut ana, record) = owner_with_record(&mut room, "p1", "Ana", "Kaya");

    gm.select_by_id(&record).unwrap();
    assert_eq!(
        gm.viewer_state(),
        &ViewerState::Requesting(ViewingContext::new(record.clone(), "p1".into()))
    );
    assert!(gm.viewer_state().is_read_only());
    let events = drain(&mut gm);
    assert!(events
        .iter()
        .any(|event| matches!(event, RelayEvent::ViewRequested { .. })));
    assert_eq!(
        notices(&events, NoticeLevel::Info),
        vec!["Requesting \"Kaya\" from Ana…"]
    );

    poll_all(&mut [&mut ana, &mut gm]);
    assert_eq!(shown_name(&gm).as_deref(), Some("Kaya"));
    let events = drain(&mut gm);
    assert!(events.iter().any(|event| matches!(
        event,
        RelayEvent::ViewUpdated {
            source: MessageKind::Response,
            ..
        }
    )));
    assert_eq!(
        notices(&events, NoticeLevel::Info),
        vec!["Viewing live character from Ana."]
    );
}

#[test]
fn switching_before_the_answer_never_shows_the_old_record() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let (mut ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    let (mut bo, rook) = owner_with_record(&mut room, "p2", "Bo", "Rook");

    gm.select_by_id(&kaya).unwrap();
    gm.select_by_id(&rook).unwrap();
    drain(&mut gm);

    // ana answers the abandoned request last, after bo
    poll_all(&mut [&mut bo, &mut ana, &mut gm]);
    assert_eq!(
        gm.viewer_state().context(),
        Some(&ViewingContext::new(rook, "p2".into()))
    );
    assert_eq!(shown_name(&gm).as_deref(), Some("Rook"));
    let events = drain(&mut gm);
    assert_eq!(view_updates(&events), 1);
}

#[test]
fn late_answer_arriving_alone_is_dropped() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let (mut ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    let (mut bo, rook) = owner_with_record(&mut room, "p2", "Bo", "Rook");

    gm.select_by_id(&kaya).unwrap();
    gm.select_by_id(&rook).unwrap();
    ana.poll();
    gm.poll();
    assert!(matches!(gm.viewer_state(), ViewerState::Requesting(_)));
    assert!(shown_name(&gm).is_none());

    bo.poll();
    gm.poll();
    assert_eq!(shown_name(&gm).as_deref(), Some("Rook"));
}

#[test]
fn owner_saves_refresh_the_view() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let (mut ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    gm.select_by_id(&kaya).unwrap();
    poll_all(&mut [&mut ana, &mut gm]);
    drain(&mut gm);

    ana.save(named("Kaya, level 2")).unwrap();
    gm.poll();
    assert_eq!(shown_name(&gm).as_deref(), Some("Kaya, level 2"));
    let events = drain(&mut gm);
    assert!(events.iter().any(|event| matches!(
        event,
        RelayEvent::ViewUpdated {
            source: MessageKind::Update,
            ..
        }
    )));
    assert!(notices(&events, NoticeLevel::Info).contains(&"View updated (owner saved).".to_owned()));
}

#[test]
fn updates_for_other_records_are_ignored() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let (mut ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    let (mut bo, _rook) = owner_with_record(&mut room, "p2", "Bo", "Rook");
    gm.select_by_id(&kaya).unwrap();
    poll_all(&mut [&mut ana, &mut bo, &mut gm]);

    bo.save(named("Rook, level 2")).unwrap();
    gm.poll();
    assert_eq!(shown_name(&gm).as_deref(), Some("Kaya"));
}

#[test]
fn deleted_record_stays_on_screen_by_default() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let (mut ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    gm.select_by_id(&kaya).unwrap();
    poll_all(&mut [&mut ana, &mut gm]);

    ana.delete_record(&kaya).unwrap();
    gm.poll();
    assert!(gm.index().get(&kaya).unwrap().is_none());
    assert_eq!(shown_name(&gm).as_deref(), Some("Kaya"));
}

#[test]
fn deleted_record_closes_the_view_when_configured() {
    let mut room = Room::new();
    let builder = room.builder().with_viewer_config(ViewerConfig::strict());
    let mut gm = room.join_with(
        builder,
        StaticIdentity::new("gm", "Game Master", Role::Viewer),
        MemoryPrivateStore::new(),
    );
    let (mut ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    gm.select_by_id(&kaya).unwrap();
    poll_all(&mut [&mut ana, &mut gm]);
    drain(&mut gm);

    ana.delete_record(&kaya).unwrap();
    gm.poll();
    assert_eq!(gm.viewer_state(), &ViewerState::Idle);
    let events = drain(&mut gm);
    assert!(events
        .iter()
        .any(|event| matches!(event, RelayEvent::ViewClosed { .. })));
}

#[test]
fn unanswered_request_times_out_once() {
    let mut room = Room::new();
    let builder = room.builder().with_viewer_config(ViewerConfig {
        request_timeout: Some(Duration::from_millis(5)),
        ..ViewerConfig::default()
    });
    let mut gm = room.join_with(
        builder,
        StaticIdentity::new("gm", "Game Master", Role::Viewer),
        MemoryPrivateStore::new(),
    );
    // the owner never polls, as if offline
    let (_ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");

    gm.select_by_id(&kaya).unwrap();
    thread::sleep(std::time::Duration::from_millis(20));
    gm.poll();
    gm.poll();
    let events = drain(&mut gm);
    let timeouts = events
        .iter()
        .filter(|event| matches!(event, RelayEvent::RequestTimedOut { .. }))
        .count();
    assert_eq!(timeouts, 1);
    assert_eq!(
        notices(&events, NoticeLevel::Error),
        vec!["No answer from Ana yet."]
    );
    assert!(matches!(gm.viewer_state(), ViewerState::Requesting(_)));
}

#[test]
fn opening_a_local_record_leaves_the_view() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let own = gm.create_record().unwrap();
    let (mut ana, kaya) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    gm.select_by_id(&kaya).unwrap();
    poll_all(&mut [&mut ana, &mut gm]);
    assert!(gm.viewer_state().is_read_only());

    let record = gm.open_local(&own).unwrap();
    assert_eq!(record.id, own);
    assert_eq!(gm.viewer_state(), &ViewerState::Idle);
    assert!(!gm.viewer_state().is_read_only());

    // a late update no longer reaches the surface
    ana.save(named("Kaya, level 2")).unwrap();
    gm.poll();
    assert_eq!(gm.viewer_state(), &ViewerState::Idle);
}

#[test]
fn owners_cannot_select() {
    let mut room = Room::new();
    let (mut ana, _) = owner_with_record(&mut room, "p1", "Ana", "Kaya");
    let (_bo, rook) = owner_with_record(&mut room, "p2", "Bo", "Rook");
    assert!(matches!(
        ana.select_by_id(&rook),
        Err(RelayError::RoleMismatch {
            expected: Role::Viewer,
            actual: Role::Owner
        })
    ));
    assert_eq!(ana.viewer_state(), &ViewerState::Idle);
}

#[test]
fn selecting_an_unlisted_record_fails() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    assert!(matches!(
        gm.select_by_id(&RecordId::from("ghost")),
        Err(RelayError::UnknownRecord { .. })
    ));
    let events = drain(&mut gm);
    assert_eq!(
        notices(&events, NoticeLevel::Error),
        vec!["That character is no longer listed."]
    );
}
