//! A full session: two players and a game master sharing one room.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use record_relay::network::codec::decode_message;
use record_relay::{
    BroadcastBus, ClientId, FieldValue, Fields, MessageKind, NoticeLevel, RelayError, RelayEvent,
    Role, Topics, ViewerState, ViewingContext,
};

use crate::common::{drain, notices, poll_all, view_updates, Room, NAMESPACE};

fn sheet(name: &str, hp: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_owned(), FieldValue::from(name));
    fields.insert("hp_cur".to_owned(), FieldValue::from(hp));
    fields.insert("save_ref".to_owned(), FieldValue::from(true));
    fields
}

#[test]
fn two_players_and_a_game_master() {
    let mut room = Room::new();
    let topics = Topics::new(NAMESPACE);
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let mut spy = room.spy(topics.push());

    let kaya = ana.create_record().unwrap();
    ana.save(sheet("Kaya", "12")).unwrap();
    let events = drain(&mut ana);
    assert_eq!(
        notices(&events, NoticeLevel::Info),
        vec!["New character created.", "Saved."]
    );
    // nobody was viewing yet, but the save still announced itself
    assert_eq!(spy.receive_all_messages().len(), 1);

    // players see the index but may not browse it
    assert!(matches!(
        bo.directory(),
        Err(RelayError::RoleMismatch { .. })
    ));
    assert!(bo.index().read_all().unwrap().contains_key(&kaya));

    let directory = gm.directory().unwrap();
    assert_eq!(directory.len(), 1);
    assert_eq!(directory[0].label(), "Kaya (Ana)");
    assert!(!directory[0].is_own);

    gm.select(&directory[0].entry).unwrap();
    poll_all(&mut [&mut ana, &mut bo, &mut gm]);

    assert_eq!(
        gm.viewer_state().context(),
        Some(&ViewingContext::new(kaya.clone(), ClientId::from("p1")))
    );
    let shown = gm.viewer_state().fields().unwrap();
    assert_eq!(shown.get("name"), Some(&FieldValue::from("Kaya")));
    assert_eq!(shown.get("hp_cur"), Some(&FieldValue::from("12")));

    let responses: Vec<_> = spy
        .receive_all_messages()
        .iter()
        .map(|(_, payload)| decode_message(payload).unwrap())
        .collect();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].kind, MessageKind::Response);
    assert_eq!(responses[0].owner_id, ClientId::from("p1"));

    // bo only ever saw a request addressed to someone else
    assert_eq!(bo.viewer_state(), &ViewerState::Idle);
    assert!(!drain(&mut bo)
        .iter()
        .any(|event| matches!(event, RelayEvent::ViewUpdated { .. })));

    drain(&mut gm);
    ana.save(sheet("Kaya", "7")).unwrap();
    poll_all(&mut [&mut bo, &mut gm]);
    let events = drain(&mut gm);
    assert_eq!(view_updates(&events), 1);
    assert_eq!(
        gm.viewer_state().fields().unwrap().get("hp_cur"),
        Some(&FieldValue::from("7"))
    );
    assert!(room.observer.is_empty());
}

#[test]
fn the_game_master_lists_own_records_as_theirs() {
    let mut room = Room::new();
    let mut gm = room.join("gm", "Game Master", Role::Viewer);
    let mut ana = room.join("p1", "Ana", Role::Owner);
    gm.create_record().unwrap();
    ana.create_record().unwrap();

    let mut labels: Vec<String> = gm.directory().unwrap().iter().map(|e| e.label()).collect();
    labels.sort();
    assert_eq!(labels, vec!["New Character (Ana)", "New Character (You)"]);
}
