//! Owner-side request handling: only the addressed owner ever answers.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use record_relay::network::codec::{decode_message, encode_message};
use record_relay::telemetry::ViolationKind;
use record_relay::{
    BroadcastBus, BusMessage, ClientId, FieldValue, Fields, MemoryPrivateStore, MessageKind,
    PrivateStore, Record, RecordId, Role, StaticIdentity, Topics,
};

use crate::common::{poll_all, Room, NAMESPACE};

fn request(record: &RecordId, owner: &str) -> Vec<u8> {
    encode_message(&BusMessage::request(record.clone(), ClientId::from(owner))).unwrap()
}

#[test]
fn only_the_addressed_owner_responds() {
    let mut room = Room::new();
    let topics = Topics::new(NAMESPACE);
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let mut bo = room.join("p2", "Bo", Role::Owner);
    let record = ana.create_record().unwrap();
    let mut spy = room.spy(topics.push());
    let mut viewer = room.broker.endpoint();

    // bo is addressed but does not hold the record; nobody is p3
    viewer.publish(topics.request(), &request(&record, "p2"));
    viewer.publish(topics.request(), &request(&record, "p3"));
    poll_all(&mut [&mut ana, &mut bo]);
    assert!(spy.receive_all_messages().is_empty());

    viewer.publish(topics.request(), &request(&record, "p1"));
    poll_all(&mut [&mut ana, &mut bo]);
    let pushed = spy.receive_all_messages();
    assert_eq!(pushed.len(), 1);
    let response = decode_message(&pushed[0].1).unwrap();
    assert_eq!(response.kind, MessageKind::Response);
    assert_eq!(response.record_id, record);
    assert_eq!(response.owner_id, ClientId::from("p1"));
}

#[test]
fn a_copied_record_is_not_served_by_the_wrong_owner() {
    let mut room = Room::new();
    let topics = Topics::new(NAMESPACE);
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let record = ana.create_record().unwrap();
    // bo holds a local copy under the same id
    let mut copy = MemoryPrivateStore::new();
    copy.put(Record::new(record.clone(), ClientId::from("p2"), "Bo", 0))
        .unwrap();
    let builder = room.builder();
    let mut bo = room.join_with(builder, StaticIdentity::new("p2", "Bo", Role::Owner), copy);

    let mut spy = room.spy(topics.push());
    let mut viewer = room.broker.endpoint();
    viewer.publish(topics.request(), &request(&record, "p1"));
    poll_all(&mut [&mut ana, &mut bo]);

    let owners: Vec<ClientId> = spy
        .receive_all_messages()
        .iter()
        .map(|(_, payload)| decode_message(payload).unwrap().owner_id)
        .collect();
    assert_eq!(owners, vec![ClientId::from("p1")]);
}

#[test]
fn unknown_records_get_no_answer() {
    let mut room = Room::new();
    let topics = Topics::new(NAMESPACE);
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let mut spy = room.spy(topics.push());
    let mut viewer = room.broker.endpoint();

    viewer.publish(topics.request(), &request(&RecordId::from("missing"), "p1"));
    ana.poll();
    assert!(spy.receive_all_messages().is_empty());
    assert!(room.observer.is_empty());
}

#[test]
fn saving_pushes_an_update_unless_quiet() {
    let mut room = Room::new();
    let topics = Topics::new(NAMESPACE);
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let mut spy = room.spy(topics.push());
    ana.create_record().unwrap();

    let mut fields = Fields::new();
    fields.insert("name".to_owned(), FieldValue::from("Kaya"));
    ana.save(fields.clone()).unwrap();
    let pushed = spy.receive_all_messages();
    assert_eq!(pushed.len(), 1);
    let update = decode_message(&pushed[0].1).unwrap();
    assert_eq!(update.kind, MessageKind::Update);
    assert_eq!(
        update.fields.unwrap().get("name"),
        Some(&FieldValue::from("Kaya"))
    );

    let builder = room
        .builder()
        .with_owner_config(record_relay::OwnerConfig::quiet());
    let mut quiet = room.join_with(
        builder,
        record_relay::StaticIdentity::new("p2", "Bo", Role::Owner),
        record_relay::MemoryPrivateStore::new(),
    );
    quiet.create_record().unwrap();
    quiet.save(fields).unwrap();
    assert!(spy.receive_all_messages().is_empty());
}

#[test]
fn malformed_traffic_is_reported_not_answered() {
    let mut room = Room::new();
    let topics = Topics::new(NAMESPACE);
    let mut ana = room.join("p1", "Ana", Role::Owner);
    let record = ana.create_record().unwrap();
    let mut spy = room.spy(topics.push());
    let mut rogue = room.broker.endpoint();

    rogue.publish(topics.request(), b"\x00garbage");
    let misplaced = BusMessage::response(record, ClientId::from("p1"), Fields::new());
    rogue.publish(topics.request(), &encode_message(&misplaced).unwrap());
    ana.poll();

    assert!(spy.receive_all_messages().is_empty());
    assert_eq!(
        room.observer
            .violations_of_kind(ViolationKind::Broadcast)
            .len(),
        2
    );
}
