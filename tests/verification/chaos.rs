//! The viewer's guarantees over a bus that loses, duplicates and reorders messages.
//!
//! Every client talks through a seeded [`ChaosBus`], so each run is reproducible. Owners keep
//! saving while the game master keeps switching between records; after every poll the
//! viewer may show nothing, but whatever it shows must belong to its current selection.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::collections::BTreeMap;

use record_relay::{
    ChaosBus, ChaosConfig, ClientId, FieldValue, Fields, MemoryPrivateStore, RecordId,
    RelayClient, Role, StaticIdentity, ViewerState, ViewingContext,
};

use crate::common::Room;

fn join_through_chaos(
    room: &mut Room,
    id: &str,
    name: &str,
    role: Role,
    config: ChaosConfig,
) -> RelayClient {
    room.builder()
        .start(
            StaticIdentity::new(id, name, role),
            MemoryPrivateStore::new(),
            room.shared.clone(),
            ChaosBus::new(room.broker.endpoint(), config),
        )
        .unwrap()
}

fn named(name: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_owned(), FieldValue::from(name));
    fields
}

fn shown_name(fields: &Fields) -> &str {
    fields
        .get("name")
        .and_then(FieldValue::as_text)
        .unwrap_or_default()
}

#[test]
fn viewer_never_shows_another_context_under_chaos() {
    for seed in 0..8u64 {
        let mut room = Room::new();
        let mut ana = join_through_chaos(&mut room, "p1", "Ana", Role::Owner, ChaosConfig::scrambled(seed));
        let mut bo = join_through_chaos(&mut room, "p2", "Bo", Role::Owner, ChaosConfig::scrambled(seed + 100));
        let mut gm = join_through_chaos(
            &mut room,
            "gm",
            "Game Master",
            Role::Viewer,
            ChaosConfig::scrambled(seed + 200),
        );

        let kaya = ana.create_record().unwrap();
        let rook = bo.create_record().unwrap();
        let targets = [
            ViewingContext::new(kaya.clone(), ClientId::from("p1")),
            ViewingContext::new(rook.clone(), ClientId::from("p2")),
        ];
        let mut history: BTreeMap<RecordId, Vec<String>> = BTreeMap::new();
        history.insert(kaya.clone(), vec!["New Character".to_owned()]);
        history.insert(rook.clone(), vec!["New Character".to_owned()]);

        let mut selected: Option<usize> = None;
        for step in 0..80usize {
            if step % 9 == 0 {
                let target = (step / 9) % targets.len();
                gm.select_by_id(&targets[target].record_id).unwrap();
                selected = Some(target);
            }
            if step % 3 == 0 {
                let name = format!("Kaya {step}");
                ana.save(named(&name)).unwrap();
                history.get_mut(&kaya).unwrap().push(name);
            }
            if step % 4 == 1 {
                let name = format!("Rook {step}");
                bo.save(named(&name)).unwrap();
                history.get_mut(&rook).unwrap().push(name);
            }

            // vary who gets to answer first
            if step % 2 == 0 {
                ana.poll();
                bo.poll();
            } else {
                bo.poll();
                ana.poll();
            }
            gm.poll();

            let current = selected.map(|target| &targets[target]);
            match gm.viewer_state() {
                ViewerState::Idle => assert!(current.is_none(), "seed {seed} step {step}"),
                ViewerState::Requesting(context) => {
                    assert_eq!(Some(context), current, "seed {seed} step {step}");
                },
                ViewerState::Viewing(context, fields) => {
                    assert_eq!(Some(context), current, "seed {seed} step {step}");
                    let name = shown_name(fields);
                    assert!(
                        history[&context.record_id].iter().any(|known| known == name),
                        "seed {seed} step {step}: {name:?} was never saved for {}",
                        context.record_id
                    );
                },
            }
        }
        assert!(room.observer.is_empty(), "seed {seed}");
    }
}

#[test]
fn duplicated_traffic_still_settles_on_the_latest_save() {
    let config = |seed| {
        ChaosConfig::builder()
            .duplication_rate(0.5)
            .seed(seed)
            .build()
    };
    let mut room = Room::new();
    let mut ana = join_through_chaos(&mut room, "p1", "Ana", Role::Owner, config(1));
    let mut gm = join_through_chaos(&mut room, "gm", "Game Master", Role::Viewer, config(2));

    let kaya = ana.create_record().unwrap();
    ana.save(named("Kaya")).unwrap();
    gm.select_by_id(&kaya).unwrap();
    ana.poll();
    gm.poll();
    assert_eq!(
        gm.viewer_state().fields().map(shown_name),
        Some("Kaya")
    );

    for level in 2..6 {
        ana.save(named(&format!("Kaya, level {level}"))).unwrap();
        ana.poll();
        gm.poll();
    }
    assert_eq!(
        gm.viewer_state().fields().map(shown_name),
        Some("Kaya, level 5")
    );
}
