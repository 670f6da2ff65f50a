//! Property-based tests for the viewer state machine, the shared index and export documents.
//!
//! # Properties Tested
//!
//! - A viewer only ever displays the record it selected last, with the fields of the latest
//!   response or update for that record and owner
//! - Index upserts and removals agree with a plain map, in both write modes, and the stored
//!   blob never carries record fields
//! - Exporting and importing a record keeps its id, creation time and fields

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use record_relay::{
    BusMessage, ClientId, ExportDocument, FieldValue, Fields, IndexEntry, IndexPatch,
    IndexWriteMode, MemorySharedStore, MessageKind, Record, RecordId, SharedIndex, SharedStore,
    ViewerConfig, ViewerSession, ViewerState, ViewingContext,
};
use web_time::Instant;

// ============================================================================
// Strategies
// ============================================================================

const RECORDS: [&str; 3] = ["r1", "r2", "r3"];
const OWNERS: [&str; 3] = ["p1", "p2", "p3"];

fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<String>().prop_map(FieldValue::Text),
        any::<bool>().prop_map(FieldValue::Flag),
    ]
}

fn fields() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map("[a-z_]{1,12}", field_value(), 0..8)
}

fn kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Request),
        Just(MessageKind::Response),
        Just(MessageKind::Update),
    ]
}

#[derive(Debug, Clone)]
enum ViewerOp {
    /// Select the entry for `RECORDS[record]`, owned by `OWNERS[record]`.
    Select { record: usize },
    Deliver {
        kind: MessageKind,
        record: usize,
        owner: usize,
        fields: Fields,
    },
    Close,
}

fn viewer_op() -> impl Strategy<Value = ViewerOp> {
    prop_oneof![
        2 => (0..RECORDS.len()).prop_map(|record| ViewerOp::Select { record }),
        6 => (kind(), 0..RECORDS.len(), 0..OWNERS.len(), fields()).prop_map(
            |(kind, record, owner, fields)| ViewerOp::Deliver {
                kind,
                record,
                owner,
                fields,
            }
        ),
        1 => Just(ViewerOp::Close),
    ]
}

#[derive(Debug, Clone)]
enum IndexOp {
    Upsert {
        record: usize,
        name: Option<String>,
        owner: Option<usize>,
    },
    Remove {
        record: usize,
    },
}

fn index_op() -> impl Strategy<Value = IndexOp> {
    prop_oneof![
        3 => (
            0..RECORDS.len(),
            prop::option::of("[A-Za-z ]{0,10}"),
            prop::option::of(0..OWNERS.len()),
        )
            .prop_map(|(record, name, owner)| IndexOp::Upsert { record, name, owner }),
        1 => (0..RECORDS.len()).prop_map(|record| IndexOp::Remove { record }),
    ]
}

fn entry(record: usize) -> IndexEntry {
    IndexEntry {
        record_id: RecordId::from(RECORDS[record]),
        display_name: format!("Record {record}"),
        owner_id: ClientId::from(OWNERS[record]),
        owner_display_name: format!("Owner {record}"),
    }
}

// ============================================================================
// Viewer
// ============================================================================

proptest! {
    /// Whatever arrives in whatever order, a viewing state always belongs to the last
    /// selection and shows the latest matching payload.
    #[test]
    fn prop_viewer_shows_only_the_selected_record(
        ops in prop::collection::vec(viewer_op(), 1..60),
    ) {
        let mut session = ViewerSession::new(ViewerConfig::default());
        let mut selected: Option<ViewingContext> = None;
        let mut latest: Option<Fields> = None;

        for op in ops {
            match op {
                ViewerOp::Select { record } => {
                    let request = session.select(&entry(record), Instant::now());
                    prop_assert_eq!(request.kind, MessageKind::Request);
                    prop_assert!(request.fields.is_none());
                    selected = Some(ViewingContext::for_entry(&entry(record)));
                    latest = None;
                },
                ViewerOp::Deliver { kind, record, owner, fields } => {
                    let message = BusMessage {
                        kind,
                        record_id: RecordId::from(RECORDS[record]),
                        owner_id: ClientId::from(OWNERS[owner]),
                        fields: (kind != MessageKind::Request).then(|| fields.clone()),
                    };
                    let matching = kind != MessageKind::Request
                        && selected.as_ref().is_some_and(|ctx| {
                            ctx.record_id == message.record_id && ctx.owner_id == message.owner_id
                        });
                    let event = session.handle_message(&message);
                    prop_assert_eq!(event.is_some(), matching);
                    if matching {
                        latest = Some(fields);
                    }
                },
                ViewerOp::Close => {
                    session.close();
                    selected = None;
                    latest = None;
                },
            }

            match session.state() {
                ViewerState::Idle => prop_assert!(selected.is_none()),
                ViewerState::Requesting(ctx) => {
                    prop_assert_eq!(Some(ctx), selected.as_ref());
                    prop_assert!(latest.is_none());
                },
                ViewerState::Viewing(ctx, shown) => {
                    prop_assert_eq!(Some(ctx), selected.as_ref());
                    prop_assert_eq!(Some(shown), latest.as_ref());
                },
            }
        }
    }
}

// ============================================================================
// Shared index
// ============================================================================

fn run_index_ops(mode: IndexWriteMode, ops: &[IndexOp]) -> Result<(), TestCaseError> {
    let shared = MemorySharedStore::new();
    let index = SharedIndex::with_write_mode(Box::new(shared.clone()), "prop", mode).unwrap();
    let mut model: BTreeMap<RecordId, (Option<String>, Option<ClientId>)> = BTreeMap::new();

    for op in ops {
        match op {
            IndexOp::Upsert { record, name, owner } => {
                let id = RecordId::from(RECORDS[*record]);
                let mut patch = IndexPatch::new();
                if let Some(name) = name {
                    patch = patch.with_display_name(name.clone());
                }
                let owner_id = owner.map(|owner| ClientId::from(OWNERS[owner]));
                if let Some(owner_id) = &owner_id {
                    patch = patch.with_owner(owner_id.clone(), "Owner");
                }
                index.upsert(&id, &patch).unwrap();
                let slot = model.entry(id).or_default();
                if name.is_some() {
                    slot.0.clone_from(name);
                }
                if owner_id.is_some() {
                    slot.1 = owner_id;
                }
            },
            IndexOp::Remove { record } => {
                let id = RecordId::from(RECORDS[*record]);
                prop_assert_eq!(index.remove(&id).unwrap(), model.remove(&id).is_some());
            },
        }
    }

    // entries without an owner are stored but never read back
    let entries = index.read_all().unwrap();
    let readable: Vec<&RecordId> = model
        .iter()
        .filter(|(_, (_, owner))| owner.is_some())
        .map(|(id, _)| id)
        .collect();
    prop_assert_eq!(entries.keys().collect::<Vec<_>>(), readable);
    for (id, entry) in &entries {
        let (name, owner) = &model[id];
        prop_assert_eq!(Some(&entry.owner_id), owner.as_ref());
        let expected = match name.as_deref() {
            None | Some("") => "Untitled",
            Some(name) => name,
        };
        prop_assert_eq!(entry.display_name.as_str(), expected);
    }

    if let Some(raw) = shared.read(index.key()).unwrap() {
        let raw = raw.as_object().unwrap();
        prop_assert_eq!(raw.len(), model.len());
        for value in raw.values() {
            prop_assert!(value.get("fields").is_none());
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_whole_blob_index_matches_a_map(ops in prop::collection::vec(index_op(), 0..40)) {
        run_index_ops(IndexWriteMode::WholeBlob, &ops)?;
    }

    #[test]
    fn prop_atomic_index_matches_a_map(ops in prop::collection::vec(index_op(), 0..40)) {
        run_index_ops(IndexWriteMode::Atomic, &ops)?;
    }
}

// ============================================================================
// Export documents
// ============================================================================

proptest! {
    #[test]
    fn prop_export_keeps_record_contents(
        id in "[a-z0-9]{1,16}",
        owner in "[a-z0-9]{1,8}",
        created_at in any::<u64>(),
        fields in fields(),
    ) {
        let mut record = Record::new(RecordId::from(id.as_str()), ClientId::from(owner.as_str()), "Ana", created_at);
        record.fields = fields;

        let text = ExportDocument::new(record.clone()).to_json().unwrap();
        let imported = ExportDocument::parse(&text).unwrap();
        prop_assert_eq!(imported.id.as_ref(), Some(&record.id));
        prop_assert_eq!(imported.owner_id.as_ref(), Some(&record.owner_id));
        prop_assert_eq!(imported.created_at, Some(created_at));

        let rebound = imported.into_record(
            || RecordId::from("unused"),
            ClientId::from("other"),
            "Bo".to_owned(),
            0,
        );
        prop_assert_eq!(rebound.id, record.id);
        prop_assert_eq!(rebound.fields, record.fields);
        prop_assert_eq!(rebound.owner_id, ClientId::from("other"));
    }
}
