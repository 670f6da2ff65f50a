//! The viewer half of the protocol: which record the viewer is looking at and what it shows.
//!
//! [`ViewerSession`] performs no I/O. The [`RelayClient`](crate::RelayClient) publishes the
//! requests it returns and feeds it every response and update it receives; the session
//! decides what becomes visible.
//!
//! ```text
//!            select                     RESPONSE / UPDATE for ctx
//!   Idle ───────────► Requesting(ctx) ─────────────────────────► Viewing(ctx, fields)
//!    ▲                     ▲  │                                      │   ▲
//!    │ close               │  └─ select(other) ── Requesting(other)  │   │ UPDATE for ctx
//!    └─────────────────────┴──────────────────────────────────────────┘───┘
//! ```
//!
//! Messages for any other record or owner are dropped, so a late answer to an abandoned
//! request can never overwrite the current view.

use std::collections::BTreeMap;

use tracing::{debug, trace};
use web_time::Instant;

use crate::index::IndexEntry;
use crate::network::messages::{BusMessage, MessageKind};
use crate::sessions::config::ViewerConfig;
use crate::{ClientId, Fields, RecordId, RelayEvent};

/// The record a viewer is currently interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewingContext {
    /// The record being viewed.
    pub record_id: RecordId,
    /// Its owner, the only client whose answers are accepted.
    pub owner_id: ClientId,
}

impl ViewingContext {
    /// Creates a new context.
    #[must_use]
    pub fn new(record_id: RecordId, owner_id: ClientId) -> Self {
        Self {
            record_id,
            owner_id,
        }
    }

    /// The context of an index entry.
    #[must_use]
    pub fn for_entry(entry: &IndexEntry) -> Self {
        Self::new(entry.record_id.clone(), entry.owner_id.clone())
    }

    /// Returns `true` if `message` is about this context's record and owner.
    #[must_use]
    pub fn matches(&self, message: &BusMessage) -> bool {
        message.concerns(&self.record_id, &self.owner_id)
    }
}

/// What the viewer's surface shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewerState {
    /// Not viewing anything; the surface belongs to the local record and is editable.
    #[default]
    Idle,
    /// A request is outstanding; the surface is cleared and read-only.
    Requesting(ViewingContext),
    /// The surface shows `fields` of the context's record, read-only.
    Viewing(ViewingContext, Fields),
}

impl ViewerState {
    /// The current context, unless idle.
    #[must_use]
    pub fn context(&self) -> Option<&ViewingContext> {
        match self {
            Self::Idle => None,
            Self::Requesting(context) | Self::Viewing(context, _) => Some(context),
        }
    }

    /// The fields on display, if any have arrived.
    #[must_use]
    pub fn fields(&self) -> Option<&Fields> {
        match self {
            Self::Viewing(_, fields) => Some(fields),
            Self::Idle | Self::Requesting(_) => None,
        }
    }

    /// Returns `true` if the surface must not be edited.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// The viewer state machine.
#[derive(Debug, Clone)]
pub struct ViewerSession {
    state: ViewerState,
    config: ViewerConfig,
    owner_label: String,
    requested_at: Option<Instant>,
    timeout_reported: bool,
}

impl ViewerSession {
    /// Creates an idle session.
    #[must_use]
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            state: ViewerState::Idle,
            config,
            owner_label: String::new(),
            requested_at: None,
            timeout_reported: false,
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    /// The current context, unless idle.
    #[must_use]
    pub fn context(&self) -> Option<&ViewingContext> {
        self.state.context()
    }

    /// The owner display name of the selected entry, for notices.
    #[must_use]
    pub fn owner_label(&self) -> &str {
        &self.owner_label
    }

    /// The session's configuration.
    #[must_use]
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Switches to `entry`, dropping whatever was shown, and returns the request to publish.
    ///
    /// Allowed from every state. Selecting the record already on display asks its owner
    /// again.
    pub fn select(&mut self, entry: &IndexEntry, now: Instant) -> BusMessage {
        let context = ViewingContext::for_entry(entry);
        debug!(record = %context.record_id, owner = %context.owner_id, "requesting record");
        let request = BusMessage::request(context.record_id.clone(), context.owner_id.clone());
        self.state = ViewerState::Requesting(context);
        self.owner_label.clone_from(&entry.owner_display_name);
        self.requested_at = Some(now);
        self.timeout_reported = false;
        request
    }

    /// Applies a message received on the push topic.
    ///
    /// Returns [`RelayEvent::ViewUpdated`] if the message is a response or update for the
    /// current context, and `None` for everything else.
    pub fn handle_message(&mut self, message: &BusMessage) -> Option<RelayEvent> {
        if message.kind == MessageKind::Request {
            trace!(record = %message.record_id, "viewer ignores requests");
            return None;
        }
        let Some(context) = self.state.context() else {
            trace!(record = %message.record_id, kind = %message.kind, "not viewing; dropped");
            return None;
        };
        if !context.matches(message) {
            trace!(
                record = %message.record_id,
                owner = %message.owner_id,
                kind = %message.kind,
                "message for another context; dropped"
            );
            return None;
        }
        let context = context.clone();
        let fields = message.fields.clone().unwrap_or_default();
        if matches!(self.state, ViewerState::Requesting(_)) {
            debug!(record = %context.record_id, kind = %message.kind, "now viewing");
        }
        self.state = ViewerState::Viewing(context.clone(), fields.clone());
        self.requested_at = None;
        Some(RelayEvent::ViewUpdated {
            context,
            fields,
            source: message.kind,
        })
    }

    /// Reports an unanswered request once, if a request timeout is configured.
    pub fn check_timeout(&mut self, now: Instant) -> Option<RelayEvent> {
        let timeout = self.config.request_timeout?;
        let ViewerState::Requesting(context) = &self.state else {
            return None;
        };
        let requested_at = self.requested_at?;
        if self.timeout_reported {
            return None;
        }
        let waited = now.saturating_duration_since(requested_at);
        if waited < timeout {
            return None;
        }
        self.timeout_reported = true;
        debug!(record = %context.record_id, waited_ms = waited.as_millis(), "request timed out");
        Some(RelayEvent::RequestTimedOut {
            context: context.clone(),
            waited_ms: waited.as_millis(),
        })
    }

    /// Reacts to a fresh read of the index. With
    /// [`close_when_entry_removed`](ViewerConfig::close_when_entry_removed) set, a view whose
    /// entry disappeared (or changed owner) is closed.
    pub fn on_index_refreshed(
        &mut self,
        entries: &BTreeMap<RecordId, IndexEntry>,
    ) -> Option<RelayEvent> {
        if !self.config.close_when_entry_removed {
            return None;
        }
        let context = self.state.context()?;
        let listed = entries
            .get(&context.record_id)
            .is_some_and(|entry| entry.owner_id == context.owner_id);
        if listed {
            return None;
        }
        debug!(record = %context.record_id, "viewed entry left the index");
        self.close()
    }

    /// Returns to idle. Returns [`RelayEvent::ViewClosed`] if something was selected.
    pub fn close(&mut self) -> Option<RelayEvent> {
        let previous = std::mem::take(&mut self.state);
        self.requested_at = None;
        self.timeout_reported = false;
        match previous {
            ViewerState::Idle => None,
            ViewerState::Requesting(context) | ViewerState::Viewing(context, _) => {
                Some(RelayEvent::ViewClosed { context })
            },
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::FieldValue;
    use web_time::Duration;

    fn entry(record: &str, owner: &str) -> IndexEntry {
        IndexEntry {
            record_id: RecordId::from(record),
            display_name: "Kaya".to_owned(),
            owner_id: ClientId::from(owner),
            owner_display_name: format!("{owner}-name"),
        }
    }

    fn fields(name: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".to_owned(), FieldValue::from(name));
        fields
    }

    #[test]
    fn select_builds_a_request_and_clears_the_surface() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        let request = viewer.select(&entry("r1", "p1"), Instant::now());
        assert_eq!(
            request,
            BusMessage::request(RecordId::from("r1"), ClientId::from("p1"))
        );
        assert_eq!(
            viewer.state(),
            &ViewerState::Requesting(ViewingContext::new("r1".into(), "p1".into()))
        );
        assert!(viewer.state().is_read_only());
        assert_eq!(viewer.owner_label(), "p1-name");
    }

    #[test]
    fn matching_response_is_shown() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        viewer.select(&entry("r1", "p1"), Instant::now());
        let response = BusMessage::response("r1".into(), "p1".into(), fields("Kaya"));
        let event = viewer.handle_message(&response).unwrap();
        assert!(matches!(
            event,
            RelayEvent::ViewUpdated {
                source: MessageKind::Response,
                ..
            }
        ));
        assert_eq!(viewer.state().fields(), Some(&fields("Kaya")));
    }

    #[test]
    fn late_response_for_a_previous_selection_is_dropped() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        viewer.select(&entry("r1", "p1"), Instant::now());
        viewer.select(&entry("r2", "p2"), Instant::now());
        let late = BusMessage::response("r1".into(), "p1".into(), fields("Old"));
        assert!(viewer.handle_message(&late).is_none());
        assert_eq!(
            viewer.context(),
            Some(&ViewingContext::new("r2".into(), "p2".into()))
        );
        assert!(viewer.state().fields().is_none());
    }

    #[test]
    fn same_record_from_another_sender_is_dropped() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        viewer.select(&entry("r1", "p1"), Instant::now());
        let forged = BusMessage::update("r1".into(), "p2".into(), fields("Forged"));
        assert!(viewer.handle_message(&forged).is_none());
    }

    #[test]
    fn updates_replace_the_view() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        viewer.select(&entry("r1", "p1"), Instant::now());
        viewer.handle_message(&BusMessage::response("r1".into(), "p1".into(), fields("A")));
        viewer.handle_message(&BusMessage::update("r1".into(), "p1".into(), fields("B")));
        assert_eq!(viewer.state().fields(), Some(&fields("B")));
    }

    #[test]
    fn missing_fields_read_as_empty() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        viewer.select(&entry("r1", "p1"), Instant::now());
        let mut bare = BusMessage::response("r1".into(), "p1".into(), Fields::new());
        bare.fields = None;
        viewer.handle_message(&bare).unwrap();
        assert_eq!(viewer.state().fields(), Some(&Fields::new()));
    }

    #[test]
    fn idle_viewer_drops_everything() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        let update = BusMessage::update("r1".into(), "p1".into(), fields("A"));
        assert!(viewer.handle_message(&update).is_none());
        assert_eq!(viewer.state(), &ViewerState::Idle);
    }

    #[test]
    fn no_timeout_without_configuration() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        let start = Instant::now();
        viewer.select(&entry("r1", "p1"), start);
        assert!(viewer
            .check_timeout(start + Duration::from_secs(3600))
            .is_none());
    }

    #[test]
    fn timeout_is_reported_once() {
        let mut viewer = ViewerSession::new(ViewerConfig::responsive());
        let start = Instant::now();
        viewer.select(&entry("r1", "p1"), start);
        assert!(viewer.check_timeout(start + Duration::from_secs(1)).is_none());
        let event = viewer.check_timeout(start + Duration::from_secs(4)).unwrap();
        assert!(matches!(event, RelayEvent::RequestTimedOut { waited_ms, .. } if waited_ms >= 3000));
        assert!(viewer.check_timeout(start + Duration::from_secs(8)).is_none());
        assert!(matches!(viewer.state(), ViewerState::Requesting(_)));
    }

    #[test]
    fn answered_request_does_not_time_out() {
        let mut viewer = ViewerSession::new(ViewerConfig::responsive());
        let start = Instant::now();
        viewer.select(&entry("r1", "p1"), start);
        viewer.handle_message(&BusMessage::response("r1".into(), "p1".into(), fields("A")));
        assert!(viewer.check_timeout(start + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn removed_entry_keeps_the_view_by_default() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        viewer.select(&entry("r1", "p1"), Instant::now());
        viewer.handle_message(&BusMessage::response("r1".into(), "p1".into(), fields("A")));
        assert!(viewer.on_index_refreshed(&BTreeMap::new()).is_none());
        assert!(matches!(viewer.state(), ViewerState::Viewing(..)));
    }

    #[test]
    fn removed_entry_closes_the_view_when_configured() {
        let mut viewer = ViewerSession::new(ViewerConfig::strict());
        viewer.select(&entry("r1", "p1"), Instant::now());
        let mut entries = BTreeMap::new();
        entries.insert(RecordId::from("r1"), entry("r1", "p1"));
        assert!(viewer.on_index_refreshed(&entries).is_none());

        let event = viewer.on_index_refreshed(&BTreeMap::new()).unwrap();
        assert!(matches!(event, RelayEvent::ViewClosed { .. }));
        assert_eq!(viewer.state(), &ViewerState::Idle);
    }

    #[test]
    fn close_reports_only_when_something_was_open() {
        let mut viewer = ViewerSession::new(ViewerConfig::default());
        assert!(viewer.close().is_none());
        viewer.select(&entry("r1", "p1"), Instant::now());
        assert!(viewer.close().is_some());
        assert!(!viewer.state().is_read_only());
    }
}
