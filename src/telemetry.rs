//! Structured reports of protocol anomalies.
//!
//! The relay runs against storage and transports it does not control. Foreign clients may
//! write odd entries into the shared index and the bus may deliver garbage. None of that is an
//! error for the caller, but each case is reported as a [`Violation`] to the client's
//! [`ViolationObserver`], or logged through `tracing` when no observer is configured.
//!
//! ```
//! use record_relay::telemetry::CollectingObserver;
//! use record_relay::RelayBuilder;
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! let builder = RelayBuilder::new().with_violation_observer(observer.clone());
//! assert!(observer.is_empty());
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use crate::RecordId;

/// How bad a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// The offending data was skipped or repaired.
    Warning,
    /// An operation was refused or degraded.
    Error,
}

impl ViolationSeverity {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a violation came from.
///
/// New kinds may be added; match with a wildcard arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// An index entry carried record fields, lacked an owner, or was not an object.
    SharedIndex,
    /// A bus payload was undecodable, on the wrong topic, or a request carried fields.
    Broadcast,
    /// The private store answered with a record other than the one asked for.
    PrivateStore,
    /// A client saved a record whose stored owner is someone else.
    Ownership,
    /// An export document was rejected.
    Import,
    /// A configuration failed validation.
    Configuration,
    /// Something the crate itself produced could not be encoded.
    InternalError,
}

impl ViolationKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SharedIndex => "shared_index",
            Self::Broadcast => "broadcast",
            Self::PrivateStore => "private_store",
            Self::Ownership => "ownership",
            Self::Import => "import",
            Self::Configuration => "configuration",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the relay tolerated but did not expect.
///
/// ```
/// use record_relay::telemetry::{Violation, ViolationKind, ViolationSeverity};
/// use record_relay::RecordId;
///
/// let violation = Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::SharedIndex,
///     "entry carried fields",
///     "index.rs:42",
/// )
/// .with_record(RecordId::from("r1"));
///
/// assert_eq!(
///     violation.to_string(),
///     "[warning/shared_index] entry carried fields (index.rs:42, record r1)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// Which subsystem noticed it.
    pub kind: ViolationKind,
    /// What happened.
    pub message: String,
    /// `file:line` of the report.
    pub location: &'static str,
    /// The record involved, if any.
    pub record: Option<RecordId>,
}

impl Violation {
    /// Creates a violation not tied to a record.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            record: None,
        }
    }

    /// Ties the violation to a record.
    #[must_use]
    pub fn with_record(mut self, record: RecordId) -> Self {
        self.record = Some(record);
        self
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} ({}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(record) = &self.record {
            write!(f, ", record {record}")?;
        }
        f.write_str(")")
    }
}

/// Receives every violation a client or its shared index reports.
///
/// Observers are shared between threads and called inline, so keep them cheap.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use record_relay::telemetry::{Violation, ViolationKind, ViolationObserver};
///
/// #[derive(Default)]
/// struct IndexDamage(AtomicUsize);
///
/// impl ViolationObserver for IndexDamage {
///     fn on_violation(&self, violation: &Violation) {
///         if violation.kind == ViolationKind::SharedIndex {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait ViolationObserver: Send + Sync {
    /// Called once per violation.
    fn on_violation(&self, violation: &Violation);
}

/// Logs violations through `tracing`: warnings at `warn`, errors at `error`. Used when no
/// observer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let kind = violation.kind.as_str();
        let location = violation.location;
        let record = violation.record.as_ref().map(RecordId::as_str);
        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(kind, location, record, "{}", violation.message);
            },
            ViolationSeverity::Error => {
                tracing::error!(kind, location, record, "{}", violation.message);
            },
        }
    }
}

/// Keeps every violation in memory. Meant for tests.
///
/// ```
/// use record_relay::telemetry::{
///     CollectingObserver, Violation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::Broadcast,
///     "undecodable payload",
///     "test.rs:1",
/// ));
/// assert!(observer.has_violation(ViolationKind::Broadcast));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything collected so far, oldest first.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Number collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns `true` if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Returns `true` if a violation of `kind` was collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// The collected violations of `kind`.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<Violation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Hands `violation` to `observer`, or to [`TracingObserver`] without one.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &Violation,
) {
    match observer {
        Some(observer) => observer.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Builds a [`Violation`] at the call site and reports it.
///
/// ```text
/// report_violation!(observer, severity, kind, record, "message");
/// report_violation!(observer, severity, kind, record, "message with {}", args);
/// ```
///
/// `observer` is an `&Option<Arc<dyn ViolationObserver>>`, `record` an `Option<RecordId>`.
///
/// ```
/// use record_relay::report_violation;
/// use record_relay::telemetry::{
///     CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
/// use std::sync::Arc;
///
/// let collector = Arc::new(CollectingObserver::new());
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
///
/// report_violation!(&observer, ViolationSeverity::Warning, ViolationKind::Broadcast, None,
///     "dropped payload of {} bytes", 12);
/// assert_eq!(collector.len(), 1);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($observer:expr, $severity:expr, $kind:expr, $record:expr, $msg:literal) => {{
        let mut violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        violation.record = $record;
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $record:expr, $fmt:literal, $($arg:tt)+) => {{
        let mut violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        violation.record = $record;
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

/// Panics listing every violation `observer` collected, if any.
#[macro_export]
macro_rules! assert_no_violations {
    ($observer:expr) => {{
        let violations = $observer.violations();
        assert!(
            violations.is_empty(),
            "expected no violations, found {}:\n{:#?}",
            violations.len(),
            violations
        );
    }};
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

    fn sample() -> Violation {
        Violation::new(
            ViolationSeverity::Error,
            ViolationKind::PrivateStore,
            "record listed twice",
            "test.rs:1",
        )
    }

    #[test]
    fn display_without_record() {
        assert_eq!(
            sample().to_string(),
            "[error/private_store] record listed twice (test.rs:1)"
        );
    }

    #[test]
    fn serializes_kinds_in_snake_case() {
        let json = serde_json::to_value(sample().with_record(RecordId::from("r9"))).unwrap();
        assert_eq!(json["kind"], "private_store");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["record"], "r9");
    }

    #[test]
    fn collecting_observer_filters_by_kind() {
        let observer = CollectingObserver::new();
        assert_no_violations!(observer);
        observer.on_violation(&sample());
        observer.on_violation(&Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::Import,
            "bad kind",
            "test.rs:2",
        ));
        assert_eq!(observer.violations_of_kind(ViolationKind::Import).len(), 1);
        assert!(!observer.has_violation(ViolationKind::Ownership));
    }

    #[test]
    fn report_macro_records_location_and_record() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::SharedIndex,
            Some(RecordId::from("r1")),
            "entry for {} had no owner",
            "r1"
        );
        let violations = collector.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].record, Some(RecordId::from("r1")));
        assert!(violations[0].location.contains("telemetry.rs"));
    }

    #[test]
    fn report_macro_without_observer_logs_only() {
        let observer: Option<Arc<dyn ViolationObserver>> = None;
        report_violation!(
            &observer,
            ViolationSeverity::Error,
            ViolationKind::InternalError,
            None,
            "nothing collects this"
        );
    }
}
