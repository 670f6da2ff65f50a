//! Configuration types for relay clients.
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `RelayConfig` | Namespace, event queue, index write mode | `atomic()` |
//! | `ViewerConfig` | Viewer timeouts and staleness handling | `responsive()`, `strict()` |
//! | `OwnerConfig` | Record defaults and save behavior | `quiet()` |
//!
//! # Example
//!
//! ```
//! use record_relay::{OwnerConfig, RelayBuilder, ViewerConfig};
//!
//! let builder = RelayBuilder::new()
//!     .with_namespace("dsp-sheet")
//!     .with_viewer_config(ViewerConfig::responsive())
//!     .with_owner_config(OwnerConfig::quiet());
//! ```

use web_time::Duration;

use crate::index::IndexWriteMode;
use crate::record::FieldSchema;
use crate::RelayError;

const MAX_EVENT_QUEUE_SIZE: usize = 10_000;
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Room-wide settings. Every client of a room must use the same namespace.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Use the
/// `..RelayConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RelayConfig has no effect unless passed to RelayBuilder::with_relay_config()"]
pub struct RelayConfig {
    /// Prefix of the shared index key and of both bus topics.
    ///
    /// Default: `"record-relay"`
    pub namespace: String,

    /// Maximum number of undrained [`RelayEvent`](crate::RelayEvent)s. The oldest event is
    /// dropped when the queue is full.
    ///
    /// Default: 100
    pub event_queue_size: usize,

    /// How the shared index is written.
    ///
    /// Default: [`IndexWriteMode::WholeBlob`]
    pub index_write_mode: IndexWriteMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            namespace: "record-relay".to_owned(),
            event_queue_size: 100,
            index_write_mode: IndexWriteMode::WholeBlob,
        }
    }
}

impl RelayConfig {
    /// Creates a new `RelayConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default settings with atomic index writes. Needs a shared store with atomic update
    /// support.
    pub fn atomic() -> Self {
        Self {
            index_write_mode: IndexWriteMode::Atomic,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for an empty namespace, a namespace containing
    /// whitespace or `:`, or an event queue size outside `1..=10000`.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.namespace.is_empty() {
            return Err(invalid("namespace must not be empty"));
        }
        if self
            .namespace
            .chars()
            .any(|c| c.is_whitespace() || c == ':')
        {
            return Err(invalid(format!(
                "namespace {:?} must not contain whitespace or ':'",
                self.namespace
            )));
        }
        if self.event_queue_size == 0 || self.event_queue_size > MAX_EVENT_QUEUE_SIZE {
            return Err(invalid(format!(
                "event_queue_size must be between 1 and {MAX_EVENT_QUEUE_SIZE}, got {}",
                self.event_queue_size
            )));
        }
        Ok(())
    }
}

/// Viewer behavior.
///
/// ```
/// use record_relay::ViewerConfig;
/// use web_time::Duration;
///
/// let config = ViewerConfig {
///     request_timeout: Some(Duration::from_secs(5)),
///     ..ViewerConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[must_use = "ViewerConfig has no effect unless passed to RelayBuilder::with_viewer_config()"]
pub struct ViewerConfig {
    /// Emit [`RelayEvent::RequestTimedOut`](crate::RelayEvent::RequestTimedOut) once when a
    /// request stays unanswered this long. The request stays outstanding either way.
    ///
    /// Default: `None` (wait forever)
    pub request_timeout: Option<Duration>,

    /// Return to idle when an index refresh no longer lists the record being viewed.
    ///
    /// Default: `false` (keep showing the last received fields)
    pub close_when_entry_removed: bool,
}

impl ViewerConfig {
    /// Creates a new `ViewerConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports unanswered requests after three seconds.
    pub fn responsive() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(3)),
            close_when_entry_removed: false,
        }
    }

    /// Reports unanswered requests after three seconds and closes views of deleted records.
    pub fn strict() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(3)),
            close_when_entry_removed: true,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the request timeout is zero or longer than
    /// five minutes.
    pub fn validate(&self) -> Result<(), RelayError> {
        if let Some(timeout) = self.request_timeout {
            if timeout.is_zero() || timeout > MAX_REQUEST_TIMEOUT {
                return Err(invalid(format!(
                    "request_timeout must be between 1ms and {}s, got {}ms",
                    MAX_REQUEST_TIMEOUT.as_secs(),
                    timeout.as_millis()
                )));
            }
        }
        Ok(())
    }
}

/// Owner behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "OwnerConfig has no effect unless passed to RelayBuilder::with_owner_config()"]
pub struct OwnerConfig {
    /// Publish an `UPDATE` after every save so a viewer looking at the record refreshes.
    ///
    /// Default: `true`
    pub push_updates: bool,

    /// The `name` field of a freshly created record.
    ///
    /// Default: `"New Character"`
    pub default_record_name: String,

    /// The fields a freshly created record starts with.
    ///
    /// Default: [`FieldSchema::character_sheet`]
    pub schema: FieldSchema,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            push_updates: true,
            default_record_name: "New Character".to_owned(),
            schema: FieldSchema::character_sheet(),
        }
    }
}

impl OwnerConfig {
    /// Creates a new `OwnerConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves without pushing updates; viewers only see new data when they request it.
    pub fn quiet() -> Self {
        Self {
            push_updates: false,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the default record name is blank.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.default_record_name.trim().is_empty() {
            return Err(invalid("default_record_name must not be blank"));
        }
        Ok(())
    }
}

fn invalid(info: impl Into<String>) -> RelayError {
    RelayError::InvalidRequest { info: info.into() }
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

    #[test]
    fn defaults_are_valid() {
        RelayConfig::default().validate().unwrap();
        ViewerConfig::default().validate().unwrap();
        OwnerConfig::default().validate().unwrap();
        assert_eq!(RelayConfig::default().event_queue_size, 100);
        assert!(OwnerConfig::default().push_updates);
        assert_eq!(ViewerConfig::default().request_timeout, None);
    }

    #[test]
    fn presets_are_valid() {
        RelayConfig::atomic().validate().unwrap();
        ViewerConfig::responsive().validate().unwrap();
        ViewerConfig::strict().validate().unwrap();
        OwnerConfig::quiet().validate().unwrap();
    }

    #[test]
    fn bad_namespaces_are_rejected() {
        for namespace in ["", "has space", "a:b"] {
            let config = RelayConfig {
                namespace: namespace.to_owned(),
                ..RelayConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(RelayError::InvalidRequest { .. })),
                "accepted {namespace:?}"
            );
        }
    }

    #[test]
    fn event_queue_bounds() {
        let zero = RelayConfig {
            event_queue_size: 0,
            ..RelayConfig::default()
        };
        assert!(zero.validate().is_err());
        let huge = RelayConfig {
            event_queue_size: MAX_EVENT_QUEUE_SIZE + 1,
            ..RelayConfig::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = ViewerConfig {
            request_timeout: Some(Duration::ZERO),
            ..ViewerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_record_name_is_rejected() {
        let config = OwnerConfig {
            default_record_name: "   ".to_owned(),
            ..OwnerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
